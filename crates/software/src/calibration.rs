//! Per-unit correction of output voltages.
//!
//! No two DACs, op-amps, and oscillators track exactly alike, so each output channel gets a table of measured
//! `(target voltage, DAC code)` pairs. Between measurements the code is interpolated linearly; beyond them it is
//! clamped. Channels without a table fall back to the ideal mapping for the DAC.
//!
//! Tables live in a double-buffered [`CalibrationBank`] so that the control path never sees one half-written. They
//! are stored in flash using the [`persist`] codec and can be rewritten on the bench with the SysEx [`protocol`].

mod bank;
pub use bank::*;

mod table;
pub use table::*;

pub mod persist;
pub mod protocol;

/// Most output channels a bank holds tables for.
pub const MAX_CHANNELS: usize = crate::voice::MAX_VOICES;
