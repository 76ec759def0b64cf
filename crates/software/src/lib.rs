//! This crate contains architecture-agnostic logic for polycv, a device which lets analog oscillators and envelopes be
//! played from modern music equipment by translating [MIDI](https://midi.org/midi-1-0) messages into calibrated
//! [CV/gate](https://en.wikipedia.org/wiki/CV/gate) signals.
//!
//! Everything here is driven by a fixed-period real-time tick (see [`scheduler::ControlPath`]). Bytes arrive through
//! lock-free [queues](`queue`), are decoded into [events](`midi::MidiEvent`), assigned to voices by the
//! [allocator](`allocator`), shaped by the [modulation engine](`modulation`), and finally corrected against per-unit
//! [calibration](`calibration`) tables before they reach the DAC.

#![deny(missing_docs)]
#![no_std]

#[macro_use]
mod fmt;

pub mod allocator;
pub mod calibration;
pub mod configuration;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod midi;
pub mod modulation;
pub mod queue;
pub mod scheduler;
pub mod voice;

pub use error::Error;
