//! Conditions which are reported to a caller rather than merely counted.
//!
//! Only two things can fail outright: building a [`ControlPath`](crate::scheduler::ControlPath) from an unusable
//! configuration, and loading a calibration table. Everything that happens while the tick is running degrades
//! gracefully and shows up in [`Diagnostics`](crate::diagnostics::Diagnostics) instead.

use core::fmt;

/// Top-level error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A calibration table was rejected; the previously loaded table remains active.
    InvalidCalibration(CalibrationFault),
    /// The configuration cannot be used to start the control path.
    Config(ConfigError),
}

/// Why a calibration table (or its serialized form) was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationFault {
    /// The table has no entries.
    Empty,
    /// More entries were supplied than a table can hold.
    TooManyEntries,
    /// Entry `index` does not have a strictly greater input value than its predecessor.
    NonMonotonicInput {
        /// Position of the offending entry.
        index: usize,
    },
    /// Entry `index` has a smaller output code than its predecessor.
    NonMonotonicCode {
        /// Position of the offending entry.
        index: usize,
    },
    /// The table targets a channel the device doesn't have.
    NoSuchChannel,
    /// Another writer is currently publishing a table.
    WriterBusy,
    /// A serialized table doesn't start with the expected magic bytes.
    BadMagic,
    /// A serialized table was written by an unknown format version.
    UnsupportedVersion,
    /// A serialized table ended before all of its declared entries were read.
    Truncated,
    /// A serialized table's checksum doesn't match its contents.
    ChecksumMismatch,
}

/// Why a [`DeviceConfig`](crate::configuration::DeviceConfig) was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// At least one voice is required.
    NoVoices,
    /// More voices were requested than the hardware has output channels.
    TooManyVoices {
        /// Voices requested.
        requested: usize,
        /// Physical channels available.
        available: usize,
    },
    /// The tick period must be non-zero.
    ZeroTickPeriod,
    /// The per-tick drain budget must allow at least one event and one byte.
    ZeroDrainBudget,
    /// The arpeggiator clock divider must be non-zero.
    ZeroClockDivision,
    /// The sustain level must lie within `0.0..=1.0`.
    SustainOutOfRange,
    /// Volts per octave must be positive.
    InvalidPitchScale,
}

impl From<CalibrationFault> for Error {
    fn from(fault: CalibrationFault) -> Self {
        Self::InvalidCalibration(fault)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCalibration(fault) => write!(f, "invalid calibration: {fault}"),
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

impl fmt::Display for CalibrationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("table is empty"),
            Self::TooManyEntries => f.write_str("table exceeds capacity"),
            Self::NonMonotonicInput { index } => {
                write!(f, "input of entry {index} is not strictly increasing")
            }
            Self::NonMonotonicCode { index } => write!(f, "code of entry {index} decreases"),
            Self::NoSuchChannel => f.write_str("no such channel"),
            Self::WriterBusy => f.write_str("another recalibration is in progress"),
            Self::BadMagic => f.write_str("bad magic"),
            Self::UnsupportedVersion => f.write_str("unsupported version"),
            Self::Truncated => f.write_str("truncated"),
            Self::ChecksumMismatch => f.write_str("checksum mismatch"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoVoices => f.write_str("at least one voice is required"),
            Self::TooManyVoices {
                requested,
                available,
            } => write!(
                f,
                "{requested} voices requested but only {available} channels exist"
            ),
            Self::ZeroTickPeriod => f.write_str("tick period must be non-zero"),
            Self::ZeroDrainBudget => f.write_str("drain budget must be non-zero"),
            Self::ZeroClockDivision => f.write_str("arpeggiator clock division must be non-zero"),
            Self::SustainOutOfRange => f.write_str("sustain level must be within 0.0..=1.0"),
            Self::InvalidPitchScale => f.write_str("volts per octave must be positive"),
        }
    }
}

impl core::error::Error for Error {}
