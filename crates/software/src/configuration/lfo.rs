use num_derive::{FromPrimitive, ToPrimitive};

/// Shape of the LFO.
#[derive(Debug, Default, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Waveform {
    /// Linear ramps up and down.
    #[default]
    Triangle,
    /// A sine wave.
    Sine,
    /// Alternates between the extremes.
    Square,
}
impl super::CycleConfig for Waveform {}

/// Settings for the LFO shared by all voices.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LfoSettings {
    /// Shape.
    pub waveform: Waveform,
    /// Frequency in hertz.
    pub rate_hz: f32,
    /// Vibrato depth in semitones with the mod wheel (CC 1) fully up.
    pub vibrato_depth: f32,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::default(),
            rate_hz: 5.0,
            vibrato_depth: 0.5,
        }
    }
}
