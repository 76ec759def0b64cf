use embassy_time::Duration;

/// Settings for the per-voice ADSR envelope.
///
/// Stage times are the time a full-scale sweep takes. Because attack and release start from wherever the level
/// happens to be, a partial sweep takes proportionally less time.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvelopeRates {
    /// Time to rise from zero to full scale.
    pub attack: Duration,
    /// Time to fall from full scale to zero while the gate is held; the fall stops at the sustain level.
    pub decay: Duration,
    /// Level held while the gate stays high, from `0.0` to `1.0`.
    pub sustain: f32,
    /// Time to fall from full scale to zero once the gate drops.
    pub release: Duration,
}

impl Default for EnvelopeRates {
    fn default() -> Self {
        Self {
            attack: Duration::from_millis(5),
            decay: Duration::from_millis(200),
            sustain: 0.7,
            release: Duration::from_millis(300),
        }
    }
}
