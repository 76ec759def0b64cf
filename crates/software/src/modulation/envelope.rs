//! Per-voice ADSR envelope.

use crate::configuration::EnvelopeRates;
use embassy_time::Duration;

/// Where an [`Envelope`] is in its contour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnvelopeStage {
    /// Silent; the level is zero.
    #[default]
    Idle,
    /// Rising toward full scale.
    Attack,
    /// Falling toward the sustain level.
    Decay,
    /// Holding the sustain level.
    Sustain,
    /// Falling toward zero.
    Release,
}

/// Per-tick level changes derived from [`EnvelopeRates`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeSteps {
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
}

impl EnvelopeSteps {
    /// Converts stage durations to steps using `ticks`, which maps a duration to a number of ticks.
    ///
    /// A stage shorter than one tick completes in a single tick.
    pub fn new(rates: &EnvelopeRates, ticks: impl Fn(Duration) -> u32) -> Self {
        let step = |duration| 1.0 / ticks(duration).max(1) as f32;
        Self {
            attack: step(rates.attack),
            decay: step(rates.decay),
            sustain: rates.sustain.clamp(0.0, 1.0),
            release: step(rates.release),
        }
    }

    /// The largest of the per-tick steps.
    pub fn max(&self) -> f32 {
        self.attack.max(self.decay).max(self.release)
    }
}

/// An ADSR envelope which advances one tick at a time.
///
/// Both attack and release begin from the current level rather than from zero or full scale, so retriggering a
/// voice mid-release (or releasing it mid-attack) never makes the level jump.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
}

impl Envelope {
    /// Current stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current level, `0.0` to `1.0`.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Begins the attack from the current level. Called when the gate rises.
    pub fn trigger(&mut self) {
        self.stage = EnvelopeStage::Attack;
    }

    /// Begins the release from the current level. Does nothing if the envelope is idle or already releasing.
    pub fn release(&mut self) {
        if !matches!(self.stage, EnvelopeStage::Idle | EnvelopeStage::Release) {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Moves the level by at most one step.
    pub fn advance(&mut self, steps: &EnvelopeSteps) {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Sustain => {}
            EnvelopeStage::Attack => {
                self.level += steps.attack;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level -= steps.decay;
                if self.level <= steps.sustain {
                    self.level = steps.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Release => {
                self.level -= steps.release;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> EnvelopeSteps {
        let rates = EnvelopeRates {
            attack: Duration::from_millis(4),
            decay: Duration::from_millis(10),
            sustain: 0.6,
            release: Duration::from_millis(5),
        };
        EnvelopeSteps::new(&rates, |d| d.as_millis() as u32)
    }

    #[test]
    fn full_contour() {
        let steps = steps();
        let mut envelope = Envelope::default();
        envelope.trigger();

        for _ in 0..4 {
            envelope.advance(&steps);
        }
        assert_eq!(1.0, envelope.level(), "Attack should take four ticks");
        assert_eq!(EnvelopeStage::Decay, envelope.stage());

        for _ in 0..5 {
            envelope.advance(&steps);
        }
        assert_eq!(0.6, envelope.level());
        assert_eq!(EnvelopeStage::Sustain, envelope.stage());

        envelope.release();
        for _ in 0..4 {
            envelope.advance(&steps);
        }
        assert_eq!(0.0, envelope.level());
        assert_eq!(EnvelopeStage::Idle, envelope.stage());
    }

    #[test]
    fn attack_restarts_from_current_level() {
        let steps = steps();
        let mut envelope = Envelope {
            stage: EnvelopeStage::Release,
            level: 0.3,
        };
        envelope.trigger();
        envelope.advance(&steps);
        assert!((envelope.level() - 0.55).abs() < 1e-6, "Expected 0.55 but got {}", envelope.level());
    }

    #[test]
    fn release_of_idle_envelope_is_noop() {
        let mut envelope = Envelope::default();
        envelope.release();
        assert_eq!(EnvelopeStage::Idle, envelope.stage());
    }

    #[test]
    fn instant_stages_take_one_tick() {
        let rates = EnvelopeRates {
            attack: Duration::from_ticks(0),
            ..EnvelopeRates::default()
        };
        let steps = EnvelopeSteps::new(&rates, |d| d.as_millis() as u32);
        let mut envelope = Envelope::default();
        envelope.trigger();
        envelope.advance(&steps);
        assert_eq!(1.0, envelope.level());
        assert_eq!(1.0, steps.max());
    }
}
