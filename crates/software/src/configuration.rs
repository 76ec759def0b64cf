//! This module contains both user-configurable settings (implemented as enums and small `Copy` structs) and traits to
//! make them easier to work with in code.
//!
//! Everything here is plain data. A [`DeviceConfig`] is validated once, when the
//! [`ControlPath`](crate::scheduler::ControlPath) is built; enum-valued options can then be cycled at runtime from a
//! pushbutton via [`CycleConfig`].

mod allocation_policy;
pub use allocation_policy::*;

mod channel_filter;
pub use channel_filter::*;

mod envelope;
pub use envelope::*;

mod envelope_trigger;
pub use envelope_trigger::*;

mod lfo;
pub use lfo::*;

mod note_priority;
pub use note_priority::*;

mod pitch_mapping;
pub use pitch_mapping::*;

use crate::{error::ConfigError, voice::MAX_VOICES};
use embassy_time::Duration;
use num_traits::{FromPrimitive, ToPrimitive};

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Copy + Sized,
    {
        self.to_u8()
            .and_then(|index| index.checked_add(1))
            .and_then(<Self as FromPrimitive>::from_u8)
            .or_else(|| <Self as FromPrimitive>::from_u8(0))
            .unwrap_or(self)
    }
}

/// Everything the control path needs to know before it starts.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Number of voice slots; at most the number of physical output channels.
    pub voices: usize,
    /// How notes are assigned to voices.
    pub policy: AllocationPolicy,
    /// Which held notes win under [`AllocationPolicy::Priority`].
    pub note_priority: NotePriority,
    /// Whether a NoteOn may take over a sounding voice when none is free.
    pub steal: bool,
    /// Legato or retrigger.
    pub envelope_trigger: EnvelopeTrigger,
    /// Per-voice ADSR settings.
    pub envelope: EnvelopeRates,
    /// The shared LFO.
    pub lfo: LfoSettings,
    /// How long a gate must stay low before it may rise again.
    pub min_gate_low: Duration,
    /// Which MIDI channels are listened to.
    pub channel_filter: ChannelFilter,
    /// What advances the arpeggiator.
    pub arp_clock: ArpClock,
    /// How notes become voltages.
    pub pitch: PitchMapping,
    /// Glide time when CC 5 (Portamento Time) is at its maximum.
    pub portamento_max: Duration,
    /// Period of the control tick.
    pub tick_period: Duration,
    /// Most events applied per tick; the rest wait for the next one.
    pub max_events_per_tick: usize,
    /// Most bytes read from the input queues per tick.
    pub max_bytes_per_tick: usize,
    /// Whether MIDI clock, start, continue, and stop are echoed to the outbound transport.
    pub clock_passthrough: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            voices: 4,
            policy: AllocationPolicy::default(),
            note_priority: NotePriority::Last,
            steal: true,
            envelope_trigger: EnvelopeTrigger::default(),
            envelope: EnvelopeRates::default(),
            lfo: LfoSettings::default(),
            min_gate_low: Duration::from_millis(2),
            channel_filter: ChannelFilter::Omni,
            arp_clock: ArpClock::default(),
            pitch: PitchMapping::default(),
            portamento_max: Duration::from_secs(2),
            tick_period: Duration::from_millis(1),
            max_events_per_tick: 16,
            max_bytes_per_tick: 64,
            clock_passthrough: false,
        }
    }
}

impl DeviceConfig {
    /// Checks that the configuration is usable on hardware with `channels` output channels.
    pub fn validate(&self, channels: usize) -> Result<(), ConfigError> {
        let available = channels.min(MAX_VOICES);
        if self.voices == 0 {
            return Err(ConfigError::NoVoices);
        }
        if self.voices > available {
            return Err(ConfigError::TooManyVoices {
                requested: self.voices,
                available,
            });
        }
        if self.tick_period.as_micros() == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.max_events_per_tick == 0 || self.max_bytes_per_tick == 0 {
            return Err(ConfigError::ZeroDrainBudget);
        }
        if self.arp_clock.division() == 0 {
            return Err(ConfigError::ZeroClockDivision);
        }
        if !(0.0..=1.0).contains(&self.envelope.sustain) {
            return Err(ConfigError::SustainOutOfRange);
        }
        if !(self.pitch.volts_per_octave.as_volts() > 0.0) {
            return Err(ConfigError::InvalidPitchScale);
        }
        Ok(())
    }

    /// Converts a duration to a whole number of ticks, rounding up.
    pub fn ticks(&self, duration: Duration) -> u32 {
        let period = self.tick_period.as_micros().max(1);
        let ticks = duration.as_micros().div_ceil(period);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_derive::{FromPrimitive, ToPrimitive};

    #[derive(Debug, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq)]
    enum Alpha {
        A,
        B,
        C,
    }
    impl CycleConfig for Alpha {}

    #[test]
    fn cycle() {
        let config = Alpha::A.cycle();
        assert_eq!(
            Alpha::B,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::C,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::A,
            config,
            "Should wrap around to first variant; expected left but got right"
        );
    }

    #[test]
    fn default_is_valid() {
        assert_eq!(Ok(()), DeviceConfig::default().validate(4));
    }

    #[test]
    fn rejects_more_voices_than_channels() {
        let config = DeviceConfig {
            voices: 6,
            ..DeviceConfig::default()
        };
        assert_eq!(
            Err(ConfigError::TooManyVoices {
                requested: 6,
                available: 4
            }),
            config.validate(4),
            "Expected left but got right"
        );
    }

    #[test]
    fn rejects_degenerate_values() {
        let base = DeviceConfig::default();
        let cases = [
            (
                DeviceConfig { voices: 0, ..base },
                ConfigError::NoVoices,
            ),
            (
                DeviceConfig {
                    tick_period: Duration::from_ticks(0),
                    ..base
                },
                ConfigError::ZeroTickPeriod,
            ),
            (
                DeviceConfig {
                    max_bytes_per_tick: 0,
                    ..base
                },
                ConfigError::ZeroDrainBudget,
            ),
            (
                DeviceConfig {
                    arp_clock: ArpClock::Midi { clocks_per_step: 0 },
                    ..base
                },
                ConfigError::ZeroClockDivision,
            ),
            (
                DeviceConfig {
                    envelope: EnvelopeRates {
                        sustain: 1.5,
                        ..base.envelope
                    },
                    ..base
                },
                ConfigError::SustainOutOfRange,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(Err(expected), config.validate(4), "Expected left but got right");
        }
    }

    #[test]
    fn ticks_round_up() {
        let config = DeviceConfig::default();
        assert_eq!(2, config.ticks(Duration::from_millis(2)));
        assert_eq!(3, config.ticks(Duration::from_micros(2_001)));
        assert_eq!(0, config.ticks(Duration::from_ticks(0)));
    }
}
