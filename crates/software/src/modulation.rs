//! Time-varying shaping applied on top of the notes the allocator assigns: per-voice envelopes and glides, the shared
//! LFO, and enforcement of the minimum time a gate must stay low between notes.
//!
//! Everything advances in whole ticks. Rates are configured as durations and converted once, when the engine is
//! built, so that the tick itself only adds and compares.

mod envelope;
pub use envelope::*;

mod lfo;
pub use lfo::*;

mod portamento;
pub use portamento::*;

use crate::{
    configuration::DeviceConfig,
    voice::{GateState, Voice},
};
use wmidi::ControlValue;

/// A voice's modulation sources as of the current tick.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Modulation {
    /// Envelope level, `0.0` to `1.0`.
    pub envelope: f32,
    /// Shared LFO value, `-1.0` to `1.0`.
    pub lfo: f32,
    /// Current glide position as a fractional MIDI note number.
    pub glide_semitones: f32,
}

/// Owns the settings and shared state needed to advance every voice's modulation.
#[derive(Clone, Debug)]
pub struct ModulationEngine {
    steps: EnvelopeSteps,
    lfo: Lfo,
    portamento: Portamento,
    min_gate_low_ticks: u32,
}

impl ModulationEngine {
    /// Builds an engine from a (validated) configuration.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            steps: EnvelopeSteps::new(&config.envelope, |d| config.ticks(d)),
            lfo: Lfo::new(&config.lfo, config.tick_period),
            portamento: Portamento::new(config.ticks(config.portamento_max)),
            min_gate_low_ticks: config.ticks(config.min_gate_low),
        }
    }

    /// Applies a new configuration without disturbing voices, the LFO phase, or the portamento controllers.
    pub fn reconfigure(&mut self, config: &DeviceConfig) {
        self.steps = EnvelopeSteps::new(&config.envelope, |d| config.ticks(d));
        self.lfo.configure(&config.lfo, config.tick_period);
        self.portamento
            .set_max_ticks(config.ticks(config.portamento_max));
        self.min_gate_low_ticks = config.ticks(config.min_gate_low);
    }

    /// Advances every voice, and the LFO, by one tick. Must be called exactly once per tick.
    pub fn advance_tick(&mut self, voices: &mut [Voice], tick: u32) {
        for voice in voices.iter_mut() {
            if !voice.gate.is_high() {
                voice.envelope.release();
            }
            if voice.gate_requested && voice.gate_ready(tick, self.min_gate_low_ticks) {
                trace!("Raising gate of voice {}", voice.slot);
                voice.gate = GateState::High;
                voice.envelope.trigger();
            }
            voice.envelope.advance(&self.steps);

            if let Some(note) = voice.note {
                if voice.glide.destination() != Some(note) {
                    voice.glide.set_destination(note, self.portamento.glide_ticks());
                }
            }
            voice.glide.advance();
        }
        self.lfo.advance();
    }

    /// Reads a voice's modulation. Pure; may be called any number of times per tick.
    pub fn sample(&self, voice: &Voice) -> Modulation {
        Modulation {
            envelope: voice.envelope.level(),
            lfo: self.lfo.value(),
            glide_semitones: voice.glide.position(),
        }
    }

    /// The largest change in envelope level which can occur from one tick to the next.
    pub fn max_slew(&self) -> f32 {
        self.steps.max()
    }

    /// Handles CC 5 (Portamento Time).
    pub fn set_portamento_time(&mut self, time: ControlValue) {
        self.portamento.set_time(time);
    }

    /// Handles CC 37 (Portamento Time LSB).
    pub fn set_portamento_time_lsb(&mut self, lsb: ControlValue) {
        self.portamento.set_time_lsb(lsb);
    }

    /// Handles CC 65 (Portamento On/Off).
    pub fn set_portamento_enabled(&mut self, enabled: bool) {
        self.portamento.set_enabled(enabled);
    }
}
