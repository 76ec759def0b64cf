//! The low-frequency oscillator shared by all voices.

use crate::configuration::{LfoSettings, Waveform};
use core::f32::consts::TAU;
use embassy_time::Duration;
use micromath::F32Ext;

const PHASE_SCALE: f32 = 4_294_967_296.0;

/// A phase-accumulator LFO producing a bipolar (`-1.0` to `1.0`) signal.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lfo {
    waveform: Waveform,
    /// Position within the cycle; a full cycle spans the whole `u32` range and wraps.
    phase: u32,
    /// Added to `phase` each tick.
    increment: u32,
}

impl Lfo {
    /// Constructs an LFO at phase zero.
    pub fn new(settings: &LfoSettings, tick_period: Duration) -> Self {
        let mut lfo = Self {
            waveform: settings.waveform,
            phase: 0,
            increment: 0,
        };
        lfo.configure(settings, tick_period);
        lfo
    }

    /// Changes shape and rate without resetting the phase.
    pub fn configure(&mut self, settings: &LfoSettings, tick_period: Duration) {
        let cycles_per_tick = settings.rate_hz.max(0.0) * tick_period.as_micros() as f32 / 1_000_000.0;
        self.waveform = settings.waveform;
        // saturating float-to-int cast; rates above half the tick rate alias regardless
        self.increment = (cycles_per_tick * PHASE_SCALE) as u32;
    }

    /// Advances the phase by one tick.
    pub fn advance(&mut self) {
        self.phase = self.phase.wrapping_add(self.increment);
    }

    /// Current output, `-1.0` to `1.0`.
    pub fn value(&self) -> f32 {
        let position = self.phase as f32 / PHASE_SCALE;
        match self.waveform {
            Waveform::Triangle => {
                if position < 0.25 {
                    4.0 * position
                } else if position < 0.75 {
                    2.0 - 4.0 * position
                } else {
                    4.0 * position - 4.0
                }
            }
            Waveform::Sine => F32Ext::sin(position * TAU),
            Waveform::Square => {
                if position < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}
