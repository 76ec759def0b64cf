//! Provides [`Voice`], one physical output channel and everything needed to drive it.

use crate::modulation::{Envelope, Glide};
use wmidi::{Channel, Note, Velocity};

/// Most voices the device can drive, regardless of configuration.
pub const MAX_VOICES: usize = 8;

/// Electrical level of a gate output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateState {
    /// No note.
    #[default]
    Low,
    /// A note is sounding.
    High,
}

impl GateState {
    /// Returns `true` for [`GateState::High`].
    pub fn is_high(&self) -> bool {
        *self == Self::High
    }
}

/// One output channel: which note it plays, and the state of its envelope and glide.
///
/// The allocator decides what a voice should be doing by assigning and releasing notes. It never raises the gate
/// itself; it only *requests* that the gate be high. The modulation engine raises the gate once the gate has been low
/// for long enough, so that the attached envelope generator reliably sees a new edge.
#[derive(Clone, Copy, Debug)]
pub struct Voice {
    /// Index of the physical channel.
    pub slot: usize,
    /// The note assigned, or `None` when the voice is free. A free voice keeps sounding its last pitch while its
    /// envelope releases.
    pub note: Option<Note>,
    /// Velocity of the assigned note.
    pub velocity: Velocity,
    /// MIDI channel the assigned note arrived on.
    pub channel: Channel,
    /// Per-voice envelope.
    pub envelope: Envelope,
    /// Per-voice pitch glide.
    pub glide: Glide,
    /// Tick at which the current note was assigned.
    pub age: u32,
    /// Physical gate level.
    pub gate: GateState,
    /// Whether the allocator wants the gate high.
    pub gate_requested: bool,
    /// Tick at which the gate last fell; `None` if it has never been high.
    pub gate_low_since: Option<u32>,
    /// Breaks ties between voices assigned during the same tick.
    pub(crate) order: u32,
}

impl Default for Voice {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Voice {
    /// Constructs a silent voice for the given channel.
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            note: None,
            velocity: Velocity::from_u8_lossy(0),
            channel: Channel::Ch1,
            envelope: Envelope::default(),
            glide: Glide::default(),
            age: 0,
            gate: GateState::Low,
            gate_requested: false,
            gate_low_since: None,
            order: 0,
        }
    }

    /// Returns `true` if no note is assigned.
    pub fn is_free(&self) -> bool {
        self.note.is_none()
    }

    /// Returns `true` if the gate has been low for at least `min_low_ticks` (and at least one tick) as of `tick`.
    pub fn gate_ready(&self, tick: u32, min_low_ticks: u32) -> bool {
        match (self.gate, self.gate_low_since) {
            (GateState::High, _) => false,
            (GateState::Low, None) => true,
            (GateState::Low, Some(since)) => tick.wrapping_sub(since) >= min_low_ticks.max(1),
        }
    }

    /// Assigns a note.
    ///
    /// A silent voice simply requests its gate. A voice which is already sounding keeps its gate high (legato) unless
    /// `retrigger` is set, in which case the gate drops now and rises again once the minimum gate-low time has passed.
    pub fn start(
        &mut self,
        note: Note,
        velocity: Velocity,
        channel: Channel,
        tick: u32,
        order: u32,
        retrigger: bool,
    ) {
        if self.gate_requested && retrigger {
            self.drop_gate(tick);
        }
        self.note = Some(note);
        self.velocity = velocity;
        self.channel = channel;
        self.age = tick;
        self.order = order;
        self.gate_requested = true;
    }

    /// Releases the assigned note: the gate falls and the envelope begins its release.
    pub fn release(&mut self, tick: u32) {
        self.note = None;
        self.gate_requested = false;
        self.drop_gate(tick);
    }

    fn drop_gate(&mut self, tick: u32) {
        if self.gate.is_high() {
            self.gate = GateState::Low;
            self.gate_low_since = Some(tick);
        }
    }
}
