//! Step sequencing over the held notes.

use super::{HeldNote, HeldNotes};
use crate::configuration::{ArpClock, ArpDirection};
use wmidi::Note;

/// Decides when the arpeggiator steps and which held note it steps to.
///
/// It owns no voice; the allocator applies each step to the first voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arpeggiator {
    direction: ArpDirection,
    clock: ArpClock,
    /// Note value of the previous step; `None` before the first step of a pattern.
    last: Option<Note>,
    /// Current leg of an up-down pattern.
    ascending: bool,
    /// Clock pulses (ticks or MIDI clocks) counted toward the next step.
    pulses: u32,
    /// Whether MIDI clock advances the pattern; cleared by Stop.
    running: bool,
    last_step_tick: Option<u32>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Arpeggiator {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Arpeggiator {{ direction: {}, clock: {}, last: {}, pulses: {}, running: {} }}",
            self.direction,
            self.clock,
            self.last.map(u8::from),
            self.pulses,
            self.running
        );
    }
}

impl Arpeggiator {
    /// Constructs an arpeggiator at the start of its pattern.
    pub fn new(direction: ArpDirection, clock: ArpClock) -> Self {
        Self {
            direction,
            clock,
            last: None,
            ascending: true,
            pulses: 0,
            running: true,
            last_step_tick: None,
        }
    }

    /// Getter.
    pub fn clock(&self) -> ArpClock {
        self.clock
    }

    /// Returns to the start of the pattern.
    pub fn reset(&mut self) {
        self.last = None;
        self.ascending = self.direction != ArpDirection::Down;
        self.pulses = 0;
    }

    /// Handles MIDI Start: the next clock begins the pattern from the top.
    pub fn start(&mut self) {
        self.reset();
        self.running = true;
    }

    /// Handles MIDI Continue.
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Handles MIDI Stop.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Returns `false` if the arpeggiator follows MIDI clock and the transport has been stopped.
    pub fn is_running(&self) -> bool {
        match self.clock {
            ArpClock::Internal { .. } => true,
            ArpClock::Midi { .. } => self.running,
        }
    }

    /// Counts a tick, returning `true` if a step is due. Only relevant to [`ArpClock::Internal`].
    pub fn on_tick(&mut self, tick: u32) -> bool {
        let ArpClock::Internal { ticks_per_step } = self.clock else {
            return false;
        };
        // the step which started the pattern this very tick counts as this tick's step
        if self.last_step_tick == Some(tick) {
            return false;
        }
        self.pulses += 1;
        if self.pulses >= ticks_per_step.max(1) {
            self.pulses = 0;
            true
        } else {
            false
        }
    }

    /// Counts a MIDI clock, returning `true` if a step is due. Only relevant to [`ArpClock::Midi`].
    pub fn on_clock(&mut self) -> bool {
        let ArpClock::Midi { clocks_per_step } = self.clock else {
            return false;
        };
        if !self.running {
            return false;
        }
        let due = self.pulses == 0;
        self.pulses = (self.pulses + 1) % clocks_per_step.max(1);
        due
    }

    /// Records that a step happened at `tick`, restarting the count toward the next one.
    pub fn mark_stepped(&mut self, tick: u32) {
        self.last_step_tick = Some(tick);
        self.pulses = match self.clock {
            ArpClock::Internal { .. } => 0,
            ArpClock::Midi { clocks_per_step } => 1 % clocks_per_step.max(1),
        };
    }

    /// Chooses the next note of the pattern, or `None` if nothing is held.
    ///
    /// Walking by pitch from the previous note (rather than by index) keeps the pattern coherent while notes are
    /// added and removed.
    pub fn next(&mut self, held: &HeldNotes) -> Option<HeldNote> {
        let next = match (self.direction, self.last) {
            (ArpDirection::Down, None) => held.extreme(false),
            (_, None) => held.extreme(true),
            (ArpDirection::Up, Some(last)) => held.neighbor(last, true).or_else(|| held.extreme(true)),
            (ArpDirection::Down, Some(last)) => {
                held.neighbor(last, false).or_else(|| held.extreme(false))
            }
            (ArpDirection::UpDown, Some(last)) => held.neighbor(last, self.ascending).or_else(|| {
                // end of a leg; turn around without repeating the end note
                self.ascending = !self.ascending;
                held.neighbor(last, self.ascending)
                    .or_else(|| held.extreme(self.ascending))
            }),
        };
        self.last = next.map(|held| held.note);
        next
    }
}
