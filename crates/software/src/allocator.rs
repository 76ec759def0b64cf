//! Assigns held notes to the fixed pool of voices.
//!
//! The allocator is the only thing which decides what each voice plays. It tracks every held note (whether or not it
//! is sounding) and applies one of several [policies](AllocationPolicy). It never fails: when a note can't be voiced
//! with stealing disabled it is dropped and counted. With stealing enabled the priority policy leaves outranked notes
//! waiting for a voice, and the arpeggiator plays held notes one at a time.

mod arpeggiator;
pub use arpeggiator::*;

mod held_notes;
pub use held_notes::*;

use crate::{
    configuration::{
        AllocationPolicy, ArpClock, ArpDirection, DeviceConfig, EnvelopeTrigger, NotePriority,
    },
    voice::{MAX_VOICES, Voice},
};
use core::cmp::Reverse;
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, Velocity};

/// The voice pool and the record of held notes.
#[derive(Clone, Debug)]
pub struct VoiceAllocator {
    voices: ArrayVec<[Voice; MAX_VOICES]>,
    held: HeldNotes,
    policy: AllocationPolicy,
    note_priority: NotePriority,
    steal: bool,
    trigger: EnvelopeTrigger,
    min_gate_low_ticks: u32,
    /// Where the round-robin search for a free voice begins.
    cursor: usize,
    arpeggiator: Arpeggiator,
    /// Press counter; orders held notes and voice assignments.
    seq: u32,
    /// NoteOns dropped since the last call to [`Self::take_dropped`].
    dropped: u32,
}

impl VoiceAllocator {
    /// Builds an allocator from a (validated) configuration.
    pub fn new(config: &DeviceConfig) -> Self {
        let mut allocator = Self {
            voices: (0..config.voices.min(MAX_VOICES)).map(Voice::new).collect(),
            held: HeldNotes::new(),
            policy: config.policy,
            note_priority: config.note_priority,
            steal: config.steal,
            trigger: config.envelope_trigger,
            min_gate_low_ticks: config.ticks(config.min_gate_low),
            cursor: 0,
            arpeggiator: Arpeggiator::new(
                config.policy.arp_direction().unwrap_or(ArpDirection::Up),
                config.arp_clock,
            ),
            seq: 0,
            dropped: 0,
        };
        allocator.arpeggiator.reset();
        allocator
    }

    /// Applies a new configuration. Changing the policy, voice count, or arpeggiator clock silences everything first.
    pub fn reconfigure(&mut self, config: &DeviceConfig, tick: u32) {
        let voices = config.voices.min(MAX_VOICES);
        if config.policy != self.policy
            || voices != self.voices.len()
            || config.arp_clock != self.arpeggiator.clock()
        {
            self.all_notes_off(tick);
            self.voices.truncate(voices);
            while self.voices.len() < voices {
                let slot = self.voices.len();
                self.voices.push(Voice::new(slot));
            }
            self.cursor = 0;
            if let Some(direction) = config.policy.arp_direction() {
                self.arpeggiator = Arpeggiator::new(direction, config.arp_clock);
            }
        }
        self.policy = config.policy;
        self.note_priority = config.note_priority;
        self.steal = config.steal;
        self.trigger = config.envelope_trigger;
        self.min_gate_low_ticks = config.ticks(config.min_gate_low);
    }

    /// The voice pool.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// The voice pool, for the modulation engine to advance.
    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// The record of held notes.
    pub fn held(&self) -> &HeldNotes {
        &self.held
    }

    /// Getter.
    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Returns and resets the number of NoteOns dropped since the previous call.
    pub fn take_dropped(&mut self) -> u32 {
        core::mem::take(&mut self.dropped)
    }

    /// Handles a NoteOn, returning the slot which now sounds the note, if any.
    pub fn on_note_on(
        &mut self,
        note: Note,
        velocity: Velocity,
        channel: Channel,
        tick: u32,
    ) -> Option<usize> {
        self.seq = self.seq.wrapping_add(1);
        let held = HeldNote {
            note,
            velocity,
            channel,
            seq: self.seq,
        };
        let was_empty = self.held.is_empty();
        if !self.held.press(held) {
            warn!("Too many held notes; ignoring {}", note.to_str());
            self.dropped = self.dropped.saturating_add(1);
            return None;
        }

        match self.policy {
            AllocationPolicy::Direct => self.direct_note_on(held, tick),
            AllocationPolicy::Priority => self.priority_note_on(held, tick),
            AllocationPolicy::ArpeggiatorUp
            | AllocationPolicy::ArpeggiatorDown
            | AllocationPolicy::ArpeggiatorUpDown => {
                if !was_empty {
                    return None;
                }
                self.arpeggiator.reset();
                // the first held note starts the pattern immediately, unless the transport is stopped
                if !self.arpeggiator.is_running() {
                    return None;
                }
                self.arp_step(tick);
                Some(0)
            }
        }
    }

    /// Handles a NoteOff. Releasing a note which isn't held is a no-op.
    pub fn on_note_off(&mut self, note: Note, channel: Channel, tick: u32) {
        if self.held.release(note, channel).is_none() {
            return;
        }

        match self.policy {
            AllocationPolicy::Direct => {
                if let Some(slot) = self.slot_of(note) {
                    self.voices[slot].release(tick);
                }
            }
            AllocationPolicy::Priority => self.rebalance(tick),
            AllocationPolicy::ArpeggiatorUp
            | AllocationPolicy::ArpeggiatorDown
            | AllocationPolicy::ArpeggiatorUpDown => {
                if self.held.is_empty() {
                    self.silence_arpeggio(tick);
                }
            }
        }
    }

    /// Advances time-based allocation (the internal arpeggiator clock). Called once per tick, after events.
    pub fn tick_advance(&mut self, tick: u32) {
        if self.policy.arp_direction().is_some()
            && self.arpeggiator.on_tick(tick)
            && !self.held.is_empty()
        {
            self.arp_step(tick);
        }
    }

    /// Handles MIDI Timing Clock.
    pub fn on_clock(&mut self, tick: u32) {
        if self.policy.arp_direction().is_some() && self.arpeggiator.on_clock() && !self.held.is_empty()
        {
            self.arp_step(tick);
        }
    }

    /// Handles MIDI Start.
    pub fn on_start(&mut self) {
        self.arpeggiator.start();
    }

    /// Handles MIDI Continue.
    pub fn on_continue(&mut self) {
        self.arpeggiator.resume();
    }

    /// Handles MIDI Stop. An arpeggio following MIDI clock falls silent until the clock restarts.
    pub fn on_stop(&mut self, tick: u32) {
        self.arpeggiator.stop();
        if self.policy.arp_direction().is_some()
            && matches!(self.arpeggiator.clock(), ArpClock::Midi { .. })
        {
            if let Some(voice) = self.voices.first_mut() {
                voice.release(tick);
            }
        }
    }

    /// Handles CC 123 (All Notes Off): forgets every held note and releases every voice.
    pub fn all_notes_off(&mut self, tick: u32) {
        self.held.clear();
        for voice in self.voices.iter_mut().filter(|voice| !voice.is_free()) {
            voice.release(tick);
        }
        self.arpeggiator.reset();
    }

    fn slot_of(&self, note: Note) -> Option<usize> {
        self.voices.iter().position(|voice| voice.note == Some(note))
    }

    /// Round-robin search for a free voice, preferring one whose gate may rise right away.
    fn free_slot(&self, tick: u32) -> Option<usize> {
        let len = self.voices.len();
        let cursor = self.cursor;
        let mut free = (0..len)
            .map(|i| (cursor + i) % len)
            .filter(|&slot| self.voices[slot].is_free());
        let first = free.next()?;
        Some(
            core::iter::once(first)
                .chain(free)
                .find(|&slot| self.voices[slot].gate_ready(tick, self.min_gate_low_ticks))
                .unwrap_or(first),
        )
    }

    /// The voice assigned longest ago.
    fn oldest_slot(&self, tick: u32) -> Option<usize> {
        self.voices
            .iter()
            .max_by_key(|voice| (tick.wrapping_sub(voice.age), Reverse(voice.order)))
            .map(|voice| voice.slot)
    }

    fn start(&mut self, slot: usize, held: HeldNote, tick: u32, retrigger: bool) {
        self.voices[slot].start(
            held.note,
            held.velocity,
            held.channel,
            tick,
            held.seq,
            retrigger,
        );
    }

    fn direct_note_on(&mut self, held: HeldNote, tick: u32) -> Option<usize> {
        // a re-pressed note retriggers its voice rather than taking a second one
        if let Some(slot) = self.slot_of(held.note) {
            self.start(slot, held, tick, true);
            return Some(slot);
        }

        let slot = match self.free_slot(tick) {
            Some(slot) => slot,
            None if self.steal => {
                let slot = self.oldest_slot(tick)?;
                debug!("Stealing voice {} for {}", slot, held.note.to_str());
                slot
            }
            None => {
                debug!("No voice free for {}; dropping it", held.note.to_str());
                self.dropped = self.dropped.saturating_add(1);
                return None;
            }
        };
        self.start(slot, held, tick, self.trigger.retriggers());
        self.cursor = (slot + 1) % self.voices.len();
        Some(slot)
    }

    fn priority_note_on(&mut self, held: HeldNote, tick: u32) -> Option<usize> {
        if let Some(slot) = self.slot_of(held.note) {
            self.start(slot, held, tick, true);
            return Some(slot);
        }
        self.rebalance(tick);
        let slot = self.slot_of(held.note);
        if slot.is_none() && !self.steal {
            debug!("No voice free for {}; dropping it", held.note.to_str());
            self.held.release(held.note, held.channel);
            self.dropped = self.dropped.saturating_add(1);
        }
        slot
    }

    /// Makes the voices sound the best-ranked held notes.
    ///
    /// Voices whose note dropped out of the best-ranked set are handed the best-ranked notes which aren't sounding
    /// yet; any left over are released. Notes which still need a voice after that take free voices. Without stealing,
    /// a voice is only handed on once its own note has been released.
    fn rebalance(&mut self, tick: u32) {
        let mut wanted: ArrayVec<[u8; MAX_VOICES]> = ArrayVec::new();
        for _ in 0..self.voices.len() {
            let best = self.note_priority.select(
                self.held
                    .iter()
                    .filter(|held| !wanted.contains(&u8::from(held.note)))
                    .map(|held| (held.note, held.seq)),
            );
            match best {
                Some((note, _)) => wanted.push(u8::from(note)),
                None => break,
            }
        }

        let steal = self.steal;
        let held = &self.held;
        let displaceable = |voice: &Voice| match voice.note {
            None => false,
            Some(note) if wanted.contains(&u8::from(note)) => false,
            Some(note) => steal || held.get(note).is_none(),
        };
        let mut displaced: ArrayVec<[usize; MAX_VOICES]> = self
            .voices
            .iter()
            .filter(|&voice| displaceable(voice))
            .map(|voice| voice.slot)
            .collect();
        displaced.reverse();

        for note in wanted {
            let note = Note::from_u8_lossy(note);
            if self.slot_of(note).is_some() {
                continue;
            }
            let Some(held) = self.held.get(note) else {
                continue;
            };
            if let Some(slot) = displaced.pop() {
                self.start(slot, held, tick, self.trigger.retriggers());
            } else if let Some(slot) = self.free_slot(tick) {
                self.start(slot, held, tick, true);
                self.cursor = (slot + 1) % self.voices.len();
            }
        }

        for slot in displaced {
            self.voices[slot].release(tick);
        }
    }

    fn arp_step(&mut self, tick: u32) {
        let retrigger = self.trigger.retriggers();
        match self.arpeggiator.next(&self.held) {
            Some(held) => {
                trace!("Arpeggiator steps to {}", held.note.to_str());
                self.start(0, held, tick, retrigger);
            }
            None => self.silence_arpeggio(tick),
        }
        self.arpeggiator.mark_stepped(tick);
    }

    fn silence_arpeggio(&mut self, tick: u32) {
        if let Some(voice) = self.voices.first_mut() {
            voice.release(tick);
        }
        self.arpeggiator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::GateState;
    use wmidi::U7;

    fn allocator(voices: usize, policy: AllocationPolicy) -> VoiceAllocator {
        VoiceAllocator::new(&DeviceConfig {
            voices,
            policy,
            ..DeviceConfig::default()
        })
    }

    fn on(allocator: &mut VoiceAllocator, note: Note, tick: u32) -> Option<usize> {
        allocator.on_note_on(note, U7::from_u8_lossy(100), Channel::Ch1, tick)
    }

    fn off(allocator: &mut VoiceAllocator, note: Note, tick: u32) {
        allocator.on_note_off(note, Channel::Ch1, tick);
    }

    fn sounding(allocator: &VoiceAllocator) -> ArrayVec<[Option<u8>; MAX_VOICES]> {
        allocator
            .voices()
            .iter()
            .map(|voice| voice.note.map(u8::from))
            .collect()
    }

    mod direct {
        use super::*;

        #[test]
        fn round_robin() {
            let mut allocator = allocator(3, AllocationPolicy::Direct);
            assert_eq!(Some(0), on(&mut allocator, Note::C4, 0));
            assert_eq!(Some(1), on(&mut allocator, Note::E4, 0));
            off(&mut allocator, Note::C4, 1);
            assert_eq!(
                Some(2),
                on(&mut allocator, Note::G4, 2),
                "Should continue round-robin rather than reuse slot 0"
            );
            assert_eq!(Some(0), on(&mut allocator, Note::B4, 3));
        }

        #[test]
        fn prefers_voice_whose_gate_may_rise() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 0);
            // pretend both gates rose, then release slot 1 long ago and slot 0 just now
            allocator.voices_mut().iter_mut().for_each(|v| v.gate = GateState::High);
            off(&mut allocator, Note::E4, 10);
            off(&mut allocator, Note::C4, 100);

            assert_eq!(Some(1), on(&mut allocator, Note::G4, 101));
        }

        #[test]
        fn steals_oldest() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 5);
            assert_eq!(Some(0), on(&mut allocator, Note::G4, 10), "Expected left but got right");
            assert_eq!(Some(1), on(&mut allocator, Note::B4, 11), "Expected left but got right");
            assert_eq!(0, allocator.take_dropped());
        }

        #[test]
        fn steal_breaks_ties_by_order_of_assignment() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 0);
            assert_eq!(Some(0), on(&mut allocator, Note::G4, 0));
        }

        #[test]
        fn drops_without_stealing() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 1,
                steal: false,
                ..DeviceConfig::default()
            });
            on(&mut allocator, Note::C4, 0);
            assert_eq!(None, on(&mut allocator, Note::E4, 1));
            assert_eq!(1, allocator.take_dropped());
            assert_eq!(0, allocator.take_dropped(), "Count should reset once taken");
            assert_eq!(&[Some(60_u8)][..], sounding(&allocator).as_slice(), "Existing note untouched");
        }

        #[test]
        fn repress_reuses_voice() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            allocator.voices_mut()[0].gate = GateState::High;
            assert_eq!(Some(0), on(&mut allocator, Note::C4, 3));
            assert_eq!(GateState::Low, allocator.voices()[0].gate, "Voice should retrigger");
            assert!(allocator.voices()[1].is_free(), "No second voice should be taken");
        }

        #[test]
        fn note_off_for_unassigned_note_is_noop() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            off(&mut allocator, Note::D4, 1);
            allocator.on_note_off(Note::C4, Channel::Ch2, 1);
            assert_eq!(&[Some(60_u8), None][..], sounding(&allocator).as_slice());
        }

        #[test]
        fn all_notes_off() {
            let mut allocator = allocator(2, AllocationPolicy::Direct);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 0);
            allocator.all_notes_off(1);
            assert_eq!(&[None::<u8>, None][..], sounding(&allocator).as_slice());
            assert!(allocator.held().is_empty());
        }
    }

    mod priority {
        use super::*;

        fn priority_allocator(voices: usize, note_priority: NotePriority) -> VoiceAllocator {
            VoiceAllocator::new(&DeviceConfig {
                voices,
                policy: AllocationPolicy::Priority,
                note_priority,
                ..DeviceConfig::default()
            })
        }

        #[test]
        fn low_note_priority_displaces_highest() {
            let mut allocator = priority_allocator(2, NotePriority::Low);
            on(&mut allocator, Note::E4, 0);
            on(&mut allocator, Note::G4, 1);
            assert_eq!(Some(1), on(&mut allocator, Note::C4, 2), "C4 should take G4's voice");
            assert_eq!(&[Some(64_u8), Some(60)][..], sounding(&allocator).as_slice());

            assert_eq!(None, on(&mut allocator, Note::B4, 3), "B4 is outranked and should wait");
            off(&mut allocator, Note::E4, 4);
            assert_eq!(
                &[Some(67_u8), Some(60)][..],
                sounding(&allocator).as_slice(),
                "Best-ranked waiting note should take the released voice"
            );
        }

        #[test]
        fn last_note_priority() {
            let mut allocator = priority_allocator(1, NotePriority::Last);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 1);
            assert_eq!(&[Some(64_u8)][..], sounding(&allocator).as_slice());
            off(&mut allocator, Note::E4, 2);
            assert_eq!(&[Some(60_u8)][..], sounding(&allocator).as_slice(), "Should fall back to C4");
            off(&mut allocator, Note::C4, 3);
            assert_eq!(&[None::<u8>][..], sounding(&allocator).as_slice());
        }

        #[test]
        fn legato_handoff_keeps_gate() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 1,
                policy: AllocationPolicy::Priority,
                note_priority: NotePriority::Last,
                envelope_trigger: EnvelopeTrigger::BreakEnd,
                ..DeviceConfig::default()
            });
            on(&mut allocator, Note::C4, 0);
            allocator.voices_mut()[0].gate = GateState::High;
            on(&mut allocator, Note::E4, 1);
            assert_eq!(GateState::High, allocator.voices()[0].gate, "Legato should not retrigger");
        }

        #[test]
        fn without_stealing_outranking_note_is_dropped() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 1,
                policy: AllocationPolicy::Priority,
                note_priority: NotePriority::Last,
                steal: false,
                ..DeviceConfig::default()
            });
            assert_eq!(Some(0), on(&mut allocator, Note::C4, 0));
            assert_eq!(None, on(&mut allocator, Note::E4, 1));
            assert_eq!(&[Some(60_u8)][..], sounding(&allocator).as_slice(), "Expected left but got right");
            assert_eq!(1, allocator.take_dropped());

            off(&mut allocator, Note::C4, 2);
            assert_eq!(
                &[None::<u8>][..],
                sounding(&allocator).as_slice(),
                "A dropped note should not sound later"
            );
            assert_eq!(Some(0), on(&mut allocator, Note::G4, 3));
        }

        #[test]
        fn without_stealing_released_voice_goes_to_new_note() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 2,
                policy: AllocationPolicy::Priority,
                note_priority: NotePriority::Low,
                steal: false,
                ..DeviceConfig::default()
            });
            on(&mut allocator, Note::E4, 0);
            on(&mut allocator, Note::G4, 1);
            assert_eq!(None, on(&mut allocator, Note::C4, 2), "Held notes keep their voices");
            assert_eq!(&[Some(64_u8), Some(67)][..], sounding(&allocator).as_slice());
            assert_eq!(1, allocator.take_dropped());

            off(&mut allocator, Note::G4, 3);
            assert_eq!(Some(1), on(&mut allocator, Note::C4, 4));
            assert_eq!(0, allocator.take_dropped());
        }
    }

    mod arpeggiated {
        use super::*;

        fn arp_allocator(policy: AllocationPolicy, ticks_per_step: u32) -> VoiceAllocator {
            VoiceAllocator::new(&DeviceConfig {
                voices: 2,
                policy,
                arp_clock: ArpClock::Internal { ticks_per_step },
                ..DeviceConfig::default()
            })
        }

        #[test]
        fn first_note_starts_immediately() {
            let mut allocator = arp_allocator(AllocationPolicy::ArpeggiatorUp, 4);
            assert_eq!(Some(0), on(&mut allocator, Note::E4, 0));
            assert_eq!(Some(Note::E4), allocator.voices()[0].note);
            assert_eq!(None, on(&mut allocator, Note::C4, 0), "Later notes join the pattern");
        }

        #[test]
        fn steps_on_clock_division() {
            let mut allocator = arp_allocator(AllocationPolicy::ArpeggiatorUp, 2);
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::G4, 0);
            on(&mut allocator, Note::E4, 0);

            let mut played = ArrayVec::<[u8; 8]>::new();
            for tick in 0..8 {
                allocator.tick_advance(tick);
                if tick % 2 == 0 {
                    played.extend(allocator.voices()[0].note.map(u8::from));
                }
            }
            assert_eq!(&[60_u8, 64, 67, 60][..], played.as_slice(), "Expected left but got right");
            assert!(allocator.voices()[1].is_free(), "Arpeggiator uses only the first voice");
        }

        #[test]
        fn releasing_everything_silences() {
            let mut allocator = arp_allocator(AllocationPolicy::ArpeggiatorDown, 2);
            on(&mut allocator, Note::C4, 0);
            off(&mut allocator, Note::C4, 1);
            assert!(allocator.voices()[0].is_free());
            assert!(!allocator.voices()[0].gate_requested);
        }

        #[test]
        fn midi_clock_and_transport() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 1,
                policy: AllocationPolicy::ArpeggiatorUp,
                arp_clock: ArpClock::Midi { clocks_per_step: 6 },
                ..DeviceConfig::default()
            });
            on(&mut allocator, Note::C4, 0);
            on(&mut allocator, Note::E4, 0);
            for tick in 1..6 {
                allocator.on_clock(tick);
            }
            assert_eq!(Some(Note::C4), allocator.voices()[0].note, "Not yet six clocks");
            allocator.on_clock(6);
            assert_eq!(Some(Note::E4), allocator.voices()[0].note);

            allocator.on_stop(7);
            assert!(allocator.voices()[0].is_free(), "Stop should silence the arpeggio");

            allocator.on_start();
            allocator.on_clock(8);
            assert_eq!(Some(Note::C4), allocator.voices()[0].note, "Start should restart the pattern");
        }

        #[test]
        fn stopped_transport_holds_first_note_until_clock_resumes() {
            let mut allocator = VoiceAllocator::new(&DeviceConfig {
                voices: 1,
                policy: AllocationPolicy::ArpeggiatorUp,
                arp_clock: ArpClock::Midi { clocks_per_step: 6 },
                ..DeviceConfig::default()
            });
            allocator.on_stop(0);

            assert_eq!(None, on(&mut allocator, Note::E4, 1), "Expected left but got right");
            assert!(allocator.voices()[0].is_free(), "Nothing should sound while stopped");
            allocator.on_clock(2);
            assert!(allocator.voices()[0].is_free(), "Clocks are ignored while stopped");

            allocator.on_continue();
            allocator.on_clock(3);
            assert_eq!(Some(Note::E4), allocator.voices()[0].note, "First clock after Continue should step");
        }
    }
}
