//! Provides a struct [`HeldNotes`] for tracking which keys are down. Here "held" means the notes that are currently
//! being played (e.g., depressed on a keyboard), regardless of whether or not those notes are actually voiced.

use tinyvec::ArrayVec;
use wmidi::{Channel, Note, U7, Velocity};

/// Per the General MIDI Level 2 specification, compliant devices "must be capable of supplying polyphony of
/// 32 or more allocated notes simultaneously." Thus, this will be the default size of a HeldNotes instance.
pub const GM2_SIMUL_NOTE_NUM: usize = 32;

/// A held note, with what's needed to voice it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeldNote {
    /// Which key.
    pub note: Note,
    /// How hard it was struck.
    pub velocity: Velocity,
    /// Which MIDI channel it arrived on.
    pub channel: Channel,
    /// When it was pressed, relative to other presses. Larger is more recent.
    pub seq: u32,
}

/// Internally, entries store [`U7`]s and a channel index because [`tinyvec`] requires that items implement
/// [`Default`]; public interfaces deal in [`HeldNote`] instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Entry {
    note: U7,
    velocity: U7,
    channel: u8,
    seq: u32,
}

impl From<Entry> for HeldNote {
    fn from(entry: Entry) -> Self {
        Self {
            note: Note::from(entry.note),
            velocity: entry.velocity,
            channel: Channel::from_index(entry.channel).unwrap_or(Channel::Ch1),
            seq: entry.seq,
        }
    }
}

/// The ordered record of held notes, oldest first.
///
/// Each note value appears at most once: pressing a note which is already held (even on another channel) replaces
/// the earlier press, so the most recent event wins.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeldNotes {
    data: ArrayVec<[Entry; GM2_SIMUL_NOTE_NUM]>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for HeldNotes {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "HeldNotes {{ data: [");
        for (i, entry) in self.data.iter().enumerate() {
            if i == 0 {
                defmt::write!(fmt, " ");
            } else {
                defmt::write!(fmt, ", ");
            }
            defmt::write!(
                fmt,
                "{} ({})",
                Note::from(entry.note).to_str(),
                u8::from(entry.note)
            );
        }
        defmt::write!(fmt, " ] }}");
    }
}

impl HeldNotes {
    /// Construct an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a press. Equivalent to depressing a key on a keyboard.
    ///
    /// Returns `false` (and ignores the press) if the record is full.
    pub fn press(&mut self, held: HeldNote) -> bool {
        let note = U7::from_u8_lossy(u8::from(held.note));
        self.data.retain(|entry| entry.note != note);
        let entry = Entry {
            note,
            velocity: held.velocity,
            channel: held.channel.index(),
            seq: held.seq,
        };
        self.data.try_push(entry).is_none()
    }

    /// Records a release. Equivalent to releasing a depressed key on a keyboard.
    ///
    /// Only a release on the channel of the most recent press counts; anything else is ignored and returns `None`.
    pub fn release(&mut self, note: Note, channel: Channel) -> Option<HeldNote> {
        let note = U7::from_u8_lossy(u8::from(note));
        let position = self
            .data
            .iter()
            .position(|entry| entry.note == note && entry.channel == channel.index())?;
        Some(self.data.remove(position).into())
    }

    /// Returns the held note with the given value, if any.
    pub fn get(&self, note: Note) -> Option<HeldNote> {
        let note = U7::from_u8_lossy(u8::from(note));
        self.data
            .iter()
            .find(|entry| entry.note == note)
            .map(|&entry| entry.into())
    }

    /// Forgets every held note.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Determine if any notes are held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns an [`Iterator`] over the held notes.
    ///
    /// Order is preserved; e.g., the first performed note can be accessed via the first call to `.next()`, and the
    /// last performed note is accessible via `.last()`.
    pub fn iter(&self) -> impl Iterator<Item = HeldNote> + '_ {
        self.data.iter().map(|&entry| entry.into())
    }

    /// The held note immediately above `note` in pitch, or below it if `ascending` is `false`.
    pub fn neighbor(&self, note: Note, ascending: bool) -> Option<HeldNote> {
        let candidates = self.iter();
        if ascending {
            candidates.filter(|held| held.note > note).min_by_key(|held| held.note)
        } else {
            candidates.filter(|held| held.note < note).max_by_key(|held| held.note)
        }
    }

    /// The lowest held note, or the highest if `lowest` is `false`.
    pub fn extreme(&self, lowest: bool) -> Option<HeldNote> {
        if lowest {
            self.iter().min_by_key(|held| held.note)
        } else {
            self.iter().max_by_key(|held| held.note)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(note: Note, seq: u32) -> HeldNote {
        HeldNote {
            note,
            velocity: U7::from_u8_lossy(100),
            channel: Channel::Ch1,
            seq,
        }
    }

    fn chord() -> HeldNotes {
        let mut notes = HeldNotes::new();
        notes.press(held(Note::E4, 0));
        notes.press(held(Note::C4, 1));
        notes.press(held(Note::G4, 2));
        notes
    }

    #[test]
    fn press_appends() {
        let mut notes = chord();
        notes.press(held(Note::D4, 3));
        let order: tinyvec::ArrayVec<[u8; 4]> = notes.iter().map(|h| u8::from(h.note)).collect();
        assert_eq!(&[64_u8, 60, 67, 62][..], order.as_slice(), "Expected left but got right");
    }

    #[test]
    fn repress_moves_to_most_recent() {
        let mut notes = chord();
        notes.press(HeldNote {
            channel: Channel::Ch2,
            ..held(Note::E4, 3)
        });
        assert_eq!(3, notes.iter().count(), "Re-pressed note should not be duplicated");
        assert_eq!(Some(held(Note::G4, 2)), notes.iter().nth(1));
        let last = notes.iter().last();
        assert_eq!(Some(Channel::Ch2), last.map(|h| h.channel));
        assert_eq!(Some(3), last.map(|h| h.seq));
    }

    #[test]
    fn press_ignores_rather_than_overflow() {
        let mut notes = HeldNotes::new();
        for n in 0..GM2_SIMUL_NOTE_NUM as u8 {
            assert!(notes.press(held(Note::from_u8_lossy(n), u32::from(n))));
        }
        assert!(!notes.press(held(Note::from_u8_lossy(100), 100)));
        assert_eq!(GM2_SIMUL_NOTE_NUM, notes.iter().count(), "Expected length not to change");
        assert_eq!(None, notes.get(Note::from_u8_lossy(100)));
    }

    #[test]
    fn release() {
        let mut notes = chord();
        assert_eq!(Some(held(Note::C4, 1)), notes.release(Note::C4, Channel::Ch1));
        assert_eq!(2, notes.iter().count());
        assert_eq!(None, notes.release(Note::C4, Channel::Ch1), "Second release is a no-op");
    }

    #[test]
    fn release_on_other_channel_is_ignored() {
        let mut notes = chord();
        assert_eq!(None, notes.release(Note::C4, Channel::Ch2));
        assert_eq!(3, notes.iter().count());
    }

    #[test]
    fn neighbors_by_pitch() {
        let notes = chord();
        assert_eq!(Some(Note::E4), notes.neighbor(Note::C4, true).map(|h| h.note));
        assert_eq!(Some(Note::E4), notes.neighbor(Note::G4, false).map(|h| h.note));
        assert_eq!(None, notes.neighbor(Note::G4, true).map(|h| h.note));
        assert_eq!(Some(Note::C4), notes.extreme(true).map(|h| h.note));
        assert_eq!(Some(Note::G4), notes.extreme(false).map(|h| h.note));
    }

    #[test]
    fn should_be_empty() {
        let mut notes = chord();
        assert!(!notes.is_empty());
        notes.clear();
        assert!(notes.is_empty());
    }
}
