use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::Note;

/// Determines which notes sound when more notes are held than there are voices to sound them.
///
/// When a voiced note is released, its voice is handed to the best-ranked note which is held but silent.
#[derive(Debug, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotePriority {
    /// Prioritizes notes based on the order in which they are received. Notes played earlier will be voiced over later ones.
    First,
    /// Prioritizes notes based on the order in which they are received. Notes played later will be voiced over earlier ones.
    Last,
    /// Prioritizes notes based on pitch. Lower notes (e.g., those on the left side of the keyboard) will be voiced over higher ones.
    Low,
    /// Prioritizes notes based on pitch. Higher notes (e.g., those on the right side of the keyboard) will be voiced over lower ones.
    High,
}
impl super::CycleConfig for NotePriority {}

impl NotePriority {
    /// Returns `true` if note `a`, pressed at sequence number `a_seq`, should be voiced in preference to note `b`.
    ///
    /// Pitch-based priorities break ties (the same note on two channels) in favor of the more recent press.
    pub fn prefers(&self, (a, a_seq): (Note, u32), (b, b_seq): (Note, u32)) -> bool {
        match self {
            Self::First => a_seq < b_seq,
            Self::Last => a_seq > b_seq,
            Self::Low => a < b || (a == b && a_seq > b_seq),
            Self::High => a > b || (a == b && a_seq > b_seq),
        }
    }

    /// Selects the best-ranked of the given notes.
    pub fn select(&self, notes: impl Iterator<Item = (Note, u32)>) -> Option<(Note, u32)> {
        notes.reduce(|best, candidate| {
            if self.prefers(candidate, best) {
                candidate
            } else {
                best
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// E4, G4, B4, then C4
    fn chord() -> [(Note, u32); 4] {
        [(Note::E4, 0), (Note::G4, 1), (Note::B4, 2), (Note::C4, 3)]
    }

    #[test]
    fn first() {
        assert_eq!(
            Some((Note::E4, 0)),
            NotePriority::First.select(chord().into_iter()),
            "Expected left but right"
        );
    }

    #[test]
    fn last() {
        assert_eq!(
            Some((Note::C4, 3)),
            NotePriority::Last.select(chord().into_iter()),
            "Expected left but right"
        );
    }

    #[test]
    fn highest() {
        assert_eq!(
            Some((Note::B4, 2)),
            NotePriority::High.select(chord().into_iter()),
            "Expected left but right"
        );
    }

    #[test]
    fn lowest() {
        assert_eq!(
            Some((Note::C4, 3)),
            NotePriority::Low.select(chord().into_iter()),
            "Expected left but right"
        );
    }

    #[test]
    fn ties_go_to_the_latest_press() {
        assert!(NotePriority::Low.prefers((Note::C4, 5), (Note::C4, 2)));
        assert!(!NotePriority::High.prefers((Note::C4, 2), (Note::C4, 5)));
    }
}
