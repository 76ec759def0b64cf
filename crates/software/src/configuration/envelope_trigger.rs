use num_derive::{FromPrimitive, ToPrimitive};

/// Determines when a voice's envelope (and gate) is retriggered.
#[derive(Debug, Default, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnvelopeTrigger {
    /// Envelope is triggered each time a break ends. That is, the envelope is triggered when a voice starts sounding
    /// from silence, but a sounding voice which is handed a different note (e.g., by voice stealing, note priority, or
    /// the arpeggiator) glides on within the same envelope contour. In other words, legato.
    BreakEnd,
    /// The envelope is triggered each time a voice changes notes, regardless of articulation.
    #[default]
    NoteChange,
}
impl super::CycleConfig for EnvelopeTrigger {}

impl EnvelopeTrigger {
    /// Returns `true` if a sounding voice should be retriggered when handed a new note.
    pub fn retriggers(&self) -> bool {
        *self == Self::NoteChange
    }
}
