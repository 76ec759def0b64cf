use num_derive::{FromPrimitive, ToPrimitive};

/// Determines how held notes are assigned to voices.
#[derive(Debug, Default, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AllocationPolicy {
    /// Each NoteOn takes the next free voice in round-robin order. When every voice is sounding, the one assigned
    /// longest ago is stolen (if stealing is enabled).
    #[default]
    Direct,
    /// The voices sound the best-ranked held notes according to the configured
    /// [`NotePriority`](super::NotePriority). Released voices are handed back to notes which are held but not sounding.
    Priority,
    /// Held notes are played one at a time on the first voice, lowest to highest.
    ArpeggiatorUp,
    /// Held notes are played one at a time on the first voice, highest to lowest.
    ArpeggiatorDown,
    /// Held notes are played one at a time on the first voice, up then down, without repeating the end notes.
    ArpeggiatorUpDown,
}
impl super::CycleConfig for AllocationPolicy {}

/// Order in which the arpeggiator walks the held notes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArpDirection {
    /// Ascending pitch.
    Up,
    /// Descending pitch.
    Down,
    /// Ascending, then descending.
    UpDown,
}

impl AllocationPolicy {
    /// Returns the arpeggiator pattern for arpeggiator policies, `None` otherwise.
    pub fn arp_direction(&self) -> Option<ArpDirection> {
        match self {
            Self::ArpeggiatorUp => Some(ArpDirection::Up),
            Self::ArpeggiatorDown => Some(ArpDirection::Down),
            Self::ArpeggiatorUpDown => Some(ArpDirection::UpDown),
            Self::Direct | Self::Priority => None,
        }
    }
}

/// What advances the arpeggiator by one step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArpClock {
    /// Step every `ticks_per_step` control ticks.
    Internal {
        /// Clock division, in ticks.
        ticks_per_step: u32,
    },
    /// Step every `clocks_per_step` MIDI Timing Clock messages (24 per quarter note).
    Midi {
        /// Clock division, in MIDI clocks.
        clocks_per_step: u32,
    },
}

impl Default for ArpClock {
    /// Sixteenth notes at 120 BPM with a 1 ms tick.
    fn default() -> Self {
        Self::Internal {
            ticks_per_step: 125,
        }
    }
}

impl ArpClock {
    /// The clock division, whatever its unit.
    pub fn division(&self) -> u32 {
        match *self {
            Self::Internal { ticks_per_step } => ticks_per_step,
            Self::Midi { clocks_per_step } => clocks_per_step,
        }
    }
}
