//! Provides [`MidiEvent`], the decoded and timestamped unit of MIDI input.

use tinyvec::ArrayVec;
use wmidi::{Channel, ControlFunction, ControlValue, MidiMessage, Note, U14, Velocity};

/// Maximum number of data bytes retained from a System Exclusive message. Longer messages are discarded.
pub const SYSEX_CAPACITY: usize = 16;

/// Data bytes of a System Exclusive message, excluding the leading `0xF0` and trailing `0xF7`.
pub type SysExPayload = ArrayVec<[u8; SYSEX_CAPACITY]>;

/// A decoded MIDI message together with the tick during which it was decoded.
///
/// Events are immutable once decoded and are consumed exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// What happened.
    pub kind: MidiEventKind,
    /// The tick count at arrival.
    pub tick: u32,
}

/// The messages the device acts upon. Everything else is consumed silently by the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiEventKind {
    /// A key was struck. Never carries a velocity of zero; those are decoded as [`MidiEventKind::NoteOff`].
    NoteOn {
        /// Which key.
        note: Note,
        /// How hard.
        velocity: Velocity,
        /// Which MIDI channel.
        channel: Channel,
    },
    /// A key was released.
    NoteOff {
        /// Which key.
        note: Note,
        /// Which MIDI channel.
        channel: Channel,
    },
    /// A controller moved.
    ControlChange {
        /// Which controller.
        controller: ControlFunction,
        /// Its new value.
        value: ControlValue,
        /// Which MIDI channel.
        channel: Channel,
    },
    /// The pitch wheel moved; `0x2000` is centered.
    PitchBend {
        /// 14-bit wheel position.
        value: U14,
        /// Which MIDI channel.
        channel: Channel,
    },
    /// Timing clock, 24 per quarter note.
    Clock,
    /// Start the sequence from the beginning.
    Start,
    /// Resume the sequence.
    Continue,
    /// Stop the sequence.
    Stop,
    /// A complete System Exclusive message.
    SysEx(SysExPayload),
}

impl MidiEventKind {
    /// Interprets a parsed [`MidiMessage`], returning `None` for messages the device doesn't act upon.
    pub fn from_message(msg: &MidiMessage<'_>) -> Option<Self> {
        match *msg {
            MidiMessage::NoteOn(channel, note, velocity) if u8::from(velocity) == 0 => {
                Some(Self::NoteOff { note, channel })
            }
            MidiMessage::NoteOn(channel, note, velocity) => Some(Self::NoteOn {
                note,
                velocity,
                channel,
            }),
            MidiMessage::NoteOff(channel, note, _) => Some(Self::NoteOff { note, channel }),
            MidiMessage::ControlChange(channel, controller, value) => Some(Self::ControlChange {
                controller,
                value,
                channel,
            }),
            MidiMessage::PitchBendChange(channel, value) => Some(Self::PitchBend { value, channel }),
            MidiMessage::TimingClock => Some(Self::Clock),
            MidiMessage::Start => Some(Self::Start),
            MidiMessage::Continue => Some(Self::Continue),
            MidiMessage::Stop => Some(Self::Stop),
            _ => None,
        }
    }

    /// The MIDI channel of channel voice messages.
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// The wire status byte of a system real-time message.
    pub fn realtime_status(&self) -> Option<u8> {
        match self {
            Self::Clock => Some(0xF8),
            Self::Start => Some(0xFA),
            Self::Continue => Some(0xFB),
            Self::Stop => Some(0xFC),
            _ => None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MidiEvent {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "MidiEvent {{ tick: {}, kind: ", self.tick);
        match self.kind {
            MidiEventKind::NoteOn {
                note,
                velocity,
                channel,
            } => defmt::write!(
                fmt,
                "NoteOn {{ note: {} ({}), velocity: {}, channel: {} }}",
                note.to_str(),
                u8::from(note),
                u8::from(velocity),
                channel.number()
            ),
            MidiEventKind::NoteOff { note, channel } => defmt::write!(
                fmt,
                "NoteOff {{ note: {} ({}), channel: {} }}",
                note.to_str(),
                u8::from(note),
                channel.number()
            ),
            MidiEventKind::ControlChange {
                controller,
                value,
                channel,
            } => defmt::write!(
                fmt,
                "ControlChange {{ controller: {}, value: {}, channel: {} }}",
                u8::from(controller),
                u8::from(value),
                channel.number()
            ),
            MidiEventKind::PitchBend { value, channel } => defmt::write!(
                fmt,
                "PitchBend {{ value: {}, channel: {} }}",
                u16::from(value),
                channel.number()
            ),
            MidiEventKind::Clock => defmt::write!(fmt, "Clock"),
            MidiEventKind::Start => defmt::write!(fmt, "Start"),
            MidiEventKind::Continue => defmt::write!(fmt, "Continue"),
            MidiEventKind::Stop => defmt::write!(fmt, "Stop"),
            MidiEventKind::SysEx(payload) => {
                defmt::write!(fmt, "SysEx {{ payload: {=[u8]} }}", payload.as_slice())
            }
        }
        defmt::write!(fmt, " }}");
    }
}
