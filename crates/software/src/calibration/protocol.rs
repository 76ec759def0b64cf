//! Bench recalibration over System Exclusive.
//!
//! A calibration rig measures each channel's output, writes the measurements one entry at a time, and then commits
//! them, at which point the staged table is validated and published. Every command is answered.
//!
//! All messages use the non-commercial manufacturer ID `0x7D`. Payloads (between `0xF0` and `0xF7`):
//!
//! | Message | Bytes |
//! |---|---|
//! | Write entry | `7D 01 channel index input[5] code[3]` |
//! | Commit | `7D 02 channel` |
//! | Clear | `7D 03 channel` |
//! | Ack | `7D 7F command channel` |
//! | Nak | `7D 7E command channel reason` |
//!
//! Multi-byte values are sent most significant group first, seven bits per byte; `input` is the two's complement
//! bit pattern of the microvolt value.

use super::{CalibrationBank, CalibrationEntry, MAX_CHANNELS, MAX_ENTRIES};
use crate::{error::CalibrationFault, midi::SysExPayload};
use tinyvec::ArrayVec;

/// MIDI manufacturer ID reserved for non-commercial use.
pub const MANUFACTURER_ID: u8 = 0x7D;

const WRITE_ENTRY: u8 = 0x01;
const COMMIT: u8 = 0x02;
const CLEAR: u8 = 0x03;
const ACK: u8 = 0x7F;
const NAK: u8 = 0x7E;

const INPUT_GROUPS: usize = 5;
const CODE_GROUPS: usize = 3;

/// A request from the calibration rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Stage one entry of a channel's table. `index` must either replace a staged entry or append to them.
    WriteEntry {
        /// Output channel.
        channel: u8,
        /// Position within the table.
        index: u8,
        /// The measurement.
        entry: CalibrationEntry,
    },
    /// Validate and publish the staged entries for a channel.
    Commit {
        /// Output channel.
        channel: u8,
    },
    /// Discard the staged entries for a channel.
    Clear {
        /// Output channel.
        channel: u8,
    },
}

impl Command {
    /// Parses a SysEx payload. `None` if it isn't a well-formed command.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [MANUFACTURER_ID, WRITE_ENTRY, channel, index, rest @ ..]
                if rest.len() == INPUT_GROUPS + CODE_GROUPS =>
            {
                let (input, code) = rest.split_at(INPUT_GROUPS);
                Some(Self::WriteEntry {
                    channel: *channel,
                    index: *index,
                    entry: CalibrationEntry {
                        input: unpack(input) as i32,
                        code: u16::try_from(unpack(code)).ok()?,
                    },
                })
            }
            [MANUFACTURER_ID, COMMIT, channel] => Some(Self::Commit { channel: *channel }),
            [MANUFACTURER_ID, CLEAR, channel] => Some(Self::Clear { channel: *channel }),
            _ => None,
        }
    }

    /// The SysEx payload for this command.
    pub fn to_payload(&self) -> SysExPayload {
        let mut payload = SysExPayload::new();
        payload.push(MANUFACTURER_ID);
        match *self {
            Self::WriteEntry {
                channel,
                index,
                entry,
            } => {
                payload.extend_from_slice(&[WRITE_ENTRY, channel & 0x7F, index & 0x7F]);
                payload.extend_from_slice(&pack::<INPUT_GROUPS>(entry.input as u32));
                payload.extend_from_slice(&pack::<CODE_GROUPS>(u32::from(entry.code)));
            }
            Self::Commit { channel } => payload.extend_from_slice(&[COMMIT, channel & 0x7F]),
            Self::Clear { channel } => payload.extend_from_slice(&[CLEAR, channel & 0x7F]),
        }
        payload
    }

    fn id(&self) -> u8 {
        match self {
            Self::WriteEntry { .. } => WRITE_ENTRY,
            Self::Commit { .. } => COMMIT,
            Self::Clear { .. } => CLEAR,
        }
    }

    fn channel(&self) -> u8 {
        match *self {
            Self::WriteEntry { channel, .. } | Self::Commit { channel } | Self::Clear { channel } => channel,
        }
    }
}

fn unpack(groups: &[u8]) -> u32 {
    groups
        .iter()
        .fold(0_u32, |value, &group| value << 7 | u32::from(group & 0x7F))
}

fn pack<const N: usize>(value: u32) -> [u8; N] {
    let mut groups = [0; N];
    for (i, group) in groups.iter_mut().enumerate() {
        let shift = 7 * (N - 1 - i);
        *group = value.checked_shr(shift as u32).unwrap_or(0) as u8 & 0x7F;
    }
    groups
}

/// Why a command was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NakReason {
    /// The payload carried our manufacturer ID but wasn't a command.
    Malformed,
    /// An entry was written past the end of the staged entries.
    IndexOutOfOrder,
    /// The table (or the channel) was rejected.
    Fault(CalibrationFault),
}

impl NakReason {
    fn code(&self) -> u8 {
        match self {
            Self::Malformed => 0x20,
            Self::IndexOutOfOrder => 0x21,
            Self::Fault(fault) => match fault {
                CalibrationFault::Empty => 0x01,
                CalibrationFault::TooManyEntries => 0x02,
                CalibrationFault::NonMonotonicInput { .. } => 0x03,
                CalibrationFault::NonMonotonicCode { .. } => 0x04,
                CalibrationFault::NoSuchChannel => 0x05,
                CalibrationFault::WriterBusy => 0x06,
                CalibrationFault::BadMagic => 0x07,
                CalibrationFault::UnsupportedVersion => 0x08,
                CalibrationFault::Truncated => 0x09,
                CalibrationFault::ChecksumMismatch => 0x0A,
            },
        }
    }
}

/// The device's answer to a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// The command was carried out.
    Ack {
        /// Which command.
        command: u8,
        /// Which channel.
        channel: u8,
    },
    /// The command was refused; nothing changed.
    Nak {
        /// Which command.
        command: u8,
        /// Which channel.
        channel: u8,
        /// Why.
        reason: NakReason,
    },
}

impl Reply {
    /// The complete SysEx message, `0xF0` through `0xF7`.
    pub fn to_sysex(&self) -> ArrayVec<[u8; 8]> {
        let mut message = ArrayVec::new();
        message.extend_from_slice(&[0xF0, MANUFACTURER_ID]);
        match *self {
            Self::Ack { command, channel } => {
                message.extend_from_slice(&[ACK, command & 0x7F, channel & 0x7F])
            }
            Self::Nak {
                command,
                channel,
                reason,
            } => message.extend_from_slice(&[NAK, command & 0x7F, channel & 0x7F, reason.code()]),
        }
        message.push(0xF7);
        message
    }
}

/// Entries written but not yet committed, per channel.
#[derive(Clone, Debug, Default)]
pub struct Recalibration {
    staged: [ArrayVec<[CalibrationEntry; MAX_ENTRIES]>; MAX_CHANNELS],
}

impl Recalibration {
    /// Constructs a session with nothing staged.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entries staged for `channel`.
    pub fn staged(&self, channel: usize) -> &[CalibrationEntry] {
        match self.staged.get(channel) {
            Some(staged) => staged,
            None => &[],
        }
    }

    /// Handles a SysEx payload, returning the reply to send, or `None` if the message is meant for someone else.
    pub fn handle_sysex(&mut self, payload: &[u8], bank: &CalibrationBank) -> Option<Reply> {
        if payload.first() != Some(&MANUFACTURER_ID) {
            return None;
        }
        let Some(command) = Command::parse(payload) else {
            warn!("Malformed recalibration message");
            return Some(Reply::Nak {
                command: payload.get(1).copied().unwrap_or(0),
                channel: payload.get(2).copied().unwrap_or(0),
                reason: NakReason::Malformed,
            });
        };
        Some(self.handle(command, bank))
    }

    /// Carries out a command.
    pub fn handle(&mut self, command: Command, bank: &CalibrationBank) -> Reply {
        let (id, channel) = (command.id(), command.channel());
        match self.apply(command, bank) {
            Ok(()) => Reply::Ack {
                command: id,
                channel,
            },
            Err(reason) => Reply::Nak {
                command: id,
                channel,
                reason,
            },
        }
    }

    fn apply(&mut self, command: Command, bank: &CalibrationBank) -> Result<(), NakReason> {
        let channel = usize::from(command.channel());
        if channel >= bank.channels() {
            return Err(NakReason::Fault(CalibrationFault::NoSuchChannel));
        }
        let staged = &mut self.staged[channel];

        match command {
            Command::WriteEntry { index, entry, .. } => {
                let index = usize::from(index);
                if let Some(existing) = staged.get_mut(index) {
                    *existing = entry;
                } else if index == staged.len() {
                    if staged.try_push(entry).is_some() {
                        return Err(NakReason::Fault(CalibrationFault::TooManyEntries));
                    }
                } else {
                    return Err(NakReason::IndexOutOfOrder);
                }
                Ok(())
            }
            Command::Commit { .. } => {
                bank.load(channel, staged).map_err(NakReason::Fault)?;
                staged.clear();
                Ok(())
            }
            Command::Clear { .. } => {
                staged.clear();
                Ok(())
            }
        }
    }
}
