//! Provides [`MidiDecoder`], a stateful byte-stream parser.

use super::{MidiEvent, MidiEventKind, SysExPayload};
use wmidi::MidiMessage;

/// Turns a raw MIDI byte stream into [`MidiEvent`]s.
///
/// The decoder keeps running status and any partially received message between calls, so input may be fragmented
/// arbitrarily: splitting a stream at any boundary yields exactly the events the unsplit stream would. System real-time
/// bytes are single-byte messages which may legally appear in the middle of another message; they are spliced out
/// without disturbing the message being assembled.
///
/// Malformed input (data bytes without a status, undefined status bytes, messages interrupted before completion,
/// over-long System Exclusive messages) is discarded and counted, never fatal.
#[derive(Clone, Debug, Default)]
pub struct MidiDecoder {
    /// Status of the message being assembled; for channel messages this doubles as running status.
    status: Option<u8>,
    /// Data bytes collected so far for `status`.
    data: [u8; 2],
    len: usize,
    sysex: SysExState,
    /// Malformed occurrences since the last call to [`Self::take_malformed`].
    malformed: u32,
}

#[derive(Clone, Debug, Default)]
enum SysExState {
    #[default]
    Inactive,
    Receiving(SysExPayload),
    /// Receiving, but the payload outgrew [`SYSEX_CAPACITY`](super::SYSEX_CAPACITY); the message will be discarded.
    Overflowed,
}

/// Number of data bytes that follow a given status byte, or `None` for undefined statuses and those handled
/// elsewhere (System Exclusive and real-time).
fn data_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(2),
        0xC0..=0xDF => Some(1),
        0xF1 | 0xF3 => Some(1),
        0xF2 => Some(2),
        0xF6 => Some(0),
        _ => None,
    }
}

impl MidiDecoder {
    /// Constructs a decoder with no running status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a chunk of bytes lazily.
    ///
    /// The returned iterator consumes bytes only as events are pulled from it; if it is dropped early, the unconsumed
    /// bytes (see [`Decode::remainder`]) can be fed again later and decoding resumes exactly where it left off.
    pub fn feed<'d, 'b>(&'d mut self, bytes: &'b [u8], tick: u32) -> Decode<'d, 'b> {
        Decode {
            decoder: self,
            bytes,
            tick,
        }
    }

    /// Decodes a single byte, returning an event if the byte completed one.
    pub fn push(&mut self, byte: u8, tick: u32) -> Option<MidiEvent> {
        let kind = match byte {
            0xF8..=0xFF => self.realtime(byte),
            0x80..=0xF7 => self.status_byte(byte),
            _ => self.data_byte(byte),
        }?;
        Some(MidiEvent { kind, tick })
    }

    /// Returns and resets the number of malformed occurrences seen since the previous call.
    pub fn take_malformed(&mut self) -> u32 {
        core::mem::take(&mut self.malformed)
    }

    /// Forgets running status and any partial message, e.g., after a transport reconnects.
    pub fn reset(&mut self) {
        let malformed = self.malformed;
        *self = Self {
            malformed,
            ..Self::default()
        };
    }

    fn malformed(&mut self, reason: &'static str) {
        debug!("Discarding malformed MIDI: {}", reason);
        self.malformed = self.malformed.saturating_add(1);
    }

    fn realtime(&mut self, byte: u8) -> Option<MidiEventKind> {
        match byte {
            0xF8 => Some(MidiEventKind::Clock),
            0xFA => Some(MidiEventKind::Start),
            0xFB => Some(MidiEventKind::Continue),
            0xFC => Some(MidiEventKind::Stop),
            // active sensing and system reset carry nothing the device acts upon
            0xFE | 0xFF => None,
            _ => {
                self.malformed("undefined real-time status");
                None
            }
        }
    }

    fn status_byte(&mut self, byte: u8) -> Option<MidiEventKind> {
        match core::mem::take(&mut self.sysex) {
            SysExState::Inactive => {}
            SysExState::Receiving(payload) if byte == 0xF7 => {
                return Some(MidiEventKind::SysEx(payload));
            }
            SysExState::Overflowed if byte == 0xF7 => {
                self.malformed("System Exclusive message too long");
                return None;
            }
            // any other status terminates System Exclusive; the status itself is then processed normally
            SysExState::Receiving(_) | SysExState::Overflowed => {
                self.malformed("unterminated System Exclusive message");
            }
        }

        let interrupted = self.len > 0;
        if interrupted {
            self.malformed("message interrupted by a new status byte");
        }
        self.len = 0;

        match byte {
            0xF0 => {
                self.status = None;
                self.sysex = SysExState::Receiving(SysExPayload::new());
                None
            }
            0xF7 => {
                self.status = None;
                // one occurrence, already counted if it cut a message short
                if !interrupted {
                    self.malformed("end of System Exclusive without a start");
                }
                None
            }
            _ => match data_len(byte) {
                Some(0) => {
                    // tune request: complete in itself, and like all system common messages it cancels running status
                    self.status = None;
                    None
                }
                Some(_) => {
                    self.status = Some(byte);
                    None
                }
                None => {
                    self.status = None;
                    self.malformed("undefined status");
                    None
                }
            },
        }
    }

    fn data_byte(&mut self, byte: u8) -> Option<MidiEventKind> {
        match &mut self.sysex {
            SysExState::Receiving(payload) => {
                if payload.try_push(byte).is_some() {
                    self.sysex = SysExState::Overflowed;
                }
                return None;
            }
            SysExState::Overflowed => return None,
            SysExState::Inactive => {}
        }

        let Some(status) = self.status else {
            self.malformed("data byte without status");
            return None;
        };
        let Some(expected) = data_len(status) else {
            // unreachable in practice: only statuses with a known length are ever stored
            self.status = None;
            self.malformed("undefined status");
            return None;
        };

        self.data[self.len] = byte;
        self.len += 1;
        if self.len < expected {
            return None;
        }

        self.len = 0;
        let bytes = [status, self.data[0], self.data[1]];
        if status >= 0xF0 {
            // system common messages don't establish running status
            self.status = None;
        }

        match MidiMessage::from_bytes(&bytes[..=expected]) {
            Ok(msg) => MidiEventKind::from_message(&msg),
            Err(_) => {
                self.malformed("unparseable message");
                None
            }
        }
    }
}

/// Lazy sequence of events decoded from one chunk of bytes; see [`MidiDecoder::feed`].
pub struct Decode<'d, 'b> {
    decoder: &'d mut MidiDecoder,
    bytes: &'b [u8],
    tick: u32,
}

impl<'b> Decode<'_, 'b> {
    /// Bytes not yet consumed.
    pub fn remainder(&self) -> &'b [u8] {
        self.bytes
    }
}

impl Iterator for Decode<'_, '_> {
    type Item = MidiEvent;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((&byte, rest)) = self.bytes.split_first() {
            self.bytes = rest;
            if let Some(event) = self.decoder.push(byte, self.tick) {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;
    use wmidi::{Channel, ControlFunction, Note, U7, U14};

    fn on(note: Note, velocity: u8, channel: Channel) -> MidiEventKind {
        MidiEventKind::NoteOn {
            note,
            velocity: U7::from_u8_lossy(velocity),
            channel,
        }
    }

    fn off(note: Note, channel: Channel) -> MidiEventKind {
        MidiEventKind::NoteOff { note, channel }
    }

    fn decode_all(decoder: &mut MidiDecoder, bytes: &[u8]) -> Vec<MidiEventKind> {
        decoder.feed(bytes, 0).map(|event| event.kind).collect()
    }

    /// A stream exercising running status, real-time interleaving, system common messages and SysEx.
    const STREAM: &[u8] = &[
        0x90, 60, 100, // NoteOn C4
        64, 80, // running status NoteOn E4
        0xF8, // clock between messages
        0xB1, 5, 0xF8, 20, // CC5 on channel 2, interrupted by a clock
        0xE0, 0x00, 0x40, // pitch bend centered
        0xF2, 0x01, 0x02, // song position pointer, ignored, cancels running status
        0xF0, 0x7D, 0x01, 0x02, 0xF7, // SysEx
        0x80, 60, 0, // NoteOff C4
        0x90, 64, 0, // NoteOn with zero velocity
        0xFA, 0xFB, 0xFC, // start, continue, stop
    ];

    fn expected_stream() -> Vec<MidiEventKind> {
        let mut payload = SysExPayload::new();
        payload.extend_from_slice(&[0x7D, 0x01, 0x02]);
        std::vec![
            on(Note::C4, 100, Channel::Ch1),
            on(Note::E4, 80, Channel::Ch1),
            MidiEventKind::Clock,
            MidiEventKind::Clock,
            MidiEventKind::ControlChange {
                controller: ControlFunction::PORTAMENTO_TIME,
                value: U7::from_u8_lossy(20),
                channel: Channel::Ch2,
            },
            MidiEventKind::PitchBend {
                value: U14::try_from(0x2000).unwrap(),
                channel: Channel::Ch1,
            },
            MidiEventKind::SysEx(payload),
            off(Note::C4, Channel::Ch1),
            off(Note::E4, Channel::Ch1),
            MidiEventKind::Start,
            MidiEventKind::Continue,
            MidiEventKind::Stop,
        ]
    }

    #[test]
    fn decodes_stream() {
        let mut decoder = MidiDecoder::new();
        assert_eq!(
            expected_stream(),
            decode_all(&mut decoder, STREAM),
            "Expected left but got right"
        );
        assert_eq!(0, decoder.take_malformed(), "Stream should be well-formed");
    }

    #[test]
    fn chunk_boundary_invariance() {
        let expected = expected_stream();
        for chunk_size in 1..=STREAM.len() {
            let mut decoder = MidiDecoder::new();
            let actual: Vec<_> = STREAM
                .chunks(chunk_size)
                .flat_map(|chunk| decode_all(&mut decoder, chunk))
                .collect();
            assert_eq!(expected, actual, "Chunk size {chunk_size} changed the result");
        }

        // and an irregular split, every possible single cut point
        for cut in 0..=STREAM.len() {
            let mut decoder = MidiDecoder::new();
            let (head, tail) = STREAM.split_at(cut);
            let mut actual = decode_all(&mut decoder, head);
            actual.extend(decode_all(&mut decoder, tail));
            assert_eq!(expected, actual, "Cut at {cut} changed the result");
        }
    }

    #[test]
    fn feed_is_lazy_and_restartable() {
        let mut decoder = MidiDecoder::new();
        let bytes = [0x90, 60, 100, 0x90, 62, 100];

        let mut decode = decoder.feed(&bytes, 7);
        let first = decode.next();
        let rest = decode.remainder();
        assert_eq!(
            Some(MidiEvent {
                kind: on(Note::C4, 100, Channel::Ch1),
                tick: 7
            }),
            first
        );
        assert_eq!(&[0x90_u8, 62, 100][..], rest, "Only the first message should be consumed");

        let second: Vec<_> = decoder.feed(rest, 8).collect();
        assert_eq!(
            std::vec![MidiEvent {
                kind: on(Note::D4, 100, Channel::Ch1),
                tick: 8
            }],
            second
        );
    }

    #[test]
    fn data_without_status_is_malformed() {
        let mut decoder = MidiDecoder::new();
        assert!(decode_all(&mut decoder, &[60, 100]).is_empty());
        assert_eq!(2, decoder.take_malformed());
        assert_eq!(0, decoder.take_malformed(), "Count should reset once taken");
    }

    #[test]
    fn interrupted_message_is_dropped_and_next_decoded() {
        let mut decoder = MidiDecoder::new();
        let events = decode_all(&mut decoder, &[0x90, 60, 0x80, 60, 0]);
        assert_eq!(std::vec![off(Note::C4, Channel::Ch1)], events);
        assert_eq!(1, decoder.take_malformed());
    }

    #[test]
    fn stray_sysex_end_is_counted_once() {
        let mut decoder = MidiDecoder::new();
        assert!(decode_all(&mut decoder, &[0x90, 60, 0xF7]).is_empty());
        assert_eq!(1, decoder.take_malformed(), "Expected left but got right");

        assert!(decode_all(&mut decoder, &[0xF7]).is_empty());
        assert_eq!(1, decoder.take_malformed());
        assert!(decode_all(&mut decoder, &[60, 1]).is_empty(), "Running status should be gone");
    }

    #[test]
    fn undefined_status_is_malformed() {
        let mut decoder = MidiDecoder::new();
        let events = decode_all(&mut decoder, &[0xF4, 1, 0xFD, 0x90, 60, 1]);
        assert_eq!(std::vec![on(Note::C4, 1, Channel::Ch1)], events);
        // 0xF4, the orphaned data byte, and 0xFD
        assert_eq!(3, decoder.take_malformed());
    }

    #[test]
    fn realtime_does_not_disturb_partial_message() {
        let mut decoder = MidiDecoder::new();
        let events = decode_all(&mut decoder, &[0x91, 0xF8, 67, 0xFE, 0xF8, 90]);
        assert_eq!(
            std::vec![
                MidiEventKind::Clock,
                MidiEventKind::Clock,
                on(Note::G4, 90, Channel::Ch2)
            ],
            events
        );
        assert_eq!(0, decoder.take_malformed());
    }

    #[test]
    fn oversized_sysex_is_discarded() {
        let mut decoder = MidiDecoder::new();
        let mut bytes: Vec<u8> = std::vec![0xF0];
        bytes.extend(core::iter::repeat_n(0x11, super::super::SYSEX_CAPACITY + 1));
        bytes.extend([0xF7, 0x90, 60, 1]);

        let events = decode_all(&mut decoder, &bytes);
        assert_eq!(std::vec![on(Note::C4, 1, Channel::Ch1)], events);
        assert_eq!(1, decoder.take_malformed());
    }

    #[test]
    fn unterminated_sysex_yields_to_next_status() {
        let mut decoder = MidiDecoder::new();
        let events = decode_all(&mut decoder, &[0xF0, 0x01, 0x02, 0x90, 60, 1]);
        assert_eq!(std::vec![on(Note::C4, 1, Channel::Ch1)], events);
        assert_eq!(1, decoder.take_malformed());
    }

    #[test]
    fn reset_forgets_running_status() {
        let mut decoder = MidiDecoder::new();
        let _ = decode_all(&mut decoder, &[0x90, 60, 1]);
        decoder.reset();
        assert!(decode_all(&mut decoder, &[62, 1]).is_empty());
        assert_eq!(2, decoder.take_malformed());
    }
}
