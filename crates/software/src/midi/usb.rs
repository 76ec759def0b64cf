//! USB-MIDI 1.0 event packets.
//!
//! Each packet is four bytes: a header holding the cable number and Code Index Number (CIN), followed by up to three
//! MIDI bytes. The CIN says how many of those three bytes are meaningful, so unpacking a packet yields a plain MIDI byte
//! stream that can be fed to a [`MidiDecoder`](super::MidiDecoder) just like bytes from the UART.

/// One USB-MIDI event packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbMidiPacket(pub [u8; 4]);

/// Size in bytes of a USB-MIDI event packet.
pub const PACKET_SIZE: usize = 4;

impl UsbMidiPacket {
    /// Virtual cable number, 0 to 15.
    pub fn cable(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Code Index Number.
    pub fn code_index(&self) -> u8 {
        self.0[0] & 0x0F
    }

    /// The MIDI bytes carried by the packet. Empty for reserved CINs.
    pub fn payload(&self) -> &[u8] {
        let len = match self.code_index() {
            // reserved for future extension
            0x0 | 0x1 => 0,
            0x5 | 0xF => 1,
            0x2 | 0x6 | 0xC | 0xD => 2,
            _ => 3,
        };
        &self.0[1..=len]
    }

    fn new(cable: u8, code_index: u8, bytes: &[u8]) -> Self {
        let mut packet = [(cable & 0x0F) << 4 | code_index, 0, 0, 0];
        packet[1..=bytes.len()].copy_from_slice(bytes);
        Self(packet)
    }
}

/// Splits buffers read from a USB-MIDI endpoint into packets; a trailing partial packet is ignored.
pub fn packets(buffer: &[u8]) -> impl Iterator<Item = UsbMidiPacket> + '_ {
    buffer.chunks_exact(PACKET_SIZE).map(|chunk| {
        let mut packet = [0; PACKET_SIZE];
        packet.copy_from_slice(chunk);
        UsbMidiPacket(packet)
    })
}

/// Frames one complete MIDI message as USB-MIDI packets.
///
/// System Exclusive messages (`0xF0` through `0xF7`) span as many packets as needed; any other message fits in one.
/// Bytes without a leading status byte are framed as the continuation of a System Exclusive message.
pub fn frame(cable: u8, message: &[u8]) -> Framer<'_> {
    Framer {
        cable,
        remaining: message,
    }
}

/// Iterator returned by [`frame`].
#[derive(Clone, Debug)]
pub struct Framer<'a> {
    cable: u8,
    remaining: &'a [u8],
}

impl Iterator for Framer<'_> {
    type Item = UsbMidiPacket;

    fn next(&mut self) -> Option<Self::Item> {
        let (&first, _) = self.remaining.split_first()?;
        let in_sysex = first == 0xF0 || first < 0x80;

        let (len, code_index) = if in_sysex {
            match self.remaining.iter().take(3).position(|&b| b == 0xF7) {
                Some(end) => (end + 1, 0x5 + end as u8),
                None if self.remaining.len() >= 3 => (3, 0x4),
                // truncated SysEx; flush what's left as an end-of-SysEx packet
                None => (self.remaining.len(), 0x5 + self.remaining.len() as u8 - 1),
            }
        } else {
            let len = match first {
                0x80..=0xBF | 0xE0..=0xEF | 0xF2 => 3,
                0xC0..=0xDF | 0xF1 | 0xF3 => 2,
                _ => 1,
            };
            let code_index = match first {
                0x80..=0xEF => first >> 4,
                0xF1 | 0xF3 => 0x2,
                0xF2 => 0x3,
                0xF6 | 0xF7 => 0x5,
                _ => 0xF,
            };
            (len.min(self.remaining.len()), code_index)
        };

        let (bytes, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Some(UsbMidiPacket::new(self.cable, code_index, bytes))
    }
}
