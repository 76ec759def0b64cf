//! Traits for the hardware the control path talks to: the DAC and gate pins on one side and the outbound MIDI
//! transport on the other.
//!
//! Both are called from within the tick, so implementations must not block. Anything slow (e.g., waiting on a USB
//! endpoint) belongs on the far side of a queue.

use crate::{midi::usb::UsbMidiPacket, voice::GateState};

/// A trait for expressing voices as control voltages and gates.
pub trait CvGateDriver {
    /// Number of physical output channels.
    fn channels(&self) -> usize;

    /// Sets a channel's pitch DAC to `code` and its gate to `gate`. Called once per channel per tick.
    fn write(&mut self, channel: usize, code: u16, gate: GateState);

    /// Sets a channel's auxiliary (e.g., VCA or filter) DAC to `code`. Boards without one can ignore it.
    fn write_modulation(&mut self, channel: usize, code: u16) {
        let _ = (channel, code);
    }
}

/// A trait for sending MIDI out of the device.
pub trait MidiSink {
    /// Hands a packet to the transport. Returns `false` if it couldn't be accepted, in which case it is lost.
    fn send_midi_packet(&mut self, packet: UsbMidiPacket) -> bool;
}

/// A sink which discards everything, for boards without an outbound transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn send_midi_packet(&mut self, _packet: UsbMidiPacket) -> bool {
        true
    }
}
