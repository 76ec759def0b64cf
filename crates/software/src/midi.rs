//! Everything between raw transport bytes and the events the rest of the device acts upon.
//!
//! Because not all MIDI messages have an obvious immediate expression and because bytes from two transports (USB and
//! UART) arrive with arbitrary fragmentation, decoding is kept separate from interpretation: the [`MidiDecoder`] turns
//! bytes into [`MidiEvent`]s and knows nothing about voices or outputs.

mod decoder;
pub use decoder::*;

mod event;
pub use event::*;

pub mod usb;
