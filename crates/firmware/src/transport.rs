//! Tasks which move bytes between the outside world and the control path.
//!
//! Inbound bytes from both transports land in [`ByteQueue`]s which the tick drains; outbound packets wait in
//! [`OUTBOUND`] until the USB endpoint takes them.

use defmt::{panic, *};
use embassy_stm32::{mode::Async, peripherals, usart::UartRx, usb};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
use embassy_usb::{
    UsbDevice,
    class::midi::{Receiver, Sender},
    driver::EndpointError,
};
use polycv_lib::{
    io::MidiSink,
    midi::usb::{UsbMidiPacket, packets},
    queue::Producer,
};

pub type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// Capacity of each inbound byte ring.
pub const INBOUND_LEN: usize = 512;

const OUTBOUND_LEN: usize = 32;

/// Packets waiting to be written to the USB IN endpoint.
pub static OUTBOUND: Channel<CriticalSectionRawMutex, UsbMidiPacket, OUTBOUND_LEN> = Channel::new();

/// Raised when the USB host (re)connects, so that the tick can forget any half-received message.
pub static USB_CONNECTED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// The control path's view of [`OUTBOUND`]. Never waits: a full channel drops the packet.
pub struct OutboundSink;

impl MidiSink for OutboundSink {
    fn send_midi_packet(&mut self, packet: UsbMidiPacket) -> bool {
        OUTBOUND.try_send(packet).is_ok()
    }
}

#[embassy_executor::task]
pub async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

/// Unpacks USB-MIDI packets into the USB byte ring.
#[embassy_executor::task]
pub async fn usb_midi_in_task(
    mut receiver: Receiver<'static, UsbDriver>,
    mut queue: Producer<'static, INBOUND_LEN>,
) -> ! {
    loop {
        receiver.wait_connection().await;
        info!("USB connected");
        USB_CONNECTED.signal(());
        let _ = read_packets(&mut receiver, &mut queue).await;
        info!("USB disconnected");
    }
}

async fn read_packets(
    receiver: &mut Receiver<'static, UsbDriver>,
    queue: &mut Producer<'static, INBOUND_LEN>,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        for packet in packets(&buf[..n]) {
            queue.push_slice(packet.payload());
        }
    }
}

/// Writes queued packets to the USB IN endpoint. Packets queued while disconnected are discarded.
#[embassy_executor::task]
pub async fn usb_midi_out_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    loop {
        sender.wait_connection().await;
        OUTBOUND.clear();
        let _ = write_packets(&mut sender).await;
    }
}

async fn write_packets(sender: &mut Sender<'static, UsbDriver>) -> Result<(), Disconnected> {
    loop {
        let packet = OUTBOUND.receive().await;
        sender.write_packet(&packet.0).await?;
    }
}

/// Copies bytes from the 5-pin DIN input into the UART byte ring.
#[embassy_executor::task]
pub async fn uart_midi_in_task(
    mut uart: UartRx<'static, Async>,
    mut queue: Producer<'static, INBOUND_LEN>,
) -> ! {
    let mut buf = [0; 32];
    loop {
        match uart.read_until_idle(&mut buf).await {
            Ok(n) => queue.push_slice(&buf[..n]),
            // framing and overrun errors lose the bytes in flight; the decoder resynchronizes on the next status byte
            Err(e) => warn!("UART error: {}", e),
        }
    }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}
