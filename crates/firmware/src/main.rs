//! polycv is [Embassy](https://embassy.dev)-based firmware for a MIDI-to-CV/gate interface with per-unit pitch
//! calibration. The firmware runs on the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by an F7-series STM32
//! microcontroller.
//!
//! MIDI arrives over USB and over a 5-pin DIN input wired to USART6. Both streams are queued for the control path,
//! which runs at a fixed rate in a high-priority interrupt executor and drives two calibrated pitch CVs (the two DAC
//! channels), two gates, and two PWM envelopes. Everything else (USB housekeeping, the front panel, saving calibration
//! to flash) runs in the thread-mode executor at lower priority.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod board;
mod panel;
mod persistence;
mod transport;

use crate::{
    board::CvGate,
    panel::{CONFIG, ConfigReceiver},
    transport::{INBOUND_LEN, OutboundSink, USB_CONNECTED, UsbDriver},
};
use defmt::*;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::{
    bind_interrupts,
    dac::Dac,
    exti::ExtiInput,
    flash::Flash,
    gpio::{Level, Output, OutputType, Pull, Speed},
    interrupt,
    interrupt::{InterruptExt, Priority},
    peripherals,
    timer::{
        low_level::CountingMode,
        simple_pwm::{PwmPin, SimplePwm, SimplePwmChannels},
    },
    usart::{self, UartRx},
    usb,
};
use embassy_time::{Instant, Ticker, Timer};
use embassy_usb::{Builder, class::midi::MidiClass};
use polycv_lib::{
    calibration::{CalibrationBank, DacRange},
    configuration::DeviceConfig,
    diagnostics::{Diagnostic, Diagnostics},
    queue::{ByteQueue, Consumer},
    scheduler::ControlPath,
};
use static_cell::StaticCell;

#[cfg(feature = "defmt-rtt")]
use defmt_rtt as _;
#[cfg(not(feature = "panic-probe"))]
use panic_halt as _;
#[cfg(feature = "panic-probe")]
use panic_probe as _;

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART6 => usart::InterruptHandler<peripherals::USART6>;
    }
);

/// Index of the USB port in the control path's input ports; UART is 1.
const USB_PORT: usize = 0;

/// Seconds between diagnostic reports.
const REPORT_SECS: u64 = 10;

static USB_QUEUE: ByteQueue<INBOUND_LEN> = ByteQueue::new();
static UART_QUEUE: ByteQueue<INBOUND_LEN> = ByteQueue::new();
static DIAGNOSTICS: Diagnostics = Diagnostics::new();

/// Runs the control path, preempting everything else.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

// no peripheral on this board uses UART4, so its vector is free to drive the high-priority executor
#[interrupt]
unsafe fn UART4() {
    unsafe { EXECUTOR_HIGH.on_interrupt() }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing polycv");

    let p = embassy_stm32::init(board::config());

    // calibration is restored before the control path exists, so the first tick is already corrected
    static BANK: StaticCell<CalibrationBank> = StaticCell::new();
    let bank: &'static CalibrationBank =
        BANK.init(CalibrationBank::new(board::CHANNELS, DacRange::default()));
    let mut flash = Flash::new_blocking(p.FLASH);
    persistence::restore(&mut flash, bank);

    let device_config = DeviceConfig {
        voices: board::CHANNELS,
        ..DeviceConfig::default()
    };
    let control = unwrap!(ControlPath::new(
        device_config,
        board::CHANNELS,
        bank,
        &DIAGNOSTICS
    ));
    let config_sender = CONFIG.sender();
    config_sender.send(device_config);

    // front panel
    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    spawner.spawn(unwrap!(panel::policy_input_task(button, CONFIG.sender())));

    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    spawner.spawn(unwrap!(panel::policy_display_task(
        red_led,
        CONFIG.anon_receiver()
    )));

    let toggle = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    let blue_led = Output::new(p.PB7, Level::Low, Speed::Low);
    spawner.spawn(unwrap!(panel::envelope_trigger_input_task(
        toggle,
        blue_led,
        config_sender
    )));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    config.vbus_detection = true;

    let driver: UsbDriver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0xC5C5;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Pawpaw Works");
    config.product = Some("polycv");
    config.self_powered = true;
    config.max_power = 0;

    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // one jack each way: calibration replies and clock passthrough go back to the host
    let (usb_out, usb_in) = MidiClass::new(&mut builder, 1, 1, 64).split();
    let usb = builder.build();

    let (usb_producer, usb_consumer) = USB_QUEUE.split();
    let (uart_producer, uart_consumer) = UART_QUEUE.split();

    spawner.spawn(unwrap!(transport::usb_task(usb)));
    spawner.spawn(unwrap!(transport::usb_midi_in_task(usb_in, usb_producer)));
    spawner.spawn(unwrap!(transport::usb_midi_out_task(usb_out)));

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = 31_250;
    let uart = unwrap!(UartRx::new(
        p.USART6,
        Irqs,
        p.PC7,
        p.DMA2_CH1,
        uart_config
    ));
    spawner.spawn(unwrap!(transport::uart_midi_in_task(uart, uart_producer)));

    // per RM0410, DAC channel 1 outputs on port A, pin 4 and channel 2 on pin 5
    let (pitch_1, pitch_2) = Dac::new(p.DAC1, p.DMA1_CH5, p.DMA1_CH6, p.PA4, p.PA5).split();
    let gates = [
        Output::new(p.PG0, Level::Low, Speed::Low),
        Output::new(p.PG1, Level::Low, Speed::Low),
    ];
    // TIM3 channels 1 and 2 on port B, pins 4 and 5
    let envelope_pwm = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new(p.PB4, OutputType::PushPull)),
        Some(PwmPin::new(p.PB5, OutputType::PushPull)),
        None,
        None,
        board::ENVELOPE_PWM_FREQ,
        CountingMode::EdgeAlignedUp,
    );
    let SimplePwmChannels { ch1, ch2, .. } = envelope_pwm.split();
    let outputs = CvGate::new(pitch_1, pitch_2, gates, [ch1, ch2], bank.range().max_code);

    interrupt::UART4.set_priority(Priority::P6);
    let high_priority = EXECUTOR_HIGH.start(interrupt::UART4);
    high_priority.spawn(unwrap!(control_task(
        control,
        usb_consumer,
        uart_consumer,
        outputs,
        unwrap!(CONFIG.receiver()),
    )));

    spawner.spawn(unwrap!(persistence::persistence_task(flash, bank)));
    spawner.spawn(unwrap!(monitor_task()));
}

/// Runs one tick of the control path per tick period.
#[embassy_executor::task]
async fn control_task(
    mut control: ControlPath<'static>,
    mut usb: Consumer<'static, INBOUND_LEN>,
    mut uart: Consumer<'static, INBOUND_LEN>,
    mut outputs: CvGate,
    mut config: ConfigReceiver<'static>,
) -> ! {
    let mut period = control.config().tick_period;
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        let start = Instant::now();

        if USB_CONNECTED.try_take().is_some() {
            control.reset_port(USB_PORT);
        }
        if let Some(new_config) = config.try_changed() {
            if new_config != *control.config() {
                if let Err(e) = control.reconfigure(new_config) {
                    warn!("Configuration rejected: {}", e);
                }
            }
            if control.config().tick_period != period {
                period = control.config().tick_period;
                ticker = Ticker::every(period);
            }
        }

        control.tick(&mut usb, &mut uart, &mut outputs, &mut OutboundSink);

        if start.elapsed() > period {
            DIAGNOSTICS.record(Diagnostic::TickOverrun);
        }
    }
}

/// Periodically reports the diagnostic counters.
#[embassy_executor::task]
async fn monitor_task() -> ! {
    let mut last = DIAGNOSTICS.snapshot(0);
    loop {
        Timer::after_secs(REPORT_SECS).await;
        let snapshot = DIAGNOSTICS.snapshot(USB_QUEUE.overflows() + UART_QUEUE.overflows());
        if snapshot != last {
            warn!("Diagnostics: {}", snapshot);
            last = snapshot;
        } else {
            debug!("Diagnostics unchanged");
        }
    }
}
