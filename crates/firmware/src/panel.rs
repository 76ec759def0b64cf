//! Front panel: two pushbuttons for cycling settings and an LED showing the allocation policy.

use embassy_stm32::{exti::ExtiInput, gpio::Output};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    watch::{AnonReceiver, Receiver, Sender, Watch},
};
use embassy_time::Timer;
use polycv_lib::configuration::{CycleConfig, DeviceConfig};

const CONFIG_RECEIVER_CNT: usize = 1;
pub type ConfigSync = Watch<CriticalSectionRawMutex, DeviceConfig, CONFIG_RECEIVER_CNT>;
pub type ConfigSender<'a> = Sender<'a, CriticalSectionRawMutex, DeviceConfig, CONFIG_RECEIVER_CNT>;
pub type ConfigReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, DeviceConfig, CONFIG_RECEIVER_CNT>;
pub type ConfigSpy<'a> = AnonReceiver<'a, CriticalSectionRawMutex, DeviceConfig, CONFIG_RECEIVER_CNT>;

/// The configuration the control path should be running. Only the tick applies it.
pub static CONFIG: ConfigSync = Watch::new();

/// Handles presses of the user button, cycling through the
/// [`AllocationPolicy`][`polycv_lib::configuration::AllocationPolicy`] options.
#[embassy_executor::task]
pub async fn policy_input_task(mut button: ExtiInput<'static>, config: ConfigSender<'static>) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        config.send_modify(|config| {
            if let Some(config) = config {
                config.policy = config.policy.cycle();
            }
        });
    }
}

/// Toggles between legato and retriggering envelopes.
#[embassy_executor::task]
pub async fn envelope_trigger_input_task(
    mut button: ExtiInput<'static>,
    mut led: Output<'static>,
    config: ConfigSender<'static>,
) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        config.send_modify(|config| {
            if let Some(config) = config {
                config.envelope_trigger = config.envelope_trigger.cycle();
            }
        });
        match config.try_get().map(|config| config.envelope_trigger.retriggers()) {
            Some(true) => led.set_high(),
            _ => led.set_low(),
        }
    }
}

/// Status indicator for the allocation policy.
///
/// Each cycle is divided in half. The LED remains dark for one half. For the other, the LED lights up N times, where N
/// is one more than the index of the selected policy.
#[embassy_executor::task]
pub async fn policy_display_task(mut led: Output<'static>, mut config: ConfigSpy<'static>) -> ! {
    const BLINK_SLEEP_US: u64 = 1_000_000;

    loop {
        led.set_low();
        Timer::after_micros(BLINK_SLEEP_US).await;

        let Some(config) = config.try_get() else {
            continue;
        };
        let blink_cnt = (config.policy as u8).saturating_add(1);
        // the "off" frames in between; the LED always starts and ends lit
        let animation_frames = blink_cnt * 2 - 1;
        for _ in 0..animation_frames {
            led.toggle();
            Timer::after_micros(BLINK_SLEEP_US / u64::from(animation_frames)).await;
        }
    }
}
