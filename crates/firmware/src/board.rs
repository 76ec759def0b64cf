//! Everything specific to the Nucleo-F767ZI: clock tree and the CV/gate/envelope outputs.

use defmt::*;
use embassy_stm32::{
    Config,
    dac::{DacCh1, DacCh2, Value},
    gpio::{Level, Output},
    mode::Async,
    peripherals::{DAC1, TIM3},
    time::Hertz,
    timer::simple_pwm::SimplePwmChannel,
};
use polycv_lib::{io::CvGateDriver, voice::GateState};

/// Number of CV/gate pairs; one per DAC channel.
pub const CHANNELS: usize = 2;

/// Clock configuration: 216 MHz core from the ST-LINK's 8 MHz clock, with the 48 MHz USB clock taken from PLL Q.
pub fn config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock, supplied by the ST-LINK
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410 the 48MHz clock used for USB OTG FS comes from the main PLL VCO (PLLQ clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    config
}

/// Frequency of the envelope PWM carrier; an RC low-pass on each pin turns the duty cycle into a voltage.
pub const ENVELOPE_PWM_FREQ: Hertz = Hertz(40_000);

/// Pitch CVs on the two DAC channels (PA4, PA5), a gate output per channel, and an envelope per channel as PWM on
/// TIM3 (PB4, PB5).
///
/// Both DAC channels must stay in use or the DAC gets disabled; see <https://github.com/embassy-rs/embassy/issues/4577>.
pub struct CvGate {
    pitch_1: DacCh1<'static, DAC1, Async>,
    pitch_2: DacCh2<'static, DAC1, Async>,
    gates: [Output<'static>; CHANNELS],
    envelopes: [SimplePwmChannel<'static, TIM3>; CHANNELS],
    /// The code which corresponds to full scale; envelope codes are written as a fraction of it.
    max_code: u16,
}

impl CvGate {
    pub fn new(
        pitch_1: DacCh1<'static, DAC1, Async>,
        pitch_2: DacCh2<'static, DAC1, Async>,
        gates: [Output<'static>; CHANNELS],
        mut envelopes: [SimplePwmChannel<'static, TIM3>; CHANNELS],
        max_code: u16,
    ) -> Self {
        for envelope in envelopes.iter_mut() {
            envelope.set_duty_cycle_fully_off();
            envelope.enable();
        }
        Self {
            pitch_1,
            pitch_2,
            gates,
            envelopes,
            max_code: max_code.max(1),
        }
    }
}

impl CvGateDriver for CvGate {
    fn channels(&self) -> usize {
        CHANNELS
    }

    fn write(&mut self, channel: usize, code: u16, gate: GateState) {
        let value = Value::Bit12Right(code);
        match channel {
            0 => self.pitch_1.set(value),
            1 => self.pitch_2.set(value),
            _ => {
                warn!("No output channel {}", channel);
                return;
            }
        }
        self.gates[channel].set_level(match gate {
            GateState::High => Level::High,
            GateState::Low => Level::Low,
        });
    }

    fn write_modulation(&mut self, channel: usize, code: u16) {
        match self.envelopes.get_mut(channel) {
            Some(envelope) => {
                envelope.set_duty_cycle_fraction(code.min(self.max_code).into(), self.max_code.into())
            }
            None => warn!("No envelope output {}", channel),
        }
    }
}
