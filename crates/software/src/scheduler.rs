//! The control path: everything which happens once per tick.
//!
//! Each tick drains a bounded amount of input, applies the resulting events, advances allocation and modulation by one
//! step, and writes every voice to the hardware. The amount of work per tick is bounded by the configured drain
//! budgets, so a flood of input delays events rather than the tick.

use crate::{
    Error,
    allocator::VoiceAllocator,
    calibration::{
        CalibrationBank, microvolts,
        protocol::{NakReason, Recalibration, Reply},
    },
    configuration::{DeviceConfig, PitchMapping},
    diagnostics::{Diagnostic, Diagnostics},
    io::{CvGateDriver, MidiSink},
    midi::{MidiDecoder, MidiEvent, MidiEventKind, usb},
    modulation::ModulationEngine,
    queue::ByteSource,
    voice::{GateState, Voice},
};
use wmidi::{ControlFunction, ControlValue, U7, U14};

/// Number of input transports: USB and UART.
pub const PORTS: usize = 2;

/// USB-MIDI virtual cable used for everything the device sends.
const CABLE: u8 = 0;

/// Where the control path is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// Running a tick.
    TickInProgress,
}

/// Owns all state the tick needs, apart from the hardware, which is lent to each call of [`ControlPath::tick`].
pub struct ControlPath<'a> {
    config: DeviceConfig,
    channels: usize,
    state: State,
    tick: u32,
    decoders: [MidiDecoder; PORTS],
    /// An event decoded after the budget ran out; applied first thing next tick.
    lookahead: Option<MidiEvent>,
    /// Which port is read first, alternated each tick.
    next_port: usize,
    allocator: VoiceAllocator,
    modulation: ModulationEngine,
    recalibration: Recalibration,
    mod_wheel: ControlValue,
    bend: U14,
    bank: &'a CalibrationBank,
    diagnostics: &'a Diagnostics,
}

impl<'a> ControlPath<'a> {
    /// Validates `config` against hardware with `channels` output channels and builds the control path.
    pub fn new(
        config: DeviceConfig,
        channels: usize,
        bank: &'a CalibrationBank,
        diagnostics: &'a Diagnostics,
    ) -> Result<Self, Error> {
        config.validate(channels)?;
        info!("Starting control path: {}", config);
        Ok(Self {
            config,
            channels,
            state: State::Idle,
            tick: 0,
            decoders: [MidiDecoder::new(), MidiDecoder::new()],
            lookahead: None,
            next_port: 0,
            allocator: VoiceAllocator::new(&config),
            modulation: ModulationEngine::new(&config),
            recalibration: Recalibration::new(),
            mod_wheel: U7::from_u8_lossy(0),
            bend: PitchMapping::bend_center(),
            bank,
            diagnostics,
        })
    }

    /// Applies a new configuration between ticks. An unusable configuration is rejected and the current one kept.
    pub fn reconfigure(&mut self, config: DeviceConfig) -> Result<(), Error> {
        config.validate(self.channels)?;
        info!("Reconfiguring: {}", config);
        self.allocator.reconfigure(&config, self.tick);
        self.modulation.reconfigure(&config);
        self.config = config;
        Ok(())
    }

    /// The configuration in effect.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Getter.
    pub fn state(&self) -> State {
        self.state
    }

    /// Number of ticks run so far (wrapping).
    pub fn ticks(&self) -> u32 {
        self.tick
    }

    /// The voices, as of the end of the last tick.
    pub fn voices(&self) -> &[Voice] {
        self.allocator.voices()
    }

    /// Forgets any partially received message on `port`, e.g. after the USB host reconnects.
    pub fn reset_port(&mut self, port: usize) {
        if let Some(decoder) = self.decoders.get_mut(port) {
            decoder.reset();
        }
    }

    /// Runs one tick. `usb` and `uart` are the consumer ends of the input queues.
    pub fn tick(
        &mut self,
        usb: &mut impl ByteSource,
        uart: &mut impl ByteSource,
        driver: &mut impl CvGateDriver,
        sink: &mut impl MidiSink,
    ) {
        self.state = State::TickInProgress;
        let tick = self.tick;

        self.drain([usb, uart], sink);

        self.allocator.tick_advance(tick);
        self.modulation
            .advance_tick(self.allocator.voices_mut(), tick);
        self.emit(driver);

        self.tick = tick.wrapping_add(1);
        self.state = State::Idle;
    }

    fn drain(&mut self, mut sources: [&mut dyn ByteSource; PORTS], sink: &mut impl MidiSink) {
        let tick = self.tick;
        let mut events = 0;
        if let Some(event) = self.lookahead.take() {
            self.apply(event, sink);
            events += 1;
        }

        let mut bytes = 0;
        let mut exhausted = [false; PORTS];
        let mut port = self.next_port;
        while bytes < self.config.max_bytes_per_tick && exhausted.contains(&false) {
            if exhausted[port] {
                port = (port + 1) % PORTS;
                continue;
            }
            let Some(byte) = sources[port].pop() else {
                exhausted[port] = true;
                continue;
            };
            bytes += 1;

            let Some(event) = self.decoders[port].push(byte, tick) else {
                continue;
            };
            if events >= self.config.max_events_per_tick {
                trace!("Drain budget spent; deferring an event");
                self.lookahead = Some(event);
                self.diagnostics.record(Diagnostic::DeferredEvent);
                break;
            }
            self.apply(event, sink);
            events += 1;
            port = (port + 1) % PORTS;
        }
        self.next_port = (self.next_port + 1) % PORTS;

        for decoder in self.decoders.iter_mut() {
            self.diagnostics
                .record_many(Diagnostic::MalformedMidi, decoder.take_malformed());
        }
    }

    fn apply(&mut self, event: MidiEvent, sink: &mut impl MidiSink) {
        let tick = self.tick;
        if let Some(channel) = event.kind.channel() {
            if !self.config.channel_filter.accepts(channel) {
                return;
            }
        }

        match event.kind {
            MidiEventKind::NoteOn {
                note,
                velocity,
                channel,
            } => {
                self.allocator.on_note_on(note, velocity, channel, tick);
                self.diagnostics.record_many(
                    Diagnostic::VoiceAllocationDropped,
                    self.allocator.take_dropped(),
                );
            }
            MidiEventKind::NoteOff { note, channel } => {
                self.allocator.on_note_off(note, channel, tick)
            }
            MidiEventKind::ControlChange {
                controller, value, ..
            } => match controller {
                ControlFunction::MODULATION_WHEEL => self.mod_wheel = value,
                ControlFunction::PORTAMENTO_TIME => self.modulation.set_portamento_time(value),
                ControlFunction::PORTAMENTO_TIME_LSB => {
                    self.modulation.set_portamento_time_lsb(value)
                }
                ControlFunction::PORTAMENTO_ON_OFF => self
                    .modulation
                    .set_portamento_enabled(u8::from(value) >= 64),
                ControlFunction::ALL_NOTES_OFF => self.allocator.all_notes_off(tick),
                _ => trace!("Ignoring Control Change {}", u8::from(controller)),
            },
            MidiEventKind::PitchBend { value, .. } => self.bend = value,
            MidiEventKind::Clock => self.allocator.on_clock(tick),
            MidiEventKind::Start => self.allocator.on_start(),
            MidiEventKind::Continue => self.allocator.on_continue(),
            MidiEventKind::Stop => self.allocator.on_stop(tick),
            MidiEventKind::SysEx(payload) => {
                if let Some(reply) = self.recalibration.handle_sysex(&payload, self.bank) {
                    if let Reply::Nak {
                        reason: NakReason::Fault(fault),
                        ..
                    } = reply
                    {
                        warn!("Calibration rejected: {}", fault);
                        self.diagnostics.record(Diagnostic::InvalidCalibration);
                    }
                    self.send(sink, &reply.to_sysex());
                }
            }
        }

        if self.config.clock_passthrough {
            if let Some(status) = event.kind.realtime_status() {
                self.send(sink, &[status]);
            }
        }
    }

    fn send(&self, sink: &mut impl MidiSink, message: &[u8]) {
        for packet in usb::frame(CABLE, message) {
            if !sink.send_midi_packet(packet) {
                self.diagnostics.record(Diagnostic::OutboundDropped);
            }
        }
    }

    /// Composes each voice's outputs and writes them. Channels without a voice rest at 0 V with the gate low.
    fn emit(&self, driver: &mut impl CvGateDriver) {
        let pitch = &self.config.pitch;
        let base_note = f32::from(u8::from(pitch.base_note));
        let bend = pitch.bend_semitones(self.bend);
        let depth = self.config.lfo.vibrato_depth * f32::from(u8::from(self.mod_wheel)) / 127.0;
        let max_code = f32::from(self.bank.range().max_code);
        let rest = |channel| self.bank.correct(channel, microvolts(pitch.voltage(base_note)));

        let voices = self.allocator.voices();
        for channel in 0..self.channels.min(driver.channels()) {
            let Some(voice) = voices.get(channel) else {
                driver.write(channel, rest(channel), GateState::Low);
                driver.write_modulation(channel, 0);
                continue;
            };

            let modulation = self.modulation.sample(voice);
            let code = match voice.glide.destination() {
                Some(_) => {
                    let note_number = modulation.glide_semitones + bend + modulation.lfo * depth;
                    self.bank
                        .correct(channel, microvolts(pitch.voltage(note_number)))
                }
                // never played
                None => rest(channel),
            };
            driver.write(channel, code, voice.gate);

            let velocity = f32::from(u8::from(voice.velocity)) / 127.0;
            let level = (modulation.envelope * velocity).clamp(0.0, 1.0);
            driver.write_modulation(channel, (level * max_code + 0.5) as u16);
        }
    }
}
