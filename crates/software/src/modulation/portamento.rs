//! Provides data structures for the Portamento controllers and for executing a glide.

use wmidi::{ControlValue, Note, U14};

/// A struct for managing the Portamento controls of an instrument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Portamento {
    /// MIDI CC 65: Portamento On/Off
    enabled: bool,
    /// MIDI CC 5 and CC 37: Portamento Time, MSB and LSB
    time: U14,
    /// Glide length, in ticks, when `time` is at its maximum.
    max_ticks: u32,
}

impl Portamento {
    /// Constructs a [`Portamento`] which is switched off.
    pub fn new(max_ticks: u32) -> Self {
        Self {
            enabled: false,
            time: U14::MIN,
            max_ticks,
        }
    }

    /// Returns the combined 14-bit Portamento Time.
    pub fn time(&self) -> U14 {
        self.time
    }

    /// Sets the control value for CC 5: Portamento Time. Like any MSB, this clears the LSB.
    pub fn set_time(&mut self, msb: ControlValue) {
        self.time = combine(msb, 0);
    }

    /// Sets the control value for CC 37: Portamento Time LSB, keeping the MSB.
    pub fn set_time_lsb(&mut self, lsb: ControlValue) {
        let msb = (u16::from(self.time) >> 7) as u8;
        self.time = combine(ControlValue::from_u8_lossy(msb), u8::from(lsb));
    }

    /// Returns `true` if CC 65: Portamento On/Off is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets CC 65: Portamento On/Off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Setter.
    pub fn set_max_ticks(&mut self, max_ticks: u32) {
        self.max_ticks = max_ticks;
    }

    /// How many ticks a glide should last given the current controller values.
    pub fn glide_ticks(&self) -> u32 {
        if !self.enabled {
            return 0;
        }
        let max_time = u64::from(u16::from(U14::MAX));
        let scaled = (u64::from(self.max_ticks) * u64::from(u16::from(self.time)) + max_time / 2) / max_time;
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }
}

fn combine(msb: ControlValue, lsb: u8) -> U14 {
    let value = (u16::from(u8::from(msb)) << 7) | u16::from(lsb & 0x7F);
    U14::try_from(value).unwrap_or(U14::MAX)
}

#[cfg(feature = "defmt")]
impl defmt::Format for Portamento {
    fn format(&self, fmt: defmt::Formatter) {
        let Portamento {
            enabled,
            time,
            max_ticks,
        } = *self;
        defmt::write!(
            fmt,
            "Portamento {{ enabled: {}, time: {}, max_ticks: {} }}",
            enabled,
            u16::from(time),
            max_ticks
        );
    }
}

/// Contains data necessary to execute a portamento or glide effect, measured in ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Glide {
    /// Indicates the starting point of the glide as a fractional note number.
    ///
    /// When a new note is performed during a glide, a new glide begins from exactly the point reached, which is why
    /// this isn't a [`Note`].
    origin: f32,
    /// Indicates the end of the glide; `None` until the first note is assigned.
    destination: Option<Note>,
    /// Ticks since the glide began.
    elapsed: u32,
    /// How many ticks the glide lasts.
    duration: u32,
}

impl Glide {
    /// Starts a glide toward `destination` from the current position. The very first destination is reached
    /// immediately, since there is nowhere to glide from.
    pub fn set_destination(&mut self, destination: Note, duration: u32) {
        self.origin = match self.destination {
            Some(_) => self.position(),
            None => f32::from(u8::from(destination)),
        };
        self.destination = Some(destination);
        self.elapsed = 0;
        self.duration = duration;
    }

    /// Getter.
    pub fn destination(&self) -> Option<Note> {
        self.destination
    }

    /// Advances the glide by one tick.
    pub fn advance(&mut self) {
        self.elapsed = self.elapsed.saturating_add(1);
    }

    /// Returns `true` if the glide has arrived at its destination.
    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Returns the current position as a fractional note number.
    pub fn position(&self) -> f32 {
        let Some(destination) = self.destination else {
            return 0.0;
        };
        let destination = f32::from(u8::from(destination));
        if self.is_done() {
            destination
        } else {
            self.origin + (destination - self.origin) * self.progress()
        }
    }

    /// Indicates progress through the glide, where 0.0 is the origin and 1.0 is the destination.
    fn progress(&self) -> f32 {
        self.elapsed as f32 / self.duration as f32
    }
}
