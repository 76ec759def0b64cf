use measurements::Voltage;
use wmidi::{Note, U14};

/// Describes how the attached oscillators respond to voltage, needed for converting notes to control voltage.
///
/// Adapts to whatever the oscillators expect: 1 V/octave with the lowest key at 0 V is the common case, but the
/// scale and the note which maps to 0 V are both adjustable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchMapping {
    /// The note which produces 0 V; lower notes produce negative voltages.
    pub base_note: Note,
    /// Voltage difference between two notes an octave apart.
    pub volts_per_octave: Voltage,
    /// Pitch bend range in semitones in either direction.
    pub bend_range: u8,
}

impl Default for PitchMapping {
    fn default() -> Self {
        Self {
            base_note: Note::C2,
            volts_per_octave: Voltage::from_volts(1.0),
            bend_range: 2,
        }
    }
}

impl PitchMapping {
    fn voltage_per_half_step(&self) -> Voltage {
        self.volts_per_octave / 12.0
    }

    /// Returns the [`Voltage`] for a (possibly fractional) MIDI note number.
    pub fn voltage(&self, note_number: f32) -> Voltage {
        let nth_key = note_number - f32::from(u8::from(self.base_note));
        f64::from(nth_key) * self.voltage_per_half_step()
    }

    /// The pitch wheel at rest.
    pub fn bend_center() -> U14 {
        U14::try_from(0x2000).unwrap_or(U14::MIN)
    }

    /// Converts a pitch wheel position to an offset in semitones.
    pub fn bend_semitones(&self, bend: U14) -> f32 {
        let centered = f32::from(u16::from(bend)) - 8192.0;
        centered / 8192.0 * f32::from(self.bend_range)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PitchMapping {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "PitchMapping {{ base_note: {} ({}), volts_per_octave: {}, bend_range: {} }}",
            self.base_note.to_str(),
            u8::from(self.base_note),
            self.volts_per_octave.as_volts(),
            self.bend_range
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> PitchMapping {
        PitchMapping {
            base_note: Note::F3,
            volts_per_octave: Voltage::from_volts(1.0),
            bend_range: 2,
        }
    }

    #[test]
    fn octave_above_base_is_one_volt() {
        let voltage = mapping().voltage(f32::from(u8::from(Note::F4)));
        assert!(
            (voltage.as_volts() - 1.0).abs() < 1e-6,
            "Expected 1 V but got {}",
            voltage.as_volts()
        );
    }

    #[test]
    fn fractional_notes_scale_linearly() {
        let voltage = mapping().voltage(f32::from(u8::from(Note::F3)) + 0.5);
        assert!((voltage.as_volts() - 0.5 / 12.0).abs() < 1e-6);
    }

    #[test]
    fn below_base_is_negative() {
        let voltage = mapping().voltage(f32::from(u8::from(Note::F2)));
        assert!((voltage.as_volts() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn bend() {
        let mapping = mapping();
        assert_eq!(0.0, mapping.bend_semitones(PitchMapping::bend_center()));
        assert_eq!(-2.0, mapping.bend_semitones(U14::MIN));
        assert!((mapping.bend_semitones(U14::MAX) - 2.0).abs() < 0.001);
        assert_eq!(1.0, mapping.bend_semitones(U14::try_from(0x3000).unwrap()));
    }
}
