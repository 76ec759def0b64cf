use crate::error::CalibrationFault;
use measurements::Voltage;
use tinyvec::ArrayVec;

/// Most measurement points a single channel's table can hold.
pub const MAX_ENTRIES: usize = 32;

/// One measurement: the DAC code which produced the target voltage at the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationEntry {
    /// Target voltage, in microvolts.
    pub input: i32,
    /// DAC code.
    pub code: u16,
}

/// Converts a voltage to the integer microvolts calibration tables are keyed by. Saturates at the bounds of `i32`.
pub fn microvolts(voltage: Voltage) -> i32 {
    (voltage.as_volts() * 1_000_000.0) as i32
}

/// The span of the DAC, used to map voltages to codes for channels without a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DacRange {
    /// Output voltage at `max_code`, in microvolts.
    pub full_scale: i32,
    /// Largest code the DAC accepts.
    pub max_code: u16,
}

impl Default for DacRange {
    /// A 12-bit DAC with a 3.3 V reference, amplified to 10/3 V.
    fn default() -> Self {
        Self {
            full_scale: 3_333_333,
            max_code: 4095,
        }
    }
}

impl DacRange {
    /// The code an ideal DAC would need to produce `input` microvolts, clamped to the DAC's range.
    pub fn ideal(&self, input: i32) -> u16 {
        let full_scale = i64::from(self.full_scale.max(1));
        let input = i64::from(input).clamp(0, full_scale);
        let code = (input * i64::from(self.max_code) + full_scale / 2) / full_scale;
        code as u16
    }
}

/// A channel's measurements, sorted by input.
///
/// Inputs are strictly increasing and codes never decrease, so correction is monotone. A table can only be built by
/// [`CalibrationTable::load`], which enforces this.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationTable {
    entries: ArrayVec<[CalibrationEntry; MAX_ENTRIES]>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for CalibrationTable {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "CalibrationTable {{ entries: {} }}", self.entries.as_slice());
    }
}

impl CalibrationTable {
    /// A table with no entries, which corrects nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `entries` and builds a table from them.
    pub fn load(entries: &[CalibrationEntry]) -> Result<Self, CalibrationFault> {
        if entries.is_empty() {
            return Err(CalibrationFault::Empty);
        }
        if entries.len() > MAX_ENTRIES {
            return Err(CalibrationFault::TooManyEntries);
        }
        for (index, pair) in entries.windows(2).enumerate() {
            if pair[1].input <= pair[0].input {
                return Err(CalibrationFault::NonMonotonicInput { index: index + 1 });
            }
            if pair[1].code < pair[0].code {
                return Err(CalibrationFault::NonMonotonicCode { index: index + 1 });
            }
        }

        let mut table = Self::new();
        table.entries.extend_from_slice(entries);
        Ok(table)
    }

    /// The measurements, sorted by input.
    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    /// Returns `true` for a table without measurements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The DAC code for `input` microvolts.
    ///
    /// Exact at each measurement, linear between them, and clamped to the end codes outside of them. An empty table
    /// defers to `fallback`.
    pub fn correct(&self, input: i32, fallback: &DacRange) -> u16 {
        let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) else {
            return fallback.ideal(input);
        };
        if input <= first.input {
            return first.code;
        }
        if input >= last.input {
            return last.code;
        }

        // first entry whose input exceeds the target; never the first, given the clamping above
        let upper = self.entries.partition_point(|entry| entry.input <= input);
        let (lo, hi) = (self.entries[upper - 1], self.entries[upper]);

        let span = i64::from(hi.input) - i64::from(lo.input);
        let offset = i64::from(input) - i64::from(lo.input);
        let rise = i64::from(hi.code) - i64::from(lo.code);
        let code = i64::from(lo.code) + (offset * rise + span / 2) / span;
        code as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(input: i32, code: u16) -> CalibrationEntry {
        CalibrationEntry { input, code }
    }

    fn table() -> CalibrationTable {
        CalibrationTable::load(&[
            entry(0, 0),
            entry(1_000_000, 1200),
            entry(2_000_000, 2500),
        ])
        .unwrap()
    }

    #[test]
    fn exact_at_knots() {
        let table = table();
        let range = DacRange::default();
        for e in table.entries() {
            assert_eq!(e.code, table.correct(e.input, &range), "Expected left but got right");
        }
    }

    #[test]
    fn interpolates_between_knots() {
        let table = table();
        let range = DacRange::default();
        assert_eq!(600, table.correct(500_000, &range));
        assert_eq!(1850, table.correct(1_500_000, &range));
    }

    #[test]
    fn clamps_outside_domain() {
        let table = table();
        let range = DacRange::default();
        assert_eq!(0, table.correct(-5, &range));
        assert_eq!(2500, table.correct(3_000_000, &range));
        assert_eq!(2500, table.correct(i32::MAX, &range));
    }

    #[test]
    fn correction_is_monotone() {
        let table = table();
        let range = DacRange::default();
        let mut previous = 0;
        for input in (-100_000..2_100_000).step_by(7_919) {
            let code = table.correct(input, &range);
            assert!(code >= previous, "{input} µV went backwards");
            previous = code;
        }
    }

    #[test]
    fn empty_table_uses_ideal_mapping() {
        let range = DacRange::default();
        let table = CalibrationTable::new();
        assert_eq!(0, table.correct(-1_000_000, &range));
        assert_eq!(1229, table.correct(1_000_000, &range));
        assert_eq!(4095, table.correct(range.full_scale, &range));
        assert_eq!(4095, table.correct(9_000_000, &range));
    }

    #[test]
    fn rejects_invalid_tables() {
        assert_eq!(Err(CalibrationFault::Empty), CalibrationTable::load(&[]));
        assert_eq!(
            Err(CalibrationFault::NonMonotonicInput { index: 2 }),
            CalibrationTable::load(&[entry(0, 0), entry(10, 5), entry(10, 6)]),
            "Expected left but got right"
        );
        assert_eq!(
            Err(CalibrationFault::NonMonotonicCode { index: 1 }),
            CalibrationTable::load(&[entry(0, 10), entry(10, 5)]),
            "Expected left but got right"
        );
        let too_many = [entry(0, 0); MAX_ENTRIES + 1];
        assert_eq!(
            Err(CalibrationFault::TooManyEntries),
            CalibrationTable::load(&too_many)
        );
    }

    #[test]
    fn single_entry_is_constant() {
        let table = CalibrationTable::load(&[entry(1_000, 77)]).unwrap();
        let range = DacRange::default();
        assert_eq!(77, table.correct(0, &range));
        assert_eq!(77, table.correct(5_000, &range));
    }

    #[test]
    fn converts_voltage() {
        assert_eq!(1_500_000, microvolts(Voltage::from_volts(1.5)));
        assert_eq!(-250_000, microvolts(Voltage::from_volts(-0.25)));
    }
}
