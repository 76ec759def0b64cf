use super::{CalibrationEntry, CalibrationTable, DacRange, MAX_CHANNELS};
use crate::error::CalibrationFault;
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering, fence},
};

/// One table per output channel.
pub type TableSet = [CalibrationTable; MAX_CHANNELS];

/// Double-buffered calibration tables for every channel.
///
/// Readers use whichever set is active. A writer copies the active set into the spare one, replaces one channel's
/// table there, and then publishes by flipping the active index, so a reader never sees a half-written table. Every
/// publish increments a generation counter, which lets readers outside the control path (e.g., the task which saves
/// tables to flash) notice that they raced a publish and try again.
///
/// Only one writer may be active at a time; a second is turned away with [`CalibrationFault::WriterBusy`]. Writers
/// must not preempt the control path while it is reading, which holds as long as the control path runs at the highest
/// priority.
pub struct CalibrationBank {
    sets: [UnsafeCell<TableSet>; 2],
    active: AtomicU8,
    generation: AtomicU32,
    writing: AtomicBool,
    channels: usize,
    range: DacRange,
}

// SAFETY: the spare set is only written while `writing` is held, and the active set is never written.
unsafe impl Sync for CalibrationBank {}

impl CalibrationBank {
    /// Constructs a bank for `channels` output channels (at most [`MAX_CHANNELS`]), none of which are calibrated yet.
    pub fn new(channels: usize, range: DacRange) -> Self {
        Self {
            sets: [
                UnsafeCell::new([CalibrationTable::new(); MAX_CHANNELS]),
                UnsafeCell::new([CalibrationTable::new(); MAX_CHANNELS]),
            ],
            active: AtomicU8::new(0),
            generation: AtomicU32::new(0),
            writing: AtomicBool::new(false),
            channels: channels.min(MAX_CHANNELS),
            range,
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The ideal mapping used for channels without a table.
    pub fn range(&self) -> DacRange {
        self.range
    }

    /// Number of publishes so far.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    fn active_set(&self) -> &TableSet {
        let index = usize::from(self.active.load(Ordering::Acquire) & 1);
        // SAFETY: the active set is only written after it has been swapped out by a publish, which requires that no
        // reader of it be running
        unsafe { &*self.sets[index].get() }
    }

    /// The DAC code for `input` microvolts on `channel`. Never fails: channels without a table (or beyond the bank)
    /// use the ideal mapping.
    pub fn correct(&self, channel: usize, input: i32) -> u16 {
        match self.active_set().get(channel) {
            Some(table) if channel < self.channels => table.correct(input, &self.range),
            _ => self.range.ideal(input),
        }
    }

    /// A copy of the active table for `channel`.
    pub fn table(&self, channel: usize) -> Option<CalibrationTable> {
        (channel < self.channels).then(|| self.active_set()[channel])
    }

    /// Validates `entries` and publishes them as `channel`'s table. On failure the previous table stays active.
    pub fn load(&self, channel: usize, entries: &[CalibrationEntry]) -> Result<(), CalibrationFault> {
        if channel >= self.channels {
            return Err(CalibrationFault::NoSuchChannel);
        }
        let table = CalibrationTable::load(entries)?;
        self.publish(|set| set[channel] = table)?;
        info!("Published calibration for channel {}", channel);
        Ok(())
    }

    /// Publishes tables for every channel at once, e.g. after reading them back from flash. Channels beyond `tables`
    /// revert to the ideal mapping.
    pub fn load_all(&self, tables: &[CalibrationTable]) -> Result<(), CalibrationFault> {
        if tables.len() > self.channels {
            return Err(CalibrationFault::NoSuchChannel);
        }
        self.publish(|set| {
            *set = [CalibrationTable::new(); MAX_CHANNELS];
            set[..tables.len()].copy_from_slice(tables);
        })
    }

    /// Copies the active set along with the generation it belongs to.
    ///
    /// Meant for readers outside the control path: if a publish lands mid-copy the copy is retried.
    pub fn snapshot(&self) -> (u32, TableSet) {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            let index = usize::from(self.active.load(Ordering::Acquire) & 1);
            // SAFETY: a concurrent write is possible only after a publish, which the generation check below detects;
            // the volatile read keeps the copy from being elided or reordered past the check
            let set = unsafe { core::ptr::read_volatile(self.sets[index].get()) };
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return (before, set);
            }
            trace!("Calibration published mid-copy; retrying");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut TableSet)) -> Result<(), CalibrationFault> {
        if self
            .writing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(CalibrationFault::WriterBusy);
        }

        let active = self.active.load(Ordering::Acquire) & 1;
        let spare = active ^ 1;
        // SAFETY: `writing` is held, and nothing reads the spare set
        unsafe {
            let spare_set = &mut *self.sets[usize::from(spare)].get();
            *spare_set = *self.sets[usize::from(active)].get();
            update(spare_set);
        }
        self.active.store(spare, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);

        self.writing.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> [CalibrationEntry; 2] {
        [
            CalibrationEntry { input: 0, code: 100 },
            CalibrationEntry {
                input: 1_000_000,
                code: 1300,
            },
        ]
    }

    #[test]
    fn uncalibrated_channels_use_ideal_mapping() {
        let bank = CalibrationBank::new(2, DacRange::default());
        assert_eq!(1229, bank.correct(0, 1_000_000));
        assert_eq!(1229, bank.correct(7, 1_000_000), "Missing channel should not fault");
    }

    #[test]
    fn load_publishes_one_channel() {
        let bank = CalibrationBank::new(2, DacRange::default());
        bank.load(1, &entries()).unwrap();

        assert_eq!(1, bank.generation());
        assert_eq!(700, bank.correct(1, 500_000));
        assert_eq!(0, bank.correct(0, 0), "Other channel should be untouched");
    }

    #[test]
    fn later_loads_keep_earlier_channels() {
        let bank = CalibrationBank::new(2, DacRange::default());
        bank.load(0, &entries()).unwrap();
        bank.load(1, &entries()).unwrap();
        assert_eq!(100, bank.correct(0, 0));
        assert_eq!(100, bank.correct(1, 0));
        assert_eq!(2, bank.generation());
    }

    #[test]
    fn rejected_table_leaves_previous_active() {
        let bank = CalibrationBank::new(2, DacRange::default());
        bank.load(0, &entries()).unwrap();

        let bad = [entries()[1], entries()[0]];
        assert_eq!(
            Err(CalibrationFault::NonMonotonicInput { index: 1 }),
            bank.load(0, &bad),
            "Expected left but got right"
        );
        assert_eq!(Err(CalibrationFault::NoSuchChannel), bank.load(2, &entries()));
        assert_eq!(1, bank.generation(), "Nothing should have been published");
        assert_eq!(700, bank.correct(0, 500_000));
    }

    #[test]
    fn snapshot_and_load_all() {
        let source = CalibrationBank::new(2, DacRange::default());
        source.load(1, &entries()).unwrap();
        let (generation, tables) = source.snapshot();
        assert_eq!(1, generation);

        let restored = CalibrationBank::new(2, DacRange::default());
        restored.load_all(&tables[..2]).unwrap();
        assert_eq!(Some(tables[1]), restored.table(1));
        assert_eq!(700, restored.correct(1, 500_000));
        assert_eq!(None, restored.table(2));
    }
}
