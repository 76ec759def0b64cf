//! Keeps the calibration tables in the last flash sector so they survive a power cycle.

use defmt::*;
use embassy_stm32::flash::{self, Blocking, FLASH_SIZE, Flash, WRITE_SIZE};
use embassy_time::Timer;
use polycv_lib::{
    calibration::{CalibrationBank, CalibrationTable, persist},
    error::CalibrationFault,
};

/// Sector 11, the last 256K sector of the single-bank layout.
const SECTOR_SIZE: u32 = 256 * 1024;
const OFFSET: u32 = FLASH_SIZE as u32 - SECTOR_SIZE;
const BLOB_LEN: usize = persist::MAX_ENCODED_LEN.next_multiple_of(WRITE_SIZE);

/// How often the bank is checked for new tables.
const POLL_SECS: u64 = 2;

pub type BoardFlash = Flash<'static, Blocking>;

/// Loads any saved tables into `bank`. A blank or corrupt sector leaves every channel on the ideal mapping.
pub fn restore(flash: &mut BoardFlash, bank: &CalibrationBank) {
    let mut buf = [0; BLOB_LEN];
    if let Err(e) = flash.blocking_read(OFFSET, &mut buf) {
        error!("Unable to read calibration sector: {}", e);
        return;
    }
    match persist::decode(&buf) {
        Ok(tables) => {
            let count = tables.len().min(bank.channels());
            match bank.load_all(&tables[..count]) {
                Ok(()) => info!("Restored calibration for {} channels", count),
                Err(e) => warn!("Saved calibration not loaded: {}", e),
            }
        }
        Err(e) => info!("No saved calibration ({}); using ideal mapping", e),
    }
}

/// Rewrites the sector whenever a new set of tables has been published and then left alone for a full poll.
///
/// Erasing stalls instruction fetch from flash, so the outputs hold their last values for the duration. Saving only
/// once a recalibration session has gone quiet keeps that from happening mid-session.
#[embassy_executor::task]
pub async fn persistence_task(mut flash: BoardFlash, bank: &'static CalibrationBank) -> ! {
    let mut saved = bank.generation();
    let mut seen = saved;
    loop {
        Timer::after_secs(POLL_SECS).await;
        let generation = bank.generation();
        if generation != seen {
            seen = generation;
            continue;
        }
        if generation == saved {
            continue;
        }

        let (generation, tables) = bank.snapshot();
        match save(&mut flash, &tables[..bank.channels()]) {
            Ok(len) => {
                info!("Saved calibration generation {} ({} bytes)", generation, len);
                saved = generation;
            }
            Err(e) => error!("Unable to save calibration: {}", e),
        }
        seen = generation;
    }
}

fn save(flash: &mut BoardFlash, tables: &[CalibrationTable]) -> Result<usize, SaveError> {
    let mut buf = [0xFF; BLOB_LEN];
    let len = persist::encode(tables, &mut buf).map_err(SaveError::Encode)?;
    let padded = len.next_multiple_of(WRITE_SIZE);
    flash
        .blocking_erase(OFFSET, OFFSET + SECTOR_SIZE)
        .map_err(SaveError::Flash)?;
    flash
        .blocking_write(OFFSET, &buf[..padded])
        .map_err(SaveError::Flash)?;
    Ok(len)
}

#[derive(Format)]
enum SaveError {
    Encode(CalibrationFault),
    Flash(flash::Error),
}
