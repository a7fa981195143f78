//! `embedded-storage` NOR flash face over [`FlashProbe`].
//!
//! Lets generic storage consumers drive the probe through the standard
//! trait pair. Bounds checks need the device capacity, which comes from
//! the last successful `identify`; until then every ranged operation
//! fails with `NotReady` and `capacity()` reports zero.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::probe::{FlashProbe, ProbeError, ERASE_SECTOR_SIZE};

impl<SE, CE> NorFlashError for ProbeError<SE, CE>
where
    SE: core::fmt::Debug,
    CE: core::fmt::Debug,
{
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            ProbeError::NotAligned => NorFlashErrorKind::NotAligned,
            ProbeError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            ProbeError::Spi(_)
            | ProbeError::Cs(_)
            | ProbeError::NotReady
            | ProbeError::BufferTooSmall { .. }
            | ProbeError::WriteTimeout { .. }
            | ProbeError::EraseTimeout { .. } => NorFlashErrorKind::Other,
        }
    }
}

impl<SPI, CS, D> ErrorType for FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = ProbeError<SPI::Error, CS::Error>;
}

impl<SPI, CS, D> ReadNorFlash for FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        self.read_data(offset, bytes)
    }

    fn capacity(&self) -> usize {
        match self.capacity_bytes() {
            Some(bytes) => usize::try_from(bytes).unwrap_or(usize::MAX),
            None => 0,
        }
    }
}

impl<SPI, CS, D> NorFlash for FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = ERASE_SECTOR_SIZE;

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        self.program(offset, bytes)
    }

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let sector = ERASE_SECTOR_SIZE as u32;
        if from > to {
            return Err(ProbeError::OutOfBounds);
        }
        if from % sector != 0 || to % sector != 0 {
            return Err(ProbeError::NotAligned);
        }
        self.check_range(from, (to - from) as usize)?;
        let mut base = from;
        while base < to {
            self.erase_sector(base)?;
            base += sector;
        }
        Ok(())
    }
}

impl<SPI, CS, D> FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    fn check_range(
        &self,
        offset: u32,
        len: usize,
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        let capacity = match self.capacity_bytes() {
            Some(bytes) => bytes,
            None => return Err(ProbeError::NotReady),
        };
        let end = u64::from(offset) + len as u64;
        if end > capacity {
            return Err(ProbeError::OutOfBounds);
        }
        Ok(())
    }
}
