//! SD card driver speaking the SPI subset of the SD protocol. Implements
//! [`crate::BlockDevice`] on top of single-sector CMD17/CMD24 transfers.

mod init;
mod io;
#[cfg(test)]
mod tests;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::blockdev::SECTOR_SIZE;

pub(crate) const SD_CMD0: u8 = 0;
pub(crate) const SD_CMD8: u8 = 8;
pub(crate) const SD_CMD9: u8 = 9;
pub(crate) const SD_CMD16: u8 = 16;
pub(crate) const SD_CMD17: u8 = 17;
pub(crate) const SD_CMD24: u8 = 24;
pub(crate) const SD_CMD55: u8 = 55;
pub(crate) const SD_ACMD41: u8 = 41;
pub(crate) const SD_CMD58: u8 = 58;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdStatus {
    pub version: SdCardVersion,
    pub high_capacity: bool,
    pub capacity_bytes: u64,
}

#[derive(Debug)]
pub enum SdError<SE, CE> {
    Spi(SE),
    Cs(CE),
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
    UnalignedLength(usize),
}

/// Blocking SD card handle. The caller supplies an already-configured bus
/// (mode 0, clocked at an init-safe rate until [`SdSpiDevice::init`]
/// returns) and the chip-select line, which this driver owns exclusively.
pub struct SdSpiDevice<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    high_capacity: Option<bool>,
    capacity_sectors: u32,
    cached_sector_lba: Option<u32>,
    cached_sector: [u8; SECTOR_SIZE],
}

impl<SPI, CS, D> SdSpiDevice<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: D) -> Result<Self, SdError<SPI::Error, CS::Error>> {
        cs.set_high().map_err(SdError::Cs)?;
        Ok(Self {
            spi,
            cs,
            delay,
            high_capacity: None,
            capacity_sectors: 0,
            cached_sector_lba: None,
            cached_sector: [0; SECTOR_SIZE],
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.high_capacity.is_some()
    }

    pub fn invalidate(&mut self) {
        self.high_capacity = None;
        self.cached_sector_lba = None;
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

/// Capacity from the 128-bit CSD register. The register is treated as one
/// big-endian word; `CSD_STRUCTURE` in the top two bits selects the field
/// layout.
pub(crate) fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    let raw = u128::from_be_bytes(*csd);
    let field = |msb: u32, lsb: u32| ((raw >> lsb) as u64) & ((1u64 << (msb - lsb + 1)) - 1);

    match field(127, 126) {
        // CSD 1.0 (SDSC): (C_SIZE + 1) * 2^(C_SIZE_MULT + 2) blocks of
        // 2^READ_BL_LEN bytes.
        0 => {
            let c_size = field(73, 62);
            let c_size_mult = field(49, 47) as u32;
            let read_bl_len = field(83, 80) as u32;
            let block_count = (c_size + 1) << (c_size_mult + 2);
            block_count.checked_mul(1u64 << read_bl_len)
        }
        // CSD 2.0 (SDHC/SDXC): (C_SIZE + 1) half-megabyte units.
        1 => {
            let c_size = field(69, 48);
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}
