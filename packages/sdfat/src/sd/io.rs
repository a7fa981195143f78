use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use super::{SdError, SdSpiDevice, SD_CMD17, SD_CMD24, SD_CMD9};
use crate::blockdev::{BlockDevice, SECTOR_SIZE};

impl<SPI, CS, D> SdSpiDevice<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8],
    ) -> Result<(), SdError<SPI::Error, CS::Error>> {
        if out.len() != SECTOR_SIZE {
            return Err(SdError::UnalignedLength(out.len()));
        }
        if self.cached_sector_lba == Some(lba) {
            out.copy_from_slice(&self.cached_sector);
            return Ok(());
        }
        let high_capacity = self.high_capacity.ok_or(SdError::NotInitialized)?;
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SECTOR_SIZE as u32)
        };

        let cmd17_r1 = self.send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction()?;
            return Err(SdError::Cmd17Unexpected(cmd17_r1));
        }

        let mut token = 0xFFu8;
        let mut got_token = false;
        for _ in 0..50_000 {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                got_token = true;
                break;
            }
        }
        if !got_token {
            self.end_transaction()?;
            return Err(SdError::DataTokenTimeout(SD_CMD17));
        }
        if token != 0xFE {
            self.end_transaction()?;
            return Err(SdError::DataTokenUnexpected(SD_CMD17, token));
        }

        for slot in out.iter_mut() {
            *slot = self.transfer_byte(0xFF)?;
        }
        // Discard data CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        self.end_transaction()?;

        self.cached_sector.copy_from_slice(out);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    pub fn write_sector(
        &mut self,
        lba: u32,
        data: &[u8],
    ) -> Result<(), SdError<SPI::Error, CS::Error>> {
        if data.len() != SECTOR_SIZE {
            return Err(SdError::UnalignedLength(data.len()));
        }
        let high_capacity = self.high_capacity.ok_or(SdError::NotInitialized)?;
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SECTOR_SIZE as u32)
        };

        let cmd24_r1 = self.send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction()?;
            return Err(SdError::Cmd24Unexpected(cmd24_r1));
        }

        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFE)?;
        for &byte in data {
            let _ = self.transfer_byte(byte)?;
        }
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != 0x05 {
            self.end_transaction()?;
            return Err(SdError::WriteDataRejected(response));
        }

        let mut released = false;
        for _ in 0..200_000 {
            if self.transfer_byte(0xFF)? == 0xFF {
                released = true;
                break;
            }
        }
        self.end_transaction()?;
        if !released {
            return Err(SdError::WriteBusyTimeout);
        }
        self.cached_sector.copy_from_slice(data);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    pub(super) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdError<SPI::Error, CS::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
    }

    pub(super) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdError<SPI::Error, CS::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdError<SPI::Error, CS::Error>> {
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];

        self.cs.set_low().map_err(SdError::Cs)?;
        for byte in frame {
            let _ = self.transfer_byte(byte)?;
        }

        let mut r1 = 0xFFu8;
        let mut got_response = false;
        for _ in 0..16 {
            r1 = self.transfer_byte(0xFF)?;
            if (r1 & 0x80) == 0 {
                got_response = true;
                break;
            }
        }

        if !got_response {
            self.end_transaction()?;
            return Err(SdError::NoResponse(cmd));
        }

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }

        if release_cs_after {
            self.end_transaction()?;
        }
        Ok(r1)
    }

    pub(super) fn send_dummy_clocks(
        &mut self,
        bytes: usize,
    ) -> Result<(), SdError<SPI::Error, CS::Error>> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdError<SPI::Error, CS::Error>> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(SdError::Spi)?;
        Ok(frame[0])
    }

    pub(super) fn read_data_block(&mut self) -> Result<[u8; 16], SdError<SPI::Error, CS::Error>> {
        let mut token = 0xFFu8;
        let mut got_token = false;
        for _ in 0..50_000 {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                got_token = true;
                break;
            }
        }
        if !got_token {
            return Err(SdError::DataTokenTimeout(SD_CMD9));
        }
        if token != 0xFE {
            return Err(SdError::DataTokenUnexpected(SD_CMD9, token));
        }

        let mut block = [0u8; 16];
        for slot in &mut block {
            *slot = self.transfer_byte(0xFF)?;
        }
        // Read and discard CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(block)
    }

    pub(super) fn cs_high(&mut self) -> Result<(), SdError<SPI::Error, CS::Error>> {
        self.cs.set_high().map_err(SdError::Cs)
    }

    pub(super) fn end_transaction(&mut self) -> Result<(), SdError<SPI::Error, CS::Error>> {
        self.cs.set_high().map_err(SdError::Cs)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(())
    }
}

impl<SPI, CS, D> BlockDevice for SdSpiDevice<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = SdError<SPI::Error, CS::Error>;

    fn read_sectors(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(SdError::UnalignedLength(buf.len()));
        }
        for (offset, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(lba.saturating_add(offset as u32), chunk)?;
        }
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(SdError::UnalignedLength(buf.len()));
        }
        for (offset, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            self.write_sector(lba.saturating_add(offset as u32), chunk)?;
        }
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        if self.high_capacity.is_none() {
            return Err(SdError::NotInitialized);
        }
        Ok(self.capacity_sectors)
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        // Write busy is waited out inside write_sector; give the card a few
        // trailing clocks with CS released.
        self.cs_high()?;
        self.send_dummy_clocks(1)
    }
}
