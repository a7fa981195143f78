use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::{debug, warn};

use super::{
    decode_capacity_bytes, SdCardVersion, SdError, SdSpiDevice, SdStatus, SD_ACMD41, SD_CMD0,
    SD_CMD16, SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9,
};
use crate::blockdev::SECTOR_SIZE;

impl<SPI, CS, D> SdSpiDevice<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Runs the SPI-mode init ladder and leaves the card ready for sector IO.
    pub fn init(&mut self) -> Result<SdStatus, SdError<SPI::Error, CS::Error>> {
        self.high_capacity = None;
        self.cached_sector_lba = None;

        self.cs_high()?;
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..16 {
            cmd0_r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            warn!("sd: init_error cmd=0 r1={:#04x}", cmd0_r1);
            return Err(SdError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)?;
        let card_version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                warn!("sd: init_error cmd=8 echo={:02x?}", r7);
                return Err(SdError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            SdCardVersion::V1
        } else {
            warn!("sd: init_error cmd=8 r1={:#04x}", cmd8_r1);
            return Err(SdError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = if card_version == SdCardVersion::V2 {
            0x4000_0000
        } else {
            0
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut acmd41_ok = false;
        for _ in 0..200 {
            let _ = self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])?;
            if acmd41_r1 == 0x00 {
                acmd41_ok = true;
                break;
            }
            self.delay.delay_ms(1);
        }
        if !acmd41_ok {
            warn!("sd: init_error cmd=41 r1={:#04x}", acmd41_r1);
            return Err(SdError::Acmd41Timeout(acmd41_r1));
        }

        if card_version == SdCardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SECTOR_SIZE as u32, 0xFF, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdError::Cmd16Unexpected(cmd16_r1));
            }
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdError::Cmd58Unexpected(cmd58_r1));
        }

        let cmd9_r1 = self.send_command_hold_cs(SD_CMD9, 0, 0xAF, &mut [])?;
        if cmd9_r1 != 0x00 {
            self.end_transaction()?;
            return Err(SdError::Cmd9Unexpected(cmd9_r1));
        }
        let csd = self.read_data_block()?;
        self.end_transaction()?;
        let capacity_bytes = decode_capacity_bytes(&csd).ok_or(SdError::CapacityDecodeFailed)?;
        let high_capacity = (ocr[0] & 0x40) != 0;

        self.high_capacity = Some(high_capacity);
        self.capacity_sectors = (capacity_bytes / SECTOR_SIZE as u64).min(u32::MAX as u64) as u32;

        let status = SdStatus {
            version: card_version,
            high_capacity,
            capacity_bytes,
        };
        debug!(
            "sd: init_ok version={:?} high_capacity={} sectors={}",
            card_version, high_capacity, self.capacity_sectors
        );
        Ok(status)
    }
}
