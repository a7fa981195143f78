//! Program and erase paths. Both are write-enable / command / busy-poll
//! cycles; the poll budget is the only thing that differs.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::cmds;

use super::{command_with_address, FlashProbe, ProbeError, ERASE_POLL, PROGRAM_POLL};

/// Program page granularity. A page program that runs past a page
/// boundary wraps within the page and corrupts data, so writes are
/// chunked to never cross one.
pub const PAGE_SIZE: usize = 256;

/// Smallest erase granularity exposed here (command 0x20).
pub const ERASE_SECTOR_SIZE: usize = 4096;

impl<SPI, CS, D> FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Programs `data` starting at `address`, chunked to page boundaries.
    ///
    /// Every chunk is its own write-enable / page-program / busy-poll
    /// cycle. A poll timeout aborts the loop and names the failing
    /// chunk's address; chunks programmed before it stay programmed, and
    /// retrying is left to the caller since a stuck busy flag usually
    /// means a faulty part rather than a transient condition.
    pub fn program(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        let mut current = address;
        let mut remaining = data;
        while !remaining.is_empty() {
            let page_offset = current as usize % PAGE_SIZE;
            let chunk_len = remaining.len().min(PAGE_SIZE - page_offset);
            let (chunk, rest) = remaining.split_at(chunk_len);

            self.write_enable()?;
            let frame = command_with_address(cmds::OP_PAGE_PROGRAM, current);
            self.select()?;
            let result = self.clock_write(&frame, chunk);
            self.finish(result)?;
            if !self.wait_ready(PROGRAM_POLL)? {
                return Err(ProbeError::WriteTimeout { address: current });
            }

            current = current.wrapping_add(chunk_len as u32);
            remaining = rest;
        }
        Ok(())
    }

    /// Erases the 4 KiB sector containing `address` and returns the
    /// aligned base address actually erased.
    pub fn erase_sector(&mut self, address: u32) -> Result<u32, ProbeError<SPI::Error, CS::Error>> {
        let base = address & !(ERASE_SECTOR_SIZE as u32 - 1);

        self.write_enable()?;
        let frame = command_with_address(cmds::OP_SECTOR_ERASE_4K, base);
        self.select()?;
        let result = self.clock_write(&frame, &[]);
        self.finish(result)?;
        if !self.wait_ready(ERASE_POLL)? {
            return Err(ProbeError::EraseTimeout { address: base });
        }
        Ok(base)
    }
}
