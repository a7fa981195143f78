//! SPI NOR transfer engine.
//!
//! [`FlashProbe`] owns the bus, the chip-select line and a delay source,
//! so every operation is one complete assert..deassert window and two
//! operations can never interleave on the wire. Methods take `&mut self`;
//! holding the probe exclusively is what serializes bus traffic, including
//! the busy-poll loops inside program and erase.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::cmds::{self, CmdSpec};
use crate::ident::{self, FlashIdentity};

mod fuzz;
mod program;

pub use fuzz::{FuzzHit, FUZZ_DENYLIST, FUZZ_WINDOW};
pub use program::{ERASE_SECTOR_SIZE, PAGE_SIZE};

/// Covers opcode, 3-byte address and dummy bytes for every built-in
/// command frame.
const FRAME_LEN: usize = 8;

/// Busy flag in status register 1.
const STATUS_BUSY: u8 = 0x01;

/// Bounded busy-flag poll: up to `attempts` status reads spaced
/// `interval_us` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusyPoll {
    pub attempts: u32,
    pub interval_us: u32,
}

/// Page programs finish within a few milliseconds; 50 ms of headroom.
pub const PROGRAM_POLL: BusyPoll = BusyPoll {
    attempts: 500,
    interval_us: 100,
};

/// Sector erases run 50 to 400 ms depending on the chip.
pub const ERASE_POLL: BusyPoll = BusyPoll {
    attempts: 5_000,
    interval_us: 100,
};

/// Errors surfaced by the transfer engine. `SE` and `CE` are the bus and
/// chip-select error types of the host HAL.
#[derive(Debug)]
pub enum ProbeError<SE, CE> {
    /// SPI transfer failed.
    Spi(SE),
    /// Chip-select pin could not be driven.
    Cs(CE),
    /// Device identity has not been read yet, so the capacity needed for
    /// this operation is unknown.
    NotReady,
    /// Caller-supplied buffer cannot hold the result.
    BufferTooSmall { needed: usize },
    /// Busy flag never cleared after programming the page at `address`.
    WriteTimeout { address: u32 },
    /// Busy flag never cleared after erasing the sector at `address`.
    EraseTimeout { address: u32 },
    /// Range violates the alignment rules of the storage face.
    NotAligned,
    /// Range extends past the device capacity.
    OutOfBounds,
}

/// Flash probe over a raw SPI bus (mode 0, chip-select active-low).
///
/// The bus must already be configured at a rate the target part accepts;
/// the probe never touches clocking.
pub struct FlashProbe<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    capacity_bytes: Option<u64>,
}

impl<SPI, CS, D> FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Takes ownership of the bus and parks chip-select high.
    pub fn new(spi: SPI, mut cs: CS, delay: D) -> Result<Self, ProbeError<SPI::Error, CS::Error>> {
        cs.set_high().map_err(ProbeError::Cs)?;
        Ok(Self {
            spi,
            cs,
            delay,
            capacity_bytes: None,
        })
    }

    /// Gives the bus, pin and delay source back.
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    /// Device capacity learned from the last successful [`identify`]
    /// call, if the capacity code was decodable.
    ///
    /// [`identify`]: Self::identify
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.capacity_bytes
    }

    /// Executes one command descriptor as a single chip-select window.
    ///
    /// The first frame byte is always `cmd.opcode`; bytes 1.. are taken
    /// from `tx` and zero-filled past its end. A descriptor with
    /// `tx_len == 0` is malformed and short-circuits to `Ok(0)` without
    /// any bus activity. On success exactly `cmd.rx_data_len` bytes are
    /// written into `rx` and that count is returned.
    pub fn transfer_one(
        &mut self,
        cmd: &CmdSpec,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<usize, ProbeError<SPI::Error, CS::Error>> {
        if cmd.tx_len == 0 {
            return Ok(0);
        }
        if rx.len() < cmd.rx_data_len {
            return Err(ProbeError::BufferTooSmall {
                needed: cmd.rx_data_len,
            });
        }

        let mut frame = [0u8; FRAME_LEN];
        let head_len = cmd.tx_len.min(FRAME_LEN);
        let copy_len = tx.len().min(head_len);
        frame[..copy_len].copy_from_slice(&tx[..copy_len]);
        frame[0] = cmd.opcode;

        self.select()?;
        let result = self.clock_frame(
            &frame[..head_len],
            cmd.tx_len - head_len,
            &mut rx[..cmd.rx_data_len],
        );
        self.finish(result)?;
        Ok(cmd.rx_data_len)
    }

    /// Runs the whole read-only battery into `out` and returns the total
    /// payload length.
    ///
    /// The output is the concatenation of every command's response in
    /// table order. The capacity check runs before any bus traffic, so a
    /// failed call leaves both the buffer and the device untouched.
    pub fn transfer_safe_battery(
        &mut self,
        out: &mut [u8],
    ) -> Result<usize, ProbeError<SPI::Error, CS::Error>> {
        let needed = cmds::expected_report_size();
        if out.len() < needed {
            return Err(ProbeError::BufferTooSmall { needed });
        }
        out.fill(0);

        let mut offset = 0;
        for cmd in cmds::SAFE_OPS.iter() {
            let mut tx = [0u8; FRAME_LEN];
            if cmd.opcode == cmds::OP_SFDP_READ && cmd.rx_data_len == cmds::SFDP_PARAM_HEADERS_LEN {
                // Parameter headers live at SFDP address 0x000008.
                tx[1] = 0x08;
            }
            let end = offset + cmd.rx_data_len;
            self.transfer_one(cmd, &tx, &mut out[offset..end])?;
            offset = end;
        }
        Ok(offset)
    }

    /// Reads and decodes the JEDEC identification triple.
    ///
    /// `Ok(None)` means the transfer worked but the device answered with
    /// one of the all-0x00/all-0xFF "nobody home" patterns. A successful
    /// decode is cached so the storage face can bound its addresses.
    pub fn identify(&mut self) -> Result<Option<FlashIdentity>, ProbeError<SPI::Error, CS::Error>> {
        let mut raw = [0u8; 3];
        self.exchange(&[cmds::OP_JEDEC_ID], &mut raw)?;
        let identity = ident::decode_jedec(raw[0], raw[1], raw[2]);
        if let Some(identity) = &identity {
            self.capacity_bytes = identity.capacity_bytes;
        }
        Ok(identity)
    }

    /// Plain read (0x03) of `out.len()` bytes starting at `address`.
    /// Addresses are 24-bit; the top byte of `address` never reaches the
    /// wire.
    pub fn read_data(
        &mut self,
        address: u32,
        out: &mut [u8],
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        let frame = command_with_address(cmds::OP_READ_DATA, address);
        self.exchange(&frame, out)
    }

    /// Reads one status register (`OP_READ_STATUS_1`/`_2`/`_3`).
    pub fn status_register(&mut self, opcode: u8) -> Result<u8, ProbeError<SPI::Error, CS::Error>> {
        let mut value = [0u8; 1];
        self.exchange(&[opcode], &mut value)?;
        Ok(value[0])
    }

    pub fn is_busy(&mut self) -> Result<bool, ProbeError<SPI::Error, CS::Error>> {
        Ok(self.status_register(cmds::OP_READ_STATUS_1)? & STATUS_BUSY != 0)
    }

    fn write_enable(&mut self) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        self.exchange(&[cmds::OP_WRITE_ENABLE], &mut [])
    }

    /// Polls the busy flag until it clears or the attempt budget runs
    /// out. `Ok(false)` is the timeout case.
    fn wait_ready(&mut self, poll: BusyPoll) -> Result<bool, ProbeError<SPI::Error, CS::Error>> {
        for _ in 0..poll.attempts {
            if !self.is_busy()? {
                return Ok(true);
            }
            self.delay.delay_us(poll.interval_us);
        }
        Ok(false)
    }

    /// One full chip-select window: clock `tx` out, then `rx.len()` bytes
    /// in.
    fn exchange(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        self.select()?;
        let result = self.clock_frame(tx, 0, rx);
        self.finish(result)
    }

    fn clock_frame(
        &mut self,
        head: &[u8],
        trailing_zeros: usize,
        rx: &mut [u8],
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        self.spi.write(head).map_err(ProbeError::Spi)?;
        let zeros = [0u8; FRAME_LEN];
        let mut remaining = trailing_zeros;
        while remaining > 0 {
            let span = remaining.min(zeros.len());
            self.spi.write(&zeros[..span]).map_err(ProbeError::Spi)?;
            remaining -= span;
        }
        if !rx.is_empty() {
            // The write may still sit in a FIFO; drain it before turning
            // the line around.
            self.spi.flush().map_err(ProbeError::Spi)?;
            self.spi.read(rx).map_err(ProbeError::Spi)?;
        }
        Ok(())
    }

    /// Clocks a command frame followed by a data payload in the current
    /// window.
    fn clock_write(
        &mut self,
        frame: &[u8],
        data: &[u8],
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        self.spi.write(frame).map_err(ProbeError::Spi)?;
        if !data.is_empty() {
            self.spi.write(data).map_err(ProbeError::Spi)?;
        }
        Ok(())
    }

    fn select(&mut self) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        self.cs.set_low().map_err(ProbeError::Cs)
    }

    /// Ends the chip-select window. A transfer that already failed still
    /// gets a best-effort deassert so the device is not left selected.
    fn finish(
        &mut self,
        result: Result<(), ProbeError<SPI::Error, CS::Error>>,
    ) -> Result<(), ProbeError<SPI::Error, CS::Error>> {
        match result {
            Ok(()) => {
                self.spi.flush().map_err(ProbeError::Spi)?;
                self.cs.set_high().map_err(ProbeError::Cs)
            }
            Err(err) => {
                let _ = self.spi.flush();
                let _ = self.cs.set_high();
                Err(err)
            }
        }
    }
}

fn command_with_address(opcode: u8, address: u32) -> [u8; 4] {
    [
        opcode,
        (address >> 16) as u8,
        (address >> 8) as u8,
        address as u8,
    ]
}
