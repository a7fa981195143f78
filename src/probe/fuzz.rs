//! Opcode fuzz scanner for undocumented commands.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::cmds;

use super::{FlashProbe, ProbeError};

/// Response bytes captured per probed opcode.
pub const FUZZ_WINDOW: usize = 8;

/// Opcodes the scanner refuses to transmit. Deep power-down parks the
/// chip until a release command or power cycle, which would turn the
/// rest of the scan into noise.
pub const FUZZ_DENYLIST: [u8; 1] = [cmds::OP_DEEP_POWER_DOWN];

/// One opcode that answered with something other than the all-0x00 or
/// all-0xFF idle patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FuzzHit {
    pub opcode: u8,
    pub response: [u8; FUZZ_WINDOW],
}

impl FuzzHit {
    pub const EMPTY: Self = Self {
        opcode: 0,
        response: [0; FUZZ_WINDOW],
    };
}

impl<SPI, CS, D> FlashProbe<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Probes every opcode once, denylist aside, and records the ones
    /// that answered. Stops early once `hits` is full and returns how
    /// many entries were written.
    ///
    /// Undocumented opcodes can have side effects up to and including
    /// corrupting the array. This is a last resort for unidentified
    /// parts; callers are expected to gate it behind an explicit
    /// operator confirmation.
    pub fn fuzz_scan(
        &mut self,
        hits: &mut [FuzzHit],
    ) -> Result<usize, ProbeError<SPI::Error, CS::Error>> {
        let mut count = 0;
        for opcode in 0..=0xFFu8 {
            if FUZZ_DENYLIST.contains(&opcode) {
                continue;
            }
            if count >= hits.len() {
                break;
            }
            let mut response = [0u8; FUZZ_WINDOW];
            self.exchange(&[opcode], &mut response)?;
            if response.iter().all(|&b| b == 0x00) || response.iter().all(|&b| b == 0xFF) {
                continue;
            }
            hits[count] = FuzzHit { opcode, response };
            count += 1;
        }
        Ok(count)
    }
}
