//! SPI NOR flash diagnostics.
//!
//! The crate is organized around a transfer engine ([`probe::FlashProbe`])
//! that owns the bus for the duration of every operation, a fixed battery
//! of read-only identification commands ([`cmds::SAFE_OPS`]), decoders for
//! the JEDEC and SFDP payloads ([`ident`]), a canonical JSON report
//! renderer ([`report`]) and the request plumbing that ties them to
//! surrounding transports ([`runtime`]). Reports can be persisted to a
//! scratch FAT volume through the `sdfat` companion crate.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod cmds;
pub mod ident;
pub mod probe;
pub mod report;
pub mod runtime;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use probe::{FlashProbe, ProbeError};
