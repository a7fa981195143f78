#![no_std]

#[cfg(test)]
extern crate std;

pub mod blockdev;
pub mod fat;
pub mod sd;

pub use blockdev::{BlockDevice, MemDisk, SECTOR_SIZE};
