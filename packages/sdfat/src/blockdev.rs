//! Sector-addressed storage boundary. The filesystem layer talks to storage
//! only through [`BlockDevice`]; it never speaks the bus protocol directly.

pub const SECTOR_SIZE: usize = 512;

/// Raw sector transport. `lba` addresses 512-byte blocks regardless of the
/// underlying medium; buffers must be a whole number of sectors long.
pub trait BlockDevice {
    type Error: core::fmt::Debug;

    fn read_sectors(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write_sectors(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error>;
    fn sector_count(&mut self) -> Result<u32, Self::Error>;
    fn sync(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum MemDiskError {
    OutOfRange { lba: u32 },
    UnalignedLength(usize),
}

/// RAM-backed loopback disk for host tests and dry runs.
pub struct MemDisk<const SECTORS: usize> {
    sectors: [[u8; SECTOR_SIZE]; SECTORS],
}

impl<const SECTORS: usize> MemDisk<SECTORS> {
    pub fn new() -> Self {
        Self {
            sectors: [[0; SECTOR_SIZE]; SECTORS],
        }
    }

    pub fn sector(&self, lba: u32) -> Option<&[u8; SECTOR_SIZE]> {
        self.sectors.get(lba as usize)
    }

    pub fn sector_mut(&mut self, lba: u32) -> Option<&mut [u8; SECTOR_SIZE]> {
        self.sectors.get_mut(lba as usize)
    }
}

impl<const SECTORS: usize> Default for MemDisk<SECTORS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SECTORS: usize> BlockDevice for MemDisk<SECTORS> {
    type Error = MemDiskError;

    fn read_sectors(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(MemDiskError::UnalignedLength(buf.len()));
        }
        for (offset, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let index = lba as usize + offset;
            let sector = self
                .sectors
                .get(index)
                .ok_or(MemDiskError::OutOfRange { lba: index as u32 })?;
            chunk.copy_from_slice(sector);
        }
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(MemDiskError::UnalignedLength(buf.len()));
        }
        for (offset, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            let index = lba as usize + offset;
            let sector = self
                .sectors
                .get_mut(index)
                .ok_or(MemDiskError::OutOfRange { lba: index as u32 })?;
            sector.copy_from_slice(chunk);
        }
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        Ok(SECTORS as u32)
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
