//! Minimal FAT12/16/32 driver over a [`BlockDevice`]. Single root-directory
//! sector, 8.3 names only, no subdirectories.
//!
//! There is no cluster-chain allocator: file data lives in the contiguous
//! region starting one cluster past the root directory, addressed by plain
//! sector arithmetic, and created entries get a fixed placeholder first
//! cluster. Callers must treat this as a scratch volume for a handful of
//! report files, not as a general-purpose filesystem.

mod dir;
mod file;
mod names;

use log::{debug, warn};

pub use dir::{FileInfo, RootDir};
pub use file::{File, OpenMode};

use crate::blockdev::{BlockDevice, SECTOR_SIZE};

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const ROOT_DIR_ENTRIES: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;
pub(crate) const ENTRY_FREE: u8 = 0xE5;
pub(crate) const ENTRY_END: u8 = 0x00;
pub(crate) const ATTR_ARCHIVE: u8 = 0x20;
pub(crate) const ATTR_VOLUME: u8 = 0x08;
pub(crate) const PLACEHOLDER_CLUSTER: u32 = 3;

#[derive(Debug)]
pub enum FatError<E> {
    Io(E),
    NotReady,
    NoFilesystem,
    NoFile,
    InvalidName,
    DirFull,
}

#[derive(Clone, Copy)]
pub(crate) struct Volume {
    pub(crate) volume_base: u32,
    pub(crate) fat_base: u32,
    pub(crate) dir_base: u32,
    pub(crate) sectors_per_cluster: u8,
    pub(crate) fat_count: u8,
    pub(crate) fat_size_sectors: u32,
}

impl Volume {
    /// First data sector: one cluster past the root directory.
    pub(crate) fn data_base(&self) -> u32 {
        self.dir_base
            .saturating_add(self.sectors_per_cluster as u32)
    }
}

pub struct FatFs<D> {
    dev: D,
    volume: Option<Volume>,
}

impl<D: BlockDevice> FatFs<D> {
    pub fn new(dev: D) -> Self {
        Self { dev, volume: None }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// Forgets the mounted volume, e.g. after a media change.
    pub fn invalidate(&mut self) {
        self.volume = None;
    }

    pub fn release(self) -> D {
        self.dev
    }

    /// Reads and validates the boot sector, following the first FAT-type
    /// MBR partition entry when sector 0 is a partition table. Mounting an
    /// already-mounted volume is a no-op success.
    pub fn mount(&mut self) -> Result<(), FatError<D::Error>> {
        if self.volume.is_some() {
            debug!("fat: mount_noop");
            return Ok(());
        }

        let mut sector = [0u8; SECTOR_SIZE];
        self.dev.read_sectors(0, &mut sector).map_err(FatError::Io)?;
        if !has_boot_signature(&sector) {
            warn!("fat: mount_error reason=bad_signature");
            return Err(FatError::NoFilesystem);
        }

        let mut partition_start = 0u32;
        let part_type = sector[446 + 4];
        if part_type != 0 {
            if !matches!(part_type, 0x06 | 0x0B | 0x0C) {
                warn!(
                    "fat: mount_error reason=partition_type value={:#04x}",
                    part_type
                );
                return Err(FatError::NoFilesystem);
            }
            partition_start = u32::from_le_bytes([
                sector[446 + 8],
                sector[446 + 9],
                sector[446 + 10],
                sector[446 + 11],
            ]);
            self.dev
                .read_sectors(partition_start, &mut sector)
                .map_err(FatError::Io)?;
            if !has_boot_signature(&sector) {
                warn!(
                    "fat: mount_error reason=bad_partition_signature start={}",
                    partition_start
                );
                return Err(FatError::NoFilesystem);
            }
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        if bytes_per_sector as usize != SECTOR_SIZE {
            warn!(
                "fat: mount_error reason=sector_size value={}",
                bytes_per_sector
            );
            return Err(FatError::NoFilesystem);
        }

        let sectors_per_cluster = sector[13];
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]) as u32;
        let fat_count = sector[16];
        if sectors_per_cluster == 0 || fat_count == 0 {
            warn!(
                "fat: mount_error reason=bad_params csize={} fats={}",
                sectors_per_cluster, fat_count
            );
            return Err(FatError::NoFilesystem);
        }

        let root_entries = u16::from_le_bytes([sector[17], sector[18]]);
        let fat_size_16 = u16::from_le_bytes([sector[22], sector[23]]) as u32;
        let fat_size_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let fat_size = if fat_size_16 != 0 {
            fat_size_16
        } else {
            fat_size_32
        };
        if fat_size == 0 {
            warn!("fat: mount_error reason=fat_size_zero");
            return Err(FatError::NoFilesystem);
        }

        let fat_base = partition_start.saturating_add(reserved_sectors);
        let fat_area = fat_size.saturating_mul(fat_count as u32);
        // RootEntCnt == 0 marks FAT32; its root directory sits inside the
        // data area, offset by the root cluster. FAT12/16 keep a fixed root
        // region right after the FAT copies.
        let dir_base = if root_entries == 0 {
            let raw_root = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);
            let root_cluster = if raw_root == 0 { 2 } else { raw_root };
            fat_base.saturating_add(fat_area).saturating_add(
                root_cluster
                    .saturating_sub(2)
                    .saturating_mul(sectors_per_cluster as u32),
            )
        } else {
            fat_base.saturating_add(fat_area)
        };

        self.volume = Some(Volume {
            volume_base: partition_start,
            fat_base,
            dir_base,
            sectors_per_cluster,
            fat_count,
            fat_size_sectors: fat_size,
        });
        debug!(
            "fat: mount_ok volbase={} fatbase={} dirbase={} csize={} fats={} fat_sectors={}",
            partition_start, fat_base, dir_base, sectors_per_cluster, fat_count, fat_size
        );
        Ok(())
    }

    pub(crate) fn require_volume(&self) -> Result<Volume, FatError<D::Error>> {
        self.volume.ok_or(FatError::NotReady)
    }
}

fn has_boot_signature(sector: &[u8; SECTOR_SIZE]) -> bool {
    sector[510] == 0x55 && sector[511] == 0xAA
}
