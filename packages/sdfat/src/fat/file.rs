use super::dir::{
    entry_first_byte, entry_first_cluster, entry_first_cluster_lo, entry_raw_name, entry_size,
    set_entry_attr, set_entry_first_cluster_lo, set_entry_size, stamp_entry_times, write_new_entry,
};
use super::names::encode_short_name;
use super::{
    FatError, FatFs, ATTR_ARCHIVE, ENTRY_END, ENTRY_FREE, PLACEHOLDER_CLUSTER, ROOT_DIR_ENTRIES,
};
use crate::blockdev::{BlockDevice, SECTOR_SIZE};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    /// Create the file if absent, truncate it if present.
    pub const CREATE_ALWAYS: Self = Self(0x08);
    /// Create the file if absent, open it unchanged if present.
    pub const OPEN_ALWAYS: Self = Self(0x10);

    fn creates(self) -> bool {
        self.0 & (Self::CREATE_ALWAYS.0 | Self::OPEN_ALWAYS.0) != 0
    }

    fn truncates(self) -> bool {
        self.0 & Self::CREATE_ALWAYS.0 != 0
    }
}

impl core::ops::BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Open-file state: cursor, size, and the directory slot that gets
/// rewritten whenever the size changes. Closing goes through
/// [`FatFs::close`], which syncs the entry first.
pub struct File {
    cursor: u32,
    size: u32,
    first_cluster: u32,
    dir_sector: u32,
    dir_index: u8,
}

impl File {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.cursor
    }

    /// Moves the cursor, clamped to the current end of file.
    pub fn seek(&mut self, offset: u32) -> u32 {
        self.cursor = offset.min(self.size);
        self.cursor
    }
}

impl<D: BlockDevice> FatFs<D> {
    /// Looks the 8.3-mapped name up in the root directory; creates a fresh
    /// entry (written back immediately) when the mode allows it. The handle
    /// does not enforce read/write mode after open.
    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<File, FatError<D::Error>> {
        let volume = self.require_volume()?;
        let raw = encode_short_name(name).ok_or(FatError::InvalidName)?;
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev
            .read_sectors(volume.dir_base, &mut sector)
            .map_err(FatError::Io)?;

        let mut found: Option<usize> = None;
        for index in 0..ROOT_DIR_ENTRIES {
            let first = entry_first_byte(&sector, index);
            if first == ENTRY_END {
                break;
            }
            if first == ENTRY_FREE {
                continue;
            }
            if entry_raw_name(&sector, index) == raw {
                found = Some(index);
                break;
            }
        }

        if let Some(index) = found {
            let on_disk_cluster = entry_first_cluster(&sector, index);
            let mut file = File {
                cursor: 0,
                size: entry_size(&sector, index),
                first_cluster: if on_disk_cluster == 0 {
                    PLACEHOLDER_CLUSTER
                } else {
                    on_disk_cluster
                },
                dir_sector: volume.dir_base,
                dir_index: index as u8,
            };
            if mode.truncates() {
                file.size = 0;
                set_entry_size(&mut sector, index, 0);
                self.dev
                    .write_sectors(volume.dir_base, &sector)
                    .map_err(FatError::Io)?;
            }
            return Ok(file);
        }

        if !mode.creates() {
            return Err(FatError::NoFile);
        }

        for index in 0..ROOT_DIR_ENTRIES {
            let first = entry_first_byte(&sector, index);
            if first == ENTRY_END || first == ENTRY_FREE {
                write_new_entry(&mut sector, index, &raw);
                self.dev
                    .write_sectors(volume.dir_base, &sector)
                    .map_err(FatError::Io)?;
                self.dev.sync().map_err(FatError::Io)?;
                return Ok(File {
                    cursor: 0,
                    size: 0,
                    first_cluster: PLACEHOLDER_CLUSTER,
                    dir_sector: volume.dir_base,
                    dir_index: index as u8,
                });
            }
        }
        Err(FatError::DirFull)
    }

    /// Reads from the cursor, clamped to end of file. Short reads are
    /// normal at EOF, never an error.
    pub fn read(&mut self, file: &mut File, out: &mut [u8]) -> Result<usize, FatError<D::Error>> {
        let volume = self.require_volume()?;
        let in_file = file.size.saturating_sub(file.cursor) as usize;
        let mut remain = out.len().min(in_file);
        let data_base = volume.data_base();
        let mut sector = [0u8; SECTOR_SIZE];
        let mut copied = 0usize;

        while remain > 0 {
            let target = data_base + file.cursor / SECTOR_SIZE as u32;
            let offset = (file.cursor % SECTOR_SIZE as u32) as usize;
            self.dev
                .read_sectors(target, &mut sector)
                .map_err(FatError::Io)?;

            let chunk = remain.min(SECTOR_SIZE - offset);
            out[copied..copied + chunk].copy_from_slice(&sector[offset..offset + chunk]);
            copied += chunk;
            remain -= chunk;
            file.cursor += chunk as u32;
        }
        Ok(copied)
    }

    /// Read-modify-write per touched sector, then refreshes the directory
    /// entry's size so the on-disk entry tracks every write.
    pub fn write(&mut self, file: &mut File, data: &[u8]) -> Result<usize, FatError<D::Error>> {
        let volume = self.require_volume()?;
        if data.is_empty() {
            return Ok(0);
        }

        let data_base = volume.data_base();
        let mut sector = [0u8; SECTOR_SIZE];
        let mut written = 0usize;

        while written < data.len() {
            let target = data_base + file.cursor / SECTOR_SIZE as u32;
            let offset = (file.cursor % SECTOR_SIZE as u32) as usize;
            self.dev
                .read_sectors(target, &mut sector)
                .map_err(FatError::Io)?;

            let chunk = (data.len() - written).min(SECTOR_SIZE - offset);
            sector[offset..offset + chunk].copy_from_slice(&data[written..written + chunk]);
            self.dev
                .write_sectors(target, &sector)
                .map_err(FatError::Io)?;

            written += chunk;
            file.cursor += chunk as u32;
            if file.cursor > file.size {
                file.size = file.cursor;
            }
        }

        self.update_entry_after_write(file)?;
        Ok(written)
    }

    /// Rewrites the directory entry from the handle state and flushes the
    /// device. A handle that is opened, written, and closed is durable
    /// without an explicit sync.
    pub fn sync(&mut self, file: &File) -> Result<(), FatError<D::Error>> {
        self.require_volume()?;
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev
            .read_sectors(file.dir_sector, &mut sector)
            .map_err(FatError::Io)?;

        let index = file.dir_index as usize;
        set_entry_size(&mut sector, index, file.size);
        if entry_first_cluster_lo(&sector, index) == 0 && file.size > 0 {
            set_entry_first_cluster_lo(&mut sector, index, file.first_cluster as u16);
        }
        set_entry_attr(&mut sector, index, ATTR_ARCHIVE);
        stamp_entry_times(&mut sector, index);

        self.dev
            .write_sectors(file.dir_sector, &sector)
            .map_err(FatError::Io)?;
        self.dev.sync().map_err(FatError::Io)?;
        Ok(())
    }

    pub fn close(&mut self, file: File) -> Result<(), FatError<D::Error>> {
        self.sync(&file)
    }

    fn update_entry_after_write(&mut self, file: &File) -> Result<(), FatError<D::Error>> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev
            .read_sectors(file.dir_sector, &mut sector)
            .map_err(FatError::Io)?;

        let index = file.dir_index as usize;
        if entry_first_cluster_lo(&sector, index) == 0 {
            set_entry_first_cluster_lo(&mut sector, index, file.first_cluster as u16);
        }
        set_entry_size(&mut sector, index, file.size);

        self.dev
            .write_sectors(file.dir_sector, &sector)
            .map_err(FatError::Io)?;
        Ok(())
    }
}
