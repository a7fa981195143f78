use super::names::{decode_short_name, encode_short_name, SHORT_NAME_MAX, SHORT_NAME_RAW};
use super::{
    FatError, FatFs, ATTR_ARCHIVE, ATTR_VOLUME, DIR_ENTRY_SIZE, ENTRY_END, ENTRY_FREE,
    PLACEHOLDER_CLUSTER, ROOT_DIR_ENTRIES,
};
use crate::blockdev::{BlockDevice, SECTOR_SIZE};

// Hosts without an RTC stamp a fixed write date, 2021-06-08.
const WRITE_TIME_FIXED: u16 = 0x0000;
const WRITE_DATE_FIXED: u16 = 0x52C8;

#[derive(Clone, Copy)]
pub struct FileInfo {
    pub name: [u8; SHORT_NAME_MAX],
    pub name_len: u8,
    pub attr: u8,
    pub size: u32,
}

impl FileInfo {
    pub const EMPTY: Self = Self {
        name: [0; SHORT_NAME_MAX],
        name_len: 0,
        attr: 0,
        size: 0,
    };

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

/// Cursor over the 16-entry root directory sector.
pub struct RootDir {
    index: u8,
}

impl RootDir {
    pub fn new() -> Self {
        Self { index: 0 }
    }
}

impl Default for RootDir {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: BlockDevice> FatFs<D> {
    /// Returns the next live root-directory entry, or `None` once the end
    /// marker is reached. Deleted and volume-label slots are skipped.
    pub fn read_dir_entry(
        &mut self,
        dir: &mut RootDir,
    ) -> Result<Option<FileInfo>, FatError<D::Error>> {
        let volume = self.require_volume()?;
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev
            .read_sectors(volume.dir_base, &mut sector)
            .map_err(FatError::Io)?;

        while (dir.index as usize) < ROOT_DIR_ENTRIES {
            let index = dir.index as usize;
            let first = entry_first_byte(&sector, index);
            if first == ENTRY_END {
                return Ok(None);
            }
            dir.index += 1;
            if first == ENTRY_FREE {
                continue;
            }
            if entry_attr(&sector, index) & ATTR_VOLUME != 0 {
                continue;
            }
            return Ok(Some(build_file_info(&sector, index)));
        }
        Ok(None)
    }

    pub fn list_dir(&mut self, out: &mut [FileInfo]) -> Result<usize, FatError<D::Error>> {
        let mut dir = RootDir::new();
        let mut count = 0usize;
        while count < out.len() {
            match self.read_dir_entry(&mut dir)? {
                Some(info) => {
                    out[count] = info;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    pub fn stat(&mut self, name: &str) -> Result<FileInfo, FatError<D::Error>> {
        let volume = self.require_volume()?;
        let raw = encode_short_name(name).ok_or(FatError::InvalidName)?;
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev
            .read_sectors(volume.dir_base, &mut sector)
            .map_err(FatError::Io)?;

        for index in 0..ROOT_DIR_ENTRIES {
            let first = entry_first_byte(&sector, index);
            if first == ENTRY_END {
                break;
            }
            if first == ENTRY_FREE {
                continue;
            }
            if entry_raw_name(&sector, index) == raw {
                return Ok(build_file_info(&sector, index));
            }
        }
        Err(FatError::NoFile)
    }
}

fn build_file_info(sector: &[u8; SECTOR_SIZE], index: usize) -> FileInfo {
    let raw = entry_raw_name(sector, index);
    let mut info = FileInfo::EMPTY;
    info.name_len = decode_short_name(&raw, &mut info.name) as u8;
    info.attr = entry_attr(sector, index);
    info.size = entry_size(sector, index);
    info
}

pub(super) fn entry_first_byte(sector: &[u8; SECTOR_SIZE], index: usize) -> u8 {
    sector[index * DIR_ENTRY_SIZE]
}

pub(super) fn entry_raw_name(sector: &[u8; SECTOR_SIZE], index: usize) -> [u8; SHORT_NAME_RAW] {
    let base = index * DIR_ENTRY_SIZE;
    let mut name = [0u8; SHORT_NAME_RAW];
    name.copy_from_slice(&sector[base..base + SHORT_NAME_RAW]);
    name
}

pub(super) fn entry_attr(sector: &[u8; SECTOR_SIZE], index: usize) -> u8 {
    sector[index * DIR_ENTRY_SIZE + 11]
}

pub(super) fn set_entry_attr(sector: &mut [u8; SECTOR_SIZE], index: usize, attr: u8) {
    sector[index * DIR_ENTRY_SIZE + 11] = attr;
}

pub(super) fn entry_first_cluster(sector: &[u8; SECTOR_SIZE], index: usize) -> u32 {
    let base = index * DIR_ENTRY_SIZE;
    let lo = u16::from_le_bytes([sector[base + 26], sector[base + 27]]) as u32;
    let hi = u16::from_le_bytes([sector[base + 20], sector[base + 21]]) as u32;
    lo | (hi << 16)
}

pub(super) fn entry_first_cluster_lo(sector: &[u8; SECTOR_SIZE], index: usize) -> u16 {
    let base = index * DIR_ENTRY_SIZE;
    u16::from_le_bytes([sector[base + 26], sector[base + 27]])
}

pub(super) fn set_entry_first_cluster_lo(
    sector: &mut [u8; SECTOR_SIZE],
    index: usize,
    cluster: u16,
) {
    let base = index * DIR_ENTRY_SIZE;
    sector[base + 26..base + 28].copy_from_slice(&cluster.to_le_bytes());
}

pub(super) fn entry_size(sector: &[u8; SECTOR_SIZE], index: usize) -> u32 {
    let base = index * DIR_ENTRY_SIZE;
    u32::from_le_bytes([
        sector[base + 28],
        sector[base + 29],
        sector[base + 30],
        sector[base + 31],
    ])
}

pub(super) fn set_entry_size(sector: &mut [u8; SECTOR_SIZE], index: usize, size: u32) {
    let base = index * DIR_ENTRY_SIZE;
    sector[base + 28..base + 32].copy_from_slice(&size.to_le_bytes());
}

pub(super) fn stamp_entry_times(sector: &mut [u8; SECTOR_SIZE], index: usize) {
    let base = index * DIR_ENTRY_SIZE;
    let time = WRITE_TIME_FIXED.to_le_bytes();
    let date = WRITE_DATE_FIXED.to_le_bytes();
    sector[base + 13] = 0;
    sector[base + 14..base + 16].copy_from_slice(&time);
    sector[base + 16..base + 18].copy_from_slice(&date);
    sector[base + 18..base + 20].copy_from_slice(&date);
    sector[base + 22..base + 24].copy_from_slice(&time);
    sector[base + 24..base + 26].copy_from_slice(&date);
}

pub(super) fn write_new_entry(
    sector: &mut [u8; SECTOR_SIZE],
    index: usize,
    raw_name: &[u8; SHORT_NAME_RAW],
) {
    let base = index * DIR_ENTRY_SIZE;
    sector[base..base + DIR_ENTRY_SIZE].fill(0);
    sector[base..base + SHORT_NAME_RAW].copy_from_slice(raw_name);
    set_entry_attr(sector, index, ATTR_ARCHIVE);
    set_entry_first_cluster_lo(sector, index, PLACEHOLDER_CLUSTER as u16);
    stamp_entry_times(sector, index);
}
