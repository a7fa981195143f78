//! Executes one diagnostic request against the probe and scratch volume.

use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use heapless::String;
use log::{info, warn};

use sdfat::fat::{FatError, FatFs, OpenMode};
use sdfat::BlockDevice;

use crate::probe::{FlashProbe, FuzzHit, ProbeError};
use crate::report::{render_report, ReportError};

use super::{
    DiagCode, DiagCommand, DiagRequest, DiagResult, ReportSlot, PROGRAM_CAPACITY, READ_CAPACITY,
    REPORT_CAPACITY,
};

/// File name the staged report is persisted under.
pub const REPORT_FILE: &str = "latest.json";

/// Runs `request` to completion and returns its result record. One log
/// line per request outcome.
///
/// `volume` is optional so a host without storage still serves every
/// command except persist.
pub fn process_request<M, SPI, CS, D, B>(
    request: &DiagRequest,
    probe: &mut FlashProbe<SPI, CS, D>,
    slot: &ReportSlot<M>,
    volume: Option<&mut FatFs<B>>,
) -> DiagResult
where
    M: RawMutex,
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    B: BlockDevice,
{
    match request.command {
        DiagCommand::Identify => run_identify(request.id, probe),
        DiagCommand::SafeReport => run_safe_report(request.id, probe, slot),
        DiagCommand::ReadData { address, len } => run_read(request.id, probe, address, len),
        DiagCommand::ProgramData { address, data, len } => {
            run_program(request.id, probe, address, &data, len)
        }
        DiagCommand::EraseSector { address } => run_erase(request.id, probe, address),
        DiagCommand::FuzzScan => run_fuzz(request.id, probe),
        DiagCommand::PersistReport => run_persist(request.id, slot, volume),
    }
}

fn run_identify<SPI, CS, D>(id: u32, probe: &mut FlashProbe<SPI, CS, D>) -> DiagResult
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    match probe.identify() {
        Ok(Some(identity)) => {
            info!(
                "diag[{}]: identify_ok mfr={:02X} name={} type={:02X} cap={:02X}",
                id,
                identity.manufacturer_id,
                identity.manufacturer_name,
                identity.memory_type,
                identity.capacity_code
            );
            let value = (u32::from(identity.manufacturer_id) << 16)
                | (u32::from(identity.memory_type) << 8)
                | u32::from(identity.capacity_code);
            DiagResult {
                id,
                code: DiagCode::Ok,
                value,
            }
        }
        Ok(None) => {
            warn!("diag[{}]: identify_no_device", id);
            DiagResult {
                id,
                code: DiagCode::NoDevice,
                value: 0,
            }
        }
        Err(err) => probe_failure(id, "identify", &err),
    }
}

fn run_safe_report<M, SPI, CS, D>(
    id: u32,
    probe: &mut FlashProbe<SPI, CS, D>,
    slot: &ReportSlot<M>,
) -> DiagResult
where
    M: RawMutex,
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    let mut battery = [0u8; 64];
    let battery_len = match probe.transfer_safe_battery(&mut battery) {
        Ok(len) => len,
        Err(err) => return probe_failure(id, "safe_report", &err),
    };

    let mut rendered = [0u8; REPORT_CAPACITY];
    let report_len = match render_report(&battery[..battery_len], &mut rendered) {
        Ok(len) => len,
        Err(ReportError::BufferTooSmall { needed }) => {
            warn!("diag[{}]: safe_report_render_overflow needed={}", id, needed);
            return DiagResult {
                id,
                code: DiagCode::BufferTooSmall,
                value: u32::try_from(needed).unwrap_or(u32::MAX),
            };
        }
    };

    match slot.publish(&rendered[..report_len]) {
        Some(sequence) => {
            info!("diag[{}]: safe_report_ok len={} seq={}", id, report_len, sequence);
            DiagResult {
                id,
                code: DiagCode::Ok,
                value: report_len as u32,
            }
        }
        None => {
            warn!("diag[{}]: safe_report_publish_overflow len={}", id, report_len);
            DiagResult {
                id,
                code: DiagCode::BufferTooSmall,
                value: report_len as u32,
            }
        }
    }
}

fn run_read<SPI, CS, D>(
    id: u32,
    probe: &mut FlashProbe<SPI, CS, D>,
    address: u32,
    len: u16,
) -> DiagResult
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    let len = usize::from(len);
    if len == 0 || len > READ_CAPACITY {
        warn!("diag[{}]: read_bad_len len={} max={}", id, len, READ_CAPACITY);
        return DiagResult {
            id,
            code: DiagCode::BadRequest,
            value: READ_CAPACITY as u32,
        };
    }
    let mut data = [0u8; READ_CAPACITY];
    if let Err(err) = probe.read_data(address, &mut data[..len]) {
        return probe_failure(id, "read", &err);
    }
    info!(
        "diag[{}]: read_ok addr={:#08x} len={} data={}",
        id,
        address,
        len,
        hex_preview(&data[..len])
    );
    DiagResult {
        id,
        code: DiagCode::Ok,
        value: len as u32,
    }
}

fn run_program<SPI, CS, D>(
    id: u32,
    probe: &mut FlashProbe<SPI, CS, D>,
    address: u32,
    data: &[u8; PROGRAM_CAPACITY],
    len: u16,
) -> DiagResult
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    let len = usize::from(len);
    if len == 0 || len > PROGRAM_CAPACITY {
        warn!("diag[{}]: program_bad_len len={} max={}", id, len, PROGRAM_CAPACITY);
        return DiagResult {
            id,
            code: DiagCode::BadRequest,
            value: PROGRAM_CAPACITY as u32,
        };
    }
    match probe.program(address, &data[..len]) {
        Ok(()) => {
            info!("diag[{}]: program_ok addr={:#08x} len={}", id, address, len);
            DiagResult {
                id,
                code: DiagCode::Ok,
                value: len as u32,
            }
        }
        Err(err) => probe_failure(id, "program", &err),
    }
}

fn run_erase<SPI, CS, D>(id: u32, probe: &mut FlashProbe<SPI, CS, D>, address: u32) -> DiagResult
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    match probe.erase_sector(address) {
        Ok(base) => {
            info!("diag[{}]: erase_ok addr={:#08x} base={:#08x}", id, address, base);
            DiagResult {
                id,
                code: DiagCode::Ok,
                value: base,
            }
        }
        Err(err) => probe_failure(id, "erase", &err),
    }
}

fn run_fuzz<SPI, CS, D>(id: u32, probe: &mut FlashProbe<SPI, CS, D>) -> DiagResult
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    const FUZZ_HIT_CAPACITY: usize = 32;
    let mut hits = [FuzzHit::EMPTY; FUZZ_HIT_CAPACITY];
    match probe.fuzz_scan(&mut hits) {
        Ok(count) => {
            info!("diag[{}]: fuzz_ok hits={}", id, count);
            for hit in hits.iter().take(count) {
                info!(
                    "diag[{}]: fuzz_hit opcode={:02X} data={}",
                    id,
                    hit.opcode,
                    hex_preview(&hit.response)
                );
            }
            DiagResult {
                id,
                code: DiagCode::Ok,
                value: count as u32,
            }
        }
        Err(err) => probe_failure(id, "fuzz", &err),
    }
}

fn run_persist<M, B>(id: u32, slot: &ReportSlot<M>, volume: Option<&mut FatFs<B>>) -> DiagResult
where
    M: RawMutex,
    B: BlockDevice,
{
    let fs = match volume {
        Some(fs) => fs,
        None => {
            warn!("diag[{}]: persist_no_volume", id);
            return DiagResult {
                id,
                code: DiagCode::NotReady,
                value: 0,
            };
        }
    };
    // Holding the slot for the whole write keeps the persisted file and
    // the staged bytes identical.
    slot.with_latest(|data, sequence| {
        if data.is_empty() {
            warn!("diag[{}]: persist_empty_report", id);
            return DiagResult {
                id,
                code: DiagCode::NoReport,
                value: 0,
            };
        }
        match write_report(fs, data) {
            Ok(written) => {
                info!(
                    "diag[{}]: persist_ok file={} len={} seq={}",
                    id, REPORT_FILE, written, sequence
                );
                DiagResult {
                    id,
                    code: DiagCode::Ok,
                    value: written as u32,
                }
            }
            Err(err) => {
                warn!("diag[{}]: persist_error err={:?}", id, err);
                DiagResult {
                    id,
                    code: fat_code(&err),
                    value: 0,
                }
            }
        }
    })
}

fn write_report<B: BlockDevice>(
    fs: &mut FatFs<B>,
    data: &[u8],
) -> Result<usize, FatError<B::Error>> {
    let mut file = fs.open(REPORT_FILE, OpenMode::WRITE | OpenMode::CREATE_ALWAYS)?;
    let written = fs.write(&mut file, data)?;
    fs.close(file)?;
    Ok(written)
}

fn probe_failure<SE, CE>(id: u32, op: &str, err: &ProbeError<SE, CE>) -> DiagResult
where
    SE: core::fmt::Debug,
    CE: core::fmt::Debug,
{
    warn!("diag[{}]: {}_error err={:?}", id, op, err);
    let code = match err {
        ProbeError::Spi(_) | ProbeError::Cs(_) => DiagCode::SpiFailed,
        ProbeError::NotReady => DiagCode::NotReady,
        ProbeError::BufferTooSmall { .. } => DiagCode::BufferTooSmall,
        ProbeError::WriteTimeout { .. } => DiagCode::WriteTimeout,
        ProbeError::EraseTimeout { .. } => DiagCode::EraseTimeout,
        ProbeError::NotAligned | ProbeError::OutOfBounds => DiagCode::BadRequest,
    };
    let value = match err {
        ProbeError::WriteTimeout { address } | ProbeError::EraseTimeout { address } => *address,
        ProbeError::BufferTooSmall { needed } => u32::try_from(*needed).unwrap_or(u32::MAX),
        _ => 0,
    };
    DiagResult { id, code, value }
}

fn fat_code<E>(err: &FatError<E>) -> DiagCode {
    match err {
        FatError::Io(_) => DiagCode::FsError,
        FatError::NotReady => DiagCode::NotReady,
        FatError::NoFilesystem => DiagCode::NoFilesystem,
        FatError::NoFile => DiagCode::NoFile,
        FatError::InvalidName => DiagCode::InvalidName,
        FatError::DirFull => DiagCode::DirFull,
    }
}

/// First bytes of a payload as hex for log lines, capped with a `+` when
/// truncated.
fn hex_preview(data: &[u8]) -> String<36> {
    let mut preview = String::new();
    for &byte in data.iter().take(16) {
        if write!(&mut preview, "{:02X}", byte).is_err() {
            break;
        }
    }
    if data.len() > 16 {
        let _ = preview.push('+');
    }
    preview
}
