//! Request plumbing for the diagnostic service.
//!
//! Surrounding transports (CLI, web, MQTT) submit [`DiagRequest`] values
//! through a bounded [`DiagQueue`] and read back [`DiagResult`] records
//! plus the staged JSON report in a [`ReportSlot`]. The queue and the
//! slot are the only resources shared across contexts; everything else is
//! owned by the worker that calls [`process_request`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TryReceiveError, TrySendError};

use heapless::Vec;

mod dispatch;
#[cfg(test)]
mod tests;

pub use dispatch::{process_request, REPORT_FILE};

/// Staged-report capacity. A full battery report stays well under this.
pub const REPORT_CAPACITY: usize = 2048;

/// Fixed payload capacity of a program request, one flash page.
pub const PROGRAM_CAPACITY: usize = 256;

/// Longest read a single request may ask for.
pub const READ_CAPACITY: usize = 256;

/// Commands a transport can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagCommand {
    /// Read and decode the JEDEC triple.
    Identify,
    /// Run the read-only battery and stage the JSON report.
    SafeReport,
    /// Read `len` bytes starting at `address`.
    ReadData { address: u32, len: u16 },
    /// Program the first `len` bytes of `data` at `address`.
    ProgramData {
        address: u32,
        data: [u8; PROGRAM_CAPACITY],
        len: u16,
    },
    /// Erase the 4 KiB sector containing `address`.
    EraseSector { address: u32 },
    /// Probe undocumented opcodes. Transports must confirm with the
    /// operator before submitting this one.
    FuzzScan,
    /// Write the staged report to the scratch volume.
    PersistReport,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagRequest {
    pub id: u32,
    pub command: DiagCommand,
}

/// Outcome classes reported back to transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagCode {
    Ok,
    /// Bus worked, device answered with an idle pattern.
    NoDevice,
    SpiFailed,
    NotReady,
    BufferTooSmall,
    WriteTimeout,
    EraseTimeout,
    /// Request parameters out of range for this build.
    BadRequest,
    /// Persist was asked for before any report was staged.
    NoReport,
    NoFilesystem,
    NoFile,
    InvalidName,
    DirFull,
    /// Block-device level failure underneath the filesystem.
    FsError,
}

/// One completed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagResult {
    pub id: u32,
    pub code: DiagCode,
    /// Operation-dependent detail: erased base address, staged report
    /// length, fuzz hit count, byte count moved, timeout address.
    pub value: u32,
}

struct ReportState {
    data: Vec<u8, REPORT_CAPACITY>,
    sequence: u32,
}

/// Mutex-wrapped staging buffer shared between the diagnostic worker and
/// transport contexts. Consumers hold the lock for the duration of one
/// closure; a full render-persist-publish sequence under the lock is fine
/// since these are operator-triggered, not a hot path.
pub struct ReportSlot<M: RawMutex> {
    inner: Mutex<M, RefCell<ReportState>>,
}

impl<M: RawMutex> ReportSlot<M> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ReportState {
                data: Vec::new(),
                sequence: 0,
            })),
        }
    }

    /// Replaces the staged report and returns the new sequence number.
    /// An oversized payload is rejected and the previous report stays.
    pub fn publish(&self, report: &[u8]) -> Option<u32> {
        self.inner.lock(|cell| {
            let mut state = cell.borrow_mut();
            if report.len() > REPORT_CAPACITY {
                return None;
            }
            state.data.clear();
            if state.data.extend_from_slice(report).is_err() {
                return None;
            }
            state.sequence = state.sequence.wrapping_add(1);
            Some(state.sequence)
        })
    }

    /// Runs `f` over the staged bytes and their sequence number without
    /// copying them out.
    pub fn with_latest<R>(&self, f: impl FnOnce(&[u8], u32) -> R) -> R {
        self.inner.lock(|cell| {
            let state = cell.borrow();
            f(&state.data, state.sequence)
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock(|cell| cell.borrow_mut().data.clear());
    }
}

impl<M: RawMutex> Default for ReportSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded request/result queues between transports and the worker.
/// Nothing blocks: a full queue is reported to the caller, and an empty
/// one reads as `None`.
pub struct DiagQueue<M: RawMutex, const DEPTH: usize> {
    requests: Channel<M, DiagRequest, DEPTH>,
    results: Channel<M, DiagResult, DEPTH>,
}

impl<M: RawMutex, const DEPTH: usize> DiagQueue<M, DEPTH> {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            results: Channel::new(),
        }
    }

    /// Queues a request; a full queue hands the request back.
    pub fn try_submit(&self, request: DiagRequest) -> Result<(), DiagRequest> {
        match self.requests.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) => Err(request),
        }
    }

    pub fn try_next_request(&self) -> Option<DiagRequest> {
        match self.requests.try_receive() {
            Ok(request) => Some(request),
            Err(TryReceiveError::Empty) => None,
        }
    }

    /// Publishes a completed result; a full queue hands it back.
    pub fn publish_result(&self, result: DiagResult) -> Result<(), DiagResult> {
        match self.results.try_send(result) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(result)) => Err(result),
        }
    }

    pub fn try_next_result(&self) -> Option<DiagResult> {
        match self.results.try_receive() {
            Ok(result) => Some(result),
            Err(TryReceiveError::Empty) => None,
        }
    }
}

impl<M: RawMutex, const DEPTH: usize> Default for DiagQueue<M, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}
