//! SPI NOR command descriptors.
//!
//! [`SAFE_OPS`] is the fixed battery of read-only identification and status
//! commands run by `FlashProbe::transfer_safe_battery`. Table order is
//! load-bearing: the report renderer walks the same table to recover each
//! command's payload offset inside the battery buffer, so reordering
//! entries is a wire-format change for every report consumer.

/// Write Enable latch, required before any program or erase.
pub const OP_WRITE_ENABLE: u8 = 0x06;
/// Status register 1; bit 0 is the busy flag.
pub const OP_READ_STATUS_1: u8 = 0x05;
pub const OP_READ_STATUS_2: u8 = 0x35;
pub const OP_READ_STATUS_3: u8 = 0x15;
/// Sequential read with a 3-byte address and no dummy cycles.
pub const OP_READ_DATA: u8 = 0x03;
pub const OP_PAGE_PROGRAM: u8 = 0x02;
pub const OP_SECTOR_ERASE_4K: u8 = 0x20;
pub const OP_JEDEC_ID: u8 = 0x9F;
pub const OP_LEGACY_ID: u8 = 0x90;
pub const OP_ELECTRONIC_SIGNATURE: u8 = 0xAB;
pub const OP_UNIQUE_ID: u8 = 0x4B;
pub const OP_SFDP_READ: u8 = 0x5A;
/// Parks the chip until a release command or power cycle; the fuzz
/// scanner refuses to transmit it.
pub const OP_DEEP_POWER_DOWN: u8 = 0xB9;

/// Payload length of the SFDP parameter-header battery row. Also how the
/// battery loop tells the two 0x5A rows apart.
pub const SFDP_PARAM_HEADERS_LEN: usize = 24;

/// One entry of the safe-operation battery.
///
/// `tx_len` counts the opcode plus any address and dummy bytes clocked out
/// first; `rx_data_len` bytes are clocked in afterwards. The two phases
/// never overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmdSpec {
    pub opcode: u8,
    pub tx_len: usize,
    pub rx_data_len: usize,
    pub description: &'static str,
}

impl CmdSpec {
    const fn new(opcode: u8, tx_len: usize, rx_data_len: usize, description: &'static str) -> Self {
        Self {
            opcode,
            tx_len,
            rx_data_len,
            description,
        }
    }
}

/// The read-only battery, in wire order.
pub static SAFE_OPS: [CmdSpec; 9] = [
    CmdSpec::new(OP_JEDEC_ID, 1, 3, "JEDEC ID"),
    CmdSpec::new(OP_READ_STATUS_1, 1, 1, "Read Status Register 1"),
    CmdSpec::new(OP_READ_STATUS_2, 1, 1, "Read Status Register 2"),
    CmdSpec::new(OP_READ_STATUS_3, 1, 1, "Read Status Register 3"),
    CmdSpec::new(OP_LEGACY_ID, 4, 2, "Read Mfr/Device ID (Legacy)"),
    CmdSpec::new(OP_ELECTRONIC_SIGNATURE, 4, 1, "Read Electronic Signature"),
    CmdSpec::new(OP_UNIQUE_ID, 5, 8, "Read Unique ID (64-bit)"),
    CmdSpec::new(OP_SFDP_READ, 5, 8, "Read SFDP Header"),
    CmdSpec::new(OP_SFDP_READ, 5, SFDP_PARAM_HEADERS_LEN, "Read SFDP Parameter Headers"),
];

/// Total battery payload size, which is the exact capacity
/// `transfer_safe_battery` requires of its output buffer.
pub fn expected_report_size() -> usize {
    SAFE_OPS.iter().map(|cmd| cmd.rx_data_len).sum()
}

pub fn command_count() -> usize {
    SAFE_OPS.len()
}

pub fn command_by_index(index: usize) -> Option<&'static CmdSpec> {
    SAFE_OPS.get(index)
}
