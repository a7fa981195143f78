//! SFDP decoding for the 0x5A battery rows.

/// The fixed 8-byte SFDP header at address 0x000000.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SfdpHeader {
    pub revision_major: u8,
    pub revision_minor: u8,
    /// True header count; the wire stores count minus one.
    pub param_header_count: usize,
    pub access_protocol: u8,
}

impl SfdpHeader {
    /// Validates the ASCII "SFDP" signature and unpacks the rest. A bad
    /// signature short-circuits without interpreting bytes 4..8.
    pub fn parse(bytes: &[u8; 8]) -> Option<Self> {
        if &bytes[..4] != b"SFDP" {
            return None;
        }
        Some(Self {
            revision_minor: bytes[4],
            revision_major: bytes[5],
            param_header_count: usize::from(bytes[6]) + 1,
            access_protocol: bytes[7],
        })
    }
}

/// One 8-byte parameter-header record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SfdpParamHeader {
    pub id: u16,
    pub revision: u8,
    /// Parameter table length in 32-bit words.
    pub length_dwords: u8,
    /// Byte address of the parameter table. Only 3 bytes wide on the
    /// wire; the record's final byte is reserved and never read.
    pub table_pointer: u32,
}

impl SfdpParamHeader {
    fn parse(record: &[u8; 8]) -> Self {
        Self {
            id: u16::from_le_bytes([record[0], record[1]]),
            revision: record[2],
            length_dwords: record[3],
            table_pointer: u32::from_le_bytes([record[4], record[5], record[6], 0]),
        }
    }

    pub fn length_bytes(&self) -> usize {
        usize::from(self.length_dwords) * 4
    }

    /// Splits the 24-byte parameter-header payload into its three
    /// records.
    pub fn parse_table(bytes: &[u8; 24]) -> [Self; 3] {
        let mut records = [Self::default(); 3];
        for (index, record) in records.iter_mut().enumerate() {
            let base = index * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[base..base + 8]);
            *record = Self::parse(&raw);
        }
        records
    }
}
