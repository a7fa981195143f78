//! JEDEC ID decoding (command 0x9F).

/// Decoded identification triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashIdentity {
    pub manufacturer_id: u8,
    pub manufacturer_name: &'static str,
    pub memory_type: u8,
    pub capacity_code: u8,
    /// `None` when the capacity code does not decode, see
    /// [`capacity_bytes`].
    pub capacity_bytes: Option<u64>,
}

/// Manufacturer byte to vendor name. Bank switching via 0x7F continuation
/// codes is not handled; single-byte IDs cover the parts this tool meets
/// in practice.
const MANUFACTURERS: [(u8, &str); 15] = [
    (0x01, "Spansion / Cypress"),
    (0x0B, "XTX"),
    (0x1F, "Atmel / Adesto"),
    (0x20, "Micron / ST"),
    (0x37, "AMIC"),
    (0x5E, "Zbit"),
    (0x68, "Boya"),
    (0x85, "Puya"),
    (0x8C, "ESMT"),
    (0x9D, "ISSI"),
    (0xA1, "Fudan"),
    (0xBF, "SST / Microchip"),
    (0xC2, "Macronix"),
    (0xC8, "GigaDevice"),
    (0xEF, "Winbond"),
];

pub fn manufacturer_name(manufacturer_id: u8) -> &'static str {
    for (id, name) in MANUFACTURERS.iter() {
        if *id == manufacturer_id {
            return name;
        }
    }
    "Unknown Manufacturer"
}

/// Capacity codes are power-of-two exponents. Codes below 8 or above 62
/// are vendor-specific encodings or garbage, so no byte count is derived
/// for them.
pub fn capacity_bytes(capacity_code: u8) -> Option<u64> {
    if (8..63).contains(&capacity_code) {
        Some(1u64 << capacity_code)
    } else {
        None
    }
}

/// Decodes the 0x9F triple. The all-0x00 and all-0xFF patterns are what a
/// floating or absent bus reads back and yield `None`; an unknown
/// manufacturer byte still decodes, just with a placeholder name.
pub fn decode_jedec(
    manufacturer_id: u8,
    memory_type: u8,
    capacity_code: u8,
) -> Option<FlashIdentity> {
    let triple = [manufacturer_id, memory_type, capacity_code];
    if triple == [0x00; 3] || triple == [0xFF; 3] {
        return None;
    }
    Some(FlashIdentity {
        manufacturer_id,
        manufacturer_name: manufacturer_name(manufacturer_id),
        memory_type,
        capacity_code,
        capacity_bytes: capacity_bytes(capacity_code),
    })
}
