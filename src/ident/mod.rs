//! Decoders for device identification payloads.

mod jedec;
mod sfdp;

pub use jedec::{capacity_bytes, decode_jedec, manufacturer_name, FlashIdentity};
pub use sfdp::{SfdpHeader, SfdpParamHeader};
