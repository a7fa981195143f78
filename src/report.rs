//! JSON report rendering.
//!
//! The report is assembled straight from the raw safe-battery payload.
//! Offsets are recovered by walking the command table in the same order
//! the transfer engine does, so the two sides cannot drift apart
//! independently. Output shape:
//!
//! ```json
//! {"device":{"jedec":{...}},"commands":[{"name":...,"opcode":...,"data":[...]},...]}
//! ```
//!
//! The `device.jedec` object only appears when the battery covers the
//! JEDEC row and the device actually answered; `capacity_bytes` only
//! appears when the capacity code decodes.

use crate::cmds;
use crate::ident::{self, FlashIdentity};

#[derive(Debug)]
pub enum ReportError {
    /// The output buffer cannot hold the whole document; allocate
    /// `needed` bytes and retry. Nothing was written.
    BufferTooSmall { needed: usize },
}

/// Renders the full diagnostic document into `out` and returns its
/// length.
///
/// A sizing pass runs first, so an undersized buffer is rejected with the
/// exact required capacity before a single byte is written. Truncated
/// JSON fails downstream parsers in silent ways; no output beats partial
/// output.
pub fn render_report(battery: &[u8], out: &mut [u8]) -> Result<usize, ReportError> {
    let needed = render_into(battery, &mut []);
    if needed > out.len() {
        return Err(ReportError::BufferTooSmall { needed });
    }
    Ok(render_into(battery, out))
}

fn render_into(battery: &[u8], out: &mut [u8]) -> usize {
    let mut json = JsonWriter::new(out);
    json.push_str("{\"device\":{");
    if let Some(identity) = battery_identity(battery) {
        render_jedec(&mut json, &identity);
    }
    json.push_str("},\"commands\":[");
    render_commands(&mut json, battery);
    json.push_str("]}");
    json.written()
}

/// Walks the table for the JEDEC row and decodes it, provided the battery
/// slice actually covers that row.
fn battery_identity(battery: &[u8]) -> Option<FlashIdentity> {
    let mut offset = 0;
    let mut found = None;
    for index in 0..cmds::command_count() {
        let cmd = match cmds::command_by_index(index) {
            Some(cmd) => cmd,
            None => break,
        };
        let end = offset + cmd.rx_data_len;
        if end > battery.len() {
            break;
        }
        if cmd.opcode == cmds::OP_JEDEC_ID && cmd.rx_data_len >= 3 {
            found = ident::decode_jedec(battery[offset], battery[offset + 1], battery[offset + 2]);
        }
        offset = end;
    }
    found
}

fn render_jedec(json: &mut JsonWriter<'_>, identity: &FlashIdentity) {
    json.push_str("\"jedec\":{\"manufacturer_id\":\"");
    json.push_hex_byte(identity.manufacturer_id);
    json.push_str("\",\"manufacturer_name\":\"");
    json.push_escaped(identity.manufacturer_name);
    json.push_str("\",\"memory_type\":\"");
    json.push_hex_byte(identity.memory_type);
    json.push_str("\",\"capacity_code\":\"");
    json.push_hex_byte(identity.capacity_code);
    json.push_byte(b'"');
    if let Some(bytes) = identity.capacity_bytes {
        json.push_str(",\"capacity_bytes\":\"");
        json.push_decimal(bytes);
        json.push_byte(b'"');
    }
    json.push_byte(b'}');
}

/// One object per command whose payload the battery slice covers; a short
/// battery yields a short but well-formed array.
fn render_commands(json: &mut JsonWriter<'_>, battery: &[u8]) {
    let mut offset = 0;
    let mut first = true;
    for index in 0..cmds::command_count() {
        let cmd = match cmds::command_by_index(index) {
            Some(cmd) => cmd,
            None => break,
        };
        let end = offset + cmd.rx_data_len;
        if end > battery.len() {
            break;
        }
        if !first {
            json.push_byte(b',');
        }
        first = false;
        json.push_str("{\"name\":\"");
        json.push_escaped(cmd.description);
        json.push_str("\",\"opcode\":\"");
        json.push_hex_byte(cmd.opcode);
        json.push_str("\",\"data\":[");
        for (position, &byte) in battery[offset..end].iter().enumerate() {
            if position > 0 {
                json.push_byte(b',');
            }
            json.push_byte(b'"');
            json.push_hex_byte(byte);
            json.push_byte(b'"');
        }
        json.push_str("]}");
        offset = end;
    }
}

/// Byte-wise JSON assembler over a caller-owned buffer.
///
/// Bytes past the end of the buffer are counted instead of stored, so one
/// pass over an empty buffer doubles as the sizing pass.
struct JsonWriter<'a> {
    out: &'a mut [u8],
    len: usize,
}

impl<'a> JsonWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, len: 0 }
    }

    /// Length the document wants, whether or not it fit.
    fn written(&self) -> usize {
        self.len
    }

    fn push_byte(&mut self, byte: u8) {
        if self.len < self.out.len() {
            self.out[self.len] = byte;
        }
        self.len += 1;
    }

    fn push_str(&mut self, text: &str) {
        for &byte in text.as_bytes() {
            self.push_byte(byte);
        }
    }

    /// String content with backslash and double quote escaped.
    fn push_escaped(&mut self, text: &str) {
        for &byte in text.as_bytes() {
            if byte == b'"' || byte == b'\\' {
                self.push_byte(b'\\');
            }
            self.push_byte(byte);
        }
    }

    fn push_hex_byte(&mut self, value: u8) {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        self.push_byte(HEX[usize::from(value >> 4)]);
        self.push_byte(HEX[usize::from(value & 0x0F)]);
    }

    fn push_decimal(&mut self, value: u64) {
        let mut digits = [0u8; 20];
        let mut cursor = digits.len();
        let mut rest = value;
        loop {
            cursor -= 1;
            digits[cursor] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        for index in cursor..digits.len() {
            self.push_byte(digits[index]);
        }
    }
}
