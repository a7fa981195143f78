pub(super) const SHORT_NAME_RAW: usize = 11;
pub(super) const SHORT_NAME_MAX: usize = 12;

/// Maps a display name onto the fixed 11-byte 8.3 form: uppercased,
/// space-padded, extension split on the last dot. Overlong parts are
/// truncated rather than rejected, matching the on-disk encoding.
pub(super) fn encode_short_name(name: &str) -> Option<[u8; SHORT_NAME_RAW]> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.contains(&b'/') {
        return None;
    }

    let (stem, ext): (&[u8], &[u8]) = match name.rfind('.') {
        Some(0) => return None,
        Some(i) => (&bytes[..i], &bytes[i + 1..]),
        None => (bytes, b""),
    };

    let mut out = [b' '; SHORT_NAME_RAW];
    for (slot, &b) in out[..8].iter_mut().zip(stem) {
        *slot = b.to_ascii_uppercase();
    }
    for (slot, &b) in out[8..].iter_mut().zip(ext) {
        *slot = b.to_ascii_uppercase();
    }
    Some(out)
}

/// Rebuilds the dotted display form; returns the byte count written.
pub(super) fn decode_short_name(
    raw: &[u8; SHORT_NAME_RAW],
    out: &mut [u8; SHORT_NAME_MAX],
) -> usize {
    let mut len = 0usize;
    for &b in &raw[..8] {
        if b == b' ' {
            break;
        }
        out[len] = b;
        len += 1;
    }
    if raw[8] != b' ' {
        out[len] = b'.';
        len += 1;
        for &b in &raw[8..] {
            if b == b' ' {
                break;
            }
            out[len] = b;
            len += 1;
        }
    }
    len
}
