//! Decoding helpers shared by `BYTE`, `WORD` and literal operands.
//!
//! Kept separate from `pass1`/`pass2`/`littab` so the `C'...'`/`X'...'`
//! decoding rules (spec.md §4.1 data model, §4.3 step 7, §4.4 `BYTE`) are
//! defined exactly once.

use byteorder::ByteOrder;

/// Decodes a `BYTE`-style operand (`C'...'` or `X'...'`) into its raw
/// bytes. Used both to size the reservation in Pass 1 and to emit the
/// object bytes in Pass 2.
pub fn decode_byte_operand(operand: &str) -> Result<Vec<u8>, String> {
    if let Some(inner) = strip_quoted(operand, "C'", '\'') {
        Ok(inner.bytes().collect())
    } else if let Some(inner) = strip_quoted(operand, "X'", '\'') {
        if inner.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in '{}'", operand));
        }
        let mut bytes = Vec::with_capacity(inner.len() / 2);
        for chunk in inner.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk).unwrap();
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| format!("invalid hex digits in '{}'", operand))?;
            bytes.push(byte);
        }
        Ok(bytes)
    } else {
        Err(format!("invalid BYTE operand '{}'", operand))
    }
}

/// Byte-length of a `BYTE` operand without allocating the decoded bytes,
/// per spec.md §4.3 step 7 (`C'...'` -> character count, `X'...'` -> half
/// the hex-digit count).
pub fn byte_operand_length(operand: &str) -> Result<u32, String> {
    if let Some(inner) = strip_quoted(operand, "C'", '\'') {
        Ok(inner.len() as u32)
    } else if let Some(inner) = strip_quoted(operand, "X'", '\'') {
        if inner.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in '{}'", operand));
        }
        Ok((inner.len() / 2) as u32)
    } else {
        Err(format!("invalid BYTE operand '{}'", operand))
    }
}

/// Decodes a literal's raw text (`C'...'`, `X'...'`, or a plain decimal
/// integer) into its pool bytes. Decimal literals occupy one word (3
/// bytes), matching how `WORD` encodes a plain integer operand.
pub fn decode_literal(raw: &str) -> Result<Vec<u8>, String> {
    if raw.starts_with("C'") || raw.starts_with("X'") {
        decode_byte_operand(raw)
    } else {
        let value: i64 = raw
            .parse()
            .map_err(|_| format!("invalid literal '{}'", raw))?;
        Ok(word_bytes(value))
    }
}

/// Byte-length of a literal's raw text, without decoding.
pub fn literal_length(raw: &str) -> Result<u32, String> {
    if raw.starts_with("C'") || raw.starts_with("X'") {
        byte_operand_length(raw)
    } else {
        raw.parse::<i64>()
            .map_err(|_| format!("invalid literal '{}'", raw))?;
        Ok(3)
    }
}

/// Encodes a signed integer into 3 big-endian bytes (a SIC/XE word),
/// truncating to 24 bits the way `WORD value & 0xFFFFFF` does.
pub fn word_bytes(value: i64) -> Vec<u8> {
    let truncated = (value as i32 as u32) & 0x00FF_FFFF;
    let mut buf = [0u8; 3];
    byteorder::BigEndian::write_u24(&mut buf, truncated);
    buf.to_vec()
}

fn strip_quoted<'a>(operand: &'a str, prefix: &str, closing: char) -> Option<&'a str> {
    let rest = operand.strip_prefix(prefix)?;
    rest.strip_suffix(closing)
}
