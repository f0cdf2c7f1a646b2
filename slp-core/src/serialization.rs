//! Canonical CBOR serialization for the token wire format.
//!
//! Tokens leave the device as CBOR and are parsed by verifiers written in
//! any language, so both directions enforce one encoding per value.
//!
//! ## Canonicalization Rules (RFC 8949 Section 4.2, subset)
//! 1. Struct fields are encoded in declaration order
//! 2. Integers and lengths encoded in minimal form
//! 3. Floating-point disabled (timestamps travel as IEEE-754 bit patterns)
//! 4. No indefinite-length encoding
//! 5. Exactly one top-level item, no trailing bytes
//! 6. Decoding re-encodes the value and demands the identical bytes, which
//!    pins map key order and rejects unknown keys

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on an encoded value, enforced when encoding and decoding.
pub const MAX_ENCODED_LEN: usize = (1 << 20) + 4096;

/// Nesting bound for the canonical-form walk.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("CBOR encoding error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("CBOR decoding error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("Non-canonical CBOR at offset {offset}: {reason}")]
    NonCanonical { offset: usize, reason: &'static str },

    #[error("Encoded value too large: {0} bytes")]
    TooLarge(usize),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Serialize a value to canonical CBOR bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    if buf.len() > MAX_ENCODED_LEN {
        return Err(SerializationError::TooLarge(buf.len()));
    }

    // Guard against a serde impl sneaking in floats or indefinite lengths.
    verify_canonical(&buf)?;

    Ok(buf)
}

/// Deserialize a value from canonical CBOR bytes.
///
/// Input that is not in canonical form is rejected before decoding, and the
/// decoded value must re-encode to exactly `bytes`.
pub fn from_canonical_cbor<T>(bytes: &[u8]) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    if bytes.len() > MAX_ENCODED_LEN {
        return Err(SerializationError::TooLarge(bytes.len()));
    }
    verify_canonical(bytes)?;
    let value: T = ciborium::from_reader(bytes)?;

    let reencoded = to_canonical_cbor(&value)?;
    if reencoded != bytes {
        let offset = reencoded
            .iter()
            .zip(bytes)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| reencoded.len().min(bytes.len()));
        return Err(non_canonical(offset, "not the canonical encoding of the decoded value"));
    }
    Ok(value)
}

/// Verify that CBOR bytes hold exactly one item in canonical form.
pub fn verify_canonical(bytes: &[u8]) -> Result<()> {
    let end = verify_item(bytes, 0, 0)?;
    if end != bytes.len() {
        return Err(non_canonical(end, "trailing bytes after top-level item"));
    }
    Ok(())
}

fn non_canonical(offset: usize, reason: &'static str) -> SerializationError {
    SerializationError::NonCanonical { offset, reason }
}

/// Walk one item starting at `pos`; returns the offset just past it.
fn verify_item(bytes: &[u8], pos: usize, depth: usize) -> Result<usize> {
    if depth > MAX_DEPTH {
        return Err(non_canonical(pos, "nesting too deep"));
    }
    let initial = *bytes
        .get(pos)
        .ok_or_else(|| non_canonical(pos, "unexpected end of input"))?;

    let major_type = initial >> 5;
    let additional_info = initial & 0x1F;
    let mut cursor = pos + 1;

    if major_type == 7 {
        return match additional_info {
            // false, true, null, undefined
            20..=23 => Ok(cursor),
            25..=27 => Err(non_canonical(pos, "floating-point values are not allowed")),
            31 => Err(non_canonical(pos, "indefinite-length encoding not allowed")),
            _ => Err(non_canonical(pos, "unsupported simple value")),
        };
    }

    let argument = match additional_info {
        0..=23 => u64::from(additional_info),
        24..=27 => {
            let width = 1usize << (additional_info - 24);
            let raw = bytes
                .get(cursor..cursor + width)
                .ok_or_else(|| non_canonical(cursor, "truncated argument"))?;
            cursor += width;
            let value = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            let minimal = match width {
                1 => value >= 24,
                2 => value > u64::from(u8::MAX),
                4 => value > u64::from(u16::MAX),
                _ => value > u64::from(u32::MAX),
            };
            if !minimal {
                return Err(non_canonical(pos, "argument not minimally encoded"));
            }
            value
        }
        31 => return Err(non_canonical(pos, "indefinite-length encoding not allowed")),
        _ => return Err(non_canonical(pos, "reserved additional info")),
    };

    match major_type {
        // unsigned / negative integer
        0 | 1 => Ok(cursor),
        // byte string / text string
        2 | 3 => {
            let remaining = (bytes.len() - cursor) as u64;
            if argument > remaining {
                return Err(non_canonical(cursor, "string length exceeds input"));
            }
            Ok(cursor + argument as usize)
        }
        // array
        4 => {
            for _ in 0..argument {
                cursor = verify_item(bytes, cursor, depth + 1)?;
            }
            Ok(cursor)
        }
        // map
        5 => {
            for _ in 0..argument {
                cursor = verify_item(bytes, cursor, depth + 1)?;
                cursor = verify_item(bytes, cursor, depth + 1)?;
            }
            Ok(cursor)
        }
        // tag
        _ => verify_item(bytes, cursor, depth + 1),
    }
}
