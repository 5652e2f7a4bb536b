//! Sigma constant encoding for box registers.
//!
//! Only the `Coll[Byte]` constant is needed: the covenant identity register
//! stores the owner's compressed key as `0x0e || vlq(len) || bytes`.

use crate::constants::PUBLIC_KEY_LENGTH;
use crate::crypto::PublicKey;
use crate::error::RegisterError;

/// Type code of `Coll[Byte]`.
pub const COLL_BYTE_TYPE: u8 = 0x0e;

/// Append the unsigned VLQ encoding of `value`.
fn put_vlq(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Read an unsigned VLQ; returns the value and the number of bytes consumed.
fn get_vlq(bytes: &[u8]) -> Result<(u64, usize), RegisterError> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(RegisterError::Truncated)
}

/// Serialize bytes as a `Coll[Byte]` constant.
pub fn encode_coll_byte(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 3);
    out.push(COLL_BYTE_TYPE);
    put_vlq(&mut out, data.len() as u64);
    out.extend_from_slice(data);
    out
}

/// Parse a `Coll[Byte]` constant. Trailing bytes are rejected.
pub fn decode_coll_byte(constant: &[u8]) -> Result<Vec<u8>, RegisterError> {
    let (&ty, rest) = constant.split_first().ok_or(RegisterError::Truncated)?;
    if ty != COLL_BYTE_TYPE {
        return Err(RegisterError::UnexpectedType(ty));
    }
    let (len, used) = get_vlq(rest)?;
    let body = &rest[used..];
    if body.len() as u64 != len {
        return Err(RegisterError::Truncated);
    }
    Ok(body.to_vec())
}

/// The identity register value for an owner key.
pub fn encode_public_key(key: &PublicKey) -> Vec<u8> {
    encode_coll_byte(key.as_bytes())
}

/// Parse an identity register value back into a key.
pub fn decode_public_key(constant: &[u8]) -> Result<PublicKey, RegisterError> {
    let bytes = decode_coll_byte(constant)?;
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(RegisterError::Truncated);
    }
    PublicKey::from_slice(&bytes).map_err(|_| RegisterError::UnexpectedType(bytes[0]))
}

/// Decode a hex register value as served by explorers and nodes.
pub fn from_hex(s: &str) -> Result<Vec<u8>, RegisterError> {
    hex::decode(s).map_err(|e| RegisterError::InvalidHex(e.to_string()))
}
