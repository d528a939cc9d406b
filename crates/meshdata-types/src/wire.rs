//! Length-prefixed primitives shared by every wire format in the workspace.
//!
//! Strings are `u16` big-endian length prefixed UTF-8, blobs are `u32`
//! prefixed. Readers check the remaining length before every access and
//! report truncation as [`Error::Decode`].

use bytes::{Buf, BufMut, Bytes};

use crate::{Error, Result};

/// Writes a `u16` length-prefixed UTF-8 string.
pub fn put_str(buf: &mut impl BufMut, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::Encode(format!("string too long: {} bytes", bytes.len())))?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

/// Reads a `u16` length-prefixed UTF-8 string.
pub fn get_str(buf: &mut impl Buf) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(Error::truncated("string length"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::truncated("string"));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|e| Error::Decode(format!("invalid utf-8: {e}")))
}

/// Writes a `u32` length-prefixed byte blob.
pub fn put_blob(buf: &mut impl BufMut, value: &[u8]) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| Error::Encode(format!("blob too long: {} bytes", value.len())))?;
    buf.put_u32(len);
    buf.put_slice(value);
    Ok(())
}

/// Reads a `u32` length-prefixed byte blob.
pub fn get_blob(buf: &mut impl Buf) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::truncated("blob length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::truncated("blob"));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Reads a single byte.
pub fn get_u8(buf: &mut impl Buf, field: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::truncated(field));
    }
    Ok(buf.get_u8())
}

/// Reads a big-endian `u64`.
pub fn get_u64(buf: &mut impl Buf, field: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(Error::truncated(field));
    }
    Ok(buf.get_u64())
}

/// Writes a value as a `u32` length-prefixed JSON document.
pub fn put_json<T: serde::Serialize>(buf: &mut impl BufMut, value: &T) -> Result<()> {
    let encoded = serde_json::to_vec(value)?;
    put_blob(buf, &encoded)
}

/// Reads a `u32` length-prefixed JSON document.
pub fn get_json<T: serde::de::DeserializeOwned>(buf: &mut impl Buf) -> Result<T> {
    let raw = get_blob(buf)?;
    Ok(serde_json::from_slice(&raw)?)
}
