// Binary codec helpers for ledger data structures

use std::io::{self, Read, Write};
use crate::core::Hash256;

/// Largest byte string accepted by `read_var_bytes`
pub const MAX_VAR_BYTES: u64 = 32 * 1024 * 1024;

/// Trait for types with a canonical binary form
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, String> where Self: Sized;
}

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt).
///
/// A wide marker carrying a value that fits a narrower form is rejected, so
/// every integer has exactly one accepted encoding.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    let (value, min) = match first_byte[0] {
        0..=0xfc => return Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            (u16::from_le_bytes(bytes) as u64, 0xfd)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            (u32::from_le_bytes(bytes) as u64, 0x10000)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            (u64::from_le_bytes(bytes), 0x1_0000_0000)
        }
    };

    if value < min {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("non-canonical varint marker {:#04x} for {}", first_byte[0], value),
        ));
    }
    Ok(value)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("byte string too long: {}", len),
        ));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Write a hash in wire order (byte-reversed)
pub fn write_hash<W: Write + ?Sized>(writer: &mut W, hash: &Hash256) -> io::Result<()> {
    writer.write_all(&hash.reversed())
}

/// Read a wire-order hash back into display order
pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> io::Result<Hash256> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(Hash256::from_reversed(bytes))
}
