//! Deduplicated string tables shared by the binary xml and dex encoders.
//!
//! A [`StringPool`] hands out stable indices in first-use order. Once all
//! strings are known, [`StringData::encode`] lays them out in a contiguous
//! blob using the entry encoding of the target format and records the offset
//! of every string.
use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Read;

#[derive(Clone, Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    ids: HashMap<String, u32>,
    /// Indices below this are never handed out by [`StringPool::value_id`].
    reserved: usize,
    /// Value copies of reserved strings.
    values: HashMap<String, u32>,
}

impl StringPool {
    /// Returns the index of `s`, adding it to the pool on first use.
    pub fn id(&mut self, s: &str) -> u32 {
        if let Some(id) = self.ids.get(s).copied() {
            id
        } else {
            let id = self.strings.len() as u32;
            self.strings.push(s.to_string());
            self.ids.insert(s.to_string(), id);
            id
        }
    }

    /// Reserves the strings added so far for their current use.
    pub fn reserve(&mut self) {
        self.reserved = self.strings.len();
    }

    /// Like [`StringPool::id`], but a string in the reserved prefix gets a
    /// separate entry after it.
    pub fn value_id(&mut self, s: &str) -> u32 {
        match self.ids.get(s).copied() {
            Some(id) if id as usize >= self.reserved => id,
            Some(_) => {
                if let Some(id) = self.values.get(s).copied() {
                    return id;
                }
                let id = self.strings.len() as u32;
                self.strings.push(s.to_string());
                self.values.insert(s.to_string(), id);
                id
            }
            None => self.id(s),
        }
    }

    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.ids.get(s).copied()
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(|s| s.as_str())
    }

    pub fn contains(&self, s: &str) -> bool {
        self.ids.contains_key(s)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn finalize(self) -> Vec<String> {
        self.strings
    }
}

/// Encoded strings: one offset per string into `data`.
///
/// `data` is zero padded to a multiple of four bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StringData {
    pub offsets: Vec<u32>,
    pub data: Vec<u8>,
}

impl StringData {
    pub fn encode<S, F>(strings: &[S], mut encode: F) -> Result<Self>
    where
        S: AsRef<str>,
        F: FnMut(&str, &mut Vec<u8>) -> Result<()>,
    {
        let mut offsets = Vec::with_capacity(strings.len());
        let mut data = vec![];
        for s in strings {
            offsets.push(u32::try_from(data.len())?);
            encode(s.as_ref(), &mut data)?;
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }
        Ok(Self { offsets, data })
    }
}

/// Binary xml string pool entry in UTF-8 mode: UTF-16 length, byte length,
/// the bytes and a terminating NUL. Lengths above 0x7f take two bytes.
pub fn write_utf8_entry(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    write_length8(s.encode_utf16().count(), buf)?;
    write_length8(s.len(), buf)?;
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_length8(len: usize, buf: &mut Vec<u8>) -> Result<()> {
    anyhow::ensure!(len <= 0x7fff, "string of length {} is too long", len);
    if len > 0x7f {
        buf.push((len >> 8) as u8 | 0x80);
    }
    buf.push(len as u8);
    Ok(())
}

fn read_length8(r: &mut impl Read) -> Result<usize> {
    let high = r.read_u8()? as usize;
    if high & 0x80 != 0 {
        Ok((high & 0x7f) << 8 | r.read_u8()? as usize)
    } else {
        Ok(high)
    }
}

pub fn read_utf8_entry(r: &mut impl Read) -> Result<String> {
    let _chars = read_length8(r)?;
    let bytes = read_length8(r)?;
    let mut buf = vec![0; bytes];
    r.read_exact(&mut buf)?;
    anyhow::ensure!(r.read_u8()? == 0, "string pool entry is not NUL terminated");
    String::from_utf8(buf).context("string pool entry is not valid UTF-8")
}

pub fn read_utf16_entry(r: &mut impl Read) -> Result<String> {
    let high = r.read_u16::<LittleEndian>()? as usize;
    let chars = if high & 0x8000 != 0 {
        (high & 0x7fff) << 16 | r.read_u16::<LittleEndian>()? as usize
    } else {
        high
    };
    let mut buf = Vec::with_capacity(chars);
    for _ in 0..chars {
        buf.push(r.read_u16::<LittleEndian>()?);
    }
    Ok(String::from_utf16(&buf)?)
}

/// Dex `string_data_item`: ULEB128 UTF-16 length, MUTF-8 bytes and a NUL.
pub fn write_mutf8_entry(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    write_uleb128(buf, u32::try_from(s.encode_utf16().count())?);
    buf.extend_from_slice(&cesu8::to_java_cesu8(s));
    buf.push(0);
    Ok(())
}

pub fn write_uleb128(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn read_uleb128(r: &mut impl Read) -> Result<u32> {
    let mut value = 0u32;
    for i in 0..5 {
        let byte = r.read_u8()?;
        value |= ((byte & 0x7f) as u32) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    anyhow::bail!("uleb128 value is longer than five bytes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stable_ids() {
        let mut pool = StringPool::default();
        assert_eq!(pool.id("manifest"), 0);
        assert_eq!(pool.id("package"), 1);
        assert_eq!(pool.id("manifest"), 0);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.lookup("package"), Some(1));
        assert_eq!(pool.get(1), Some("package"));
        assert_eq!(pool.lookup("android"), None);
        assert_eq!(pool.finalize(), vec!["manifest", "package"]);
    }

    #[test]
    fn values_skip_reserved_prefix() {
        let mut pool = StringPool::default();
        assert_eq!(pool.id("name"), 0);
        pool.reserve();
        assert_eq!(pool.value_id("name"), 1);
        assert_eq!(pool.value_id("name"), 1);
        assert_eq!(pool.id("name"), 0);
        assert_eq!(pool.value_id("label"), 2);
        assert_eq!(pool.id("label"), 2);
        assert_eq!(pool.finalize(), vec!["name", "name", "label"]);
    }

    #[test]
    fn offsets_point_at_entries() -> Result<()> {
        let strings = ["manifest", "", "com.example.app"];
        let encoded = StringData::encode(&strings, write_utf8_entry)?;
        assert_eq!(encoded.offsets, vec![0, 11, 14]);
        assert_eq!(encoded.data.len() % 4, 0);
        for (s, offset) in strings.iter().zip(&encoded.offsets) {
            let mut r = Cursor::new(&encoded.data[*offset as usize..]);
            assert_eq!(read_utf8_entry(&mut r)?, *s);
        }
        Ok(())
    }

    #[test]
    fn mutf8_entry() -> Result<()> {
        let mut buf = vec![];
        write_mutf8_entry("La;", &mut buf)?;
        assert_eq!(buf, b"\x03La;\x00");
        buf.clear();
        write_mutf8_entry("a\0", &mut buf)?;
        assert_eq!(buf, [2, b'a', 0xc0, 0x80, 0]);
        buf.clear();
        write_mutf8_entry("\u{1f600}", &mut buf)?;
        assert_eq!(buf, [2, 0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80, 0]);
        Ok(())
    }

    #[test]
    fn uleb128() -> Result<()> {
        for value in [0, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX] {
            let mut buf = vec![];
            write_uleb128(&mut buf, value);
            assert_eq!(read_uleb128(&mut Cursor::new(&buf))?, value);
        }
        let mut buf = vec![];
        write_uleb128(&mut buf, 0x80);
        assert_eq!(buf, [0x80, 0x01]);
        Ok(())
    }
}
