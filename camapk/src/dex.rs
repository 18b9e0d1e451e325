//! Skeleton dex images.
//!
//! The image holds a single placeholder class without code. Every offset in
//! the header is taken from the writer position after the preceding content
//! has been emitted, then the header is rewritten in place and sealed with
//! the SHA-1 signature and the Adler-32 checksum.
use crate::manifest::is_java_identifier;
use crate::strings::{self, StringData, StringPool};
use adler::adler32_slice;
use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub const DEX_MAGIC: [u8; 8] = *b"dex\n035\0";
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;
pub const NO_INDEX: u32 = 0xffff_ffff;
pub const ACC_PUBLIC: u32 = 0x0001;

const CHECKSUM_OFFSET: usize = 8;
const SIGNATURE_OFFSET: usize = 12;
const SIGNATURE_END: usize = 32;

const TYPE_HEADER_ITEM: u16 = 0x0000;
const TYPE_STRING_ID_ITEM: u16 = 0x0001;
const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
const TYPE_MAP_LIST: u16 = 0x1000;
const TYPE_STRING_DATA_ITEM: u16 = 0x2002;

/// Element count and file offset of a header section. `(0, 0)` marks an absent section.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Section {
    pub size: u32,
    pub offset: u32,
}

impl Section {
    fn read(r: &mut impl Read) -> Result<Self> {
        let size = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u32::<LittleEndian>()?;
        Ok(Self { size, offset })
    }

    fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DexHeader {
    pub magic: [u8; 8],
    /// Adler-32 of everything after this field.
    pub checksum: u32,
    /// SHA-1 of everything after this field.
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link: Section,
    pub map_off: u32,
    pub string_ids: Section,
    pub type_ids: Section,
    pub proto_ids: Section,
    pub field_ids: Section,
    pub method_ids: Section,
    pub class_defs: Section,
    /// Unlike the other sections, `size` is in bytes.
    pub data: Section,
}

impl DexHeader {
    pub const SIZE: u32 = 0x70;

    pub fn read(r: &mut impl Read) -> Result<Self> {
        let mut magic = [0; 8];
        r.read_exact(&mut magic)?;
        let checksum = r.read_u32::<LittleEndian>()?;
        let mut signature = [0; 20];
        r.read_exact(&mut signature)?;
        let file_size = r.read_u32::<LittleEndian>()?;
        let header_size = r.read_u32::<LittleEndian>()?;
        let endian_tag = r.read_u32::<LittleEndian>()?;
        let link = Section::read(r)?;
        let map_off = r.read_u32::<LittleEndian>()?;
        Ok(Self {
            magic,
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link,
            map_off,
            string_ids: Section::read(r)?,
            type_ids: Section::read(r)?,
            proto_ids: Section::read(r)?,
            field_ids: Section::read(r)?,
            method_ids: Section::read(r)?,
            class_defs: Section::read(r)?,
            data: Section::read(r)?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<LittleEndian>(self.checksum)?;
        w.write_all(&self.signature)?;
        w.write_u32::<LittleEndian>(self.file_size)?;
        w.write_u32::<LittleEndian>(self.header_size)?;
        w.write_u32::<LittleEndian>(self.endian_tag)?;
        self.link.write(w)?;
        w.write_u32::<LittleEndian>(self.map_off)?;
        self.string_ids.write(w)?;
        self.type_ids.write(w)?;
        self.proto_ids.write(w)?;
        self.field_ids.write(w)?;
        self.method_ids.write(w)?;
        self.class_defs.write(w)?;
        self.data.write(w)?;
        Ok(())
    }

    /// Sections with the byte size of one of their items.
    pub fn sections(&self) -> [(&'static str, Section, u32); 8] {
        [
            ("link", self.link, 1),
            ("string_ids", self.string_ids, 4),
            ("type_ids", self.type_ids, 4),
            ("proto_ids", self.proto_ids, 12),
            ("field_ids", self.field_ids, 8),
            ("method_ids", self.method_ids, 8),
            ("class_defs", self.class_defs, ClassDef::SIZE),
            ("data", self.data, 1),
        ]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassDef {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDef {
    pub const SIZE: u32 = 32;

    /// A public class without superclass, interfaces, annotations, members or static values.
    pub fn placeholder(class_idx: u32) -> Self {
        Self {
            class_idx,
            access_flags: ACC_PUBLIC,
            superclass_idx: NO_INDEX,
            interfaces_off: 0,
            source_file_idx: NO_INDEX,
            annotations_off: 0,
            class_data_off: 0,
            static_values_off: 0,
        }
    }

    pub fn read(r: &mut impl Read) -> Result<Self> {
        Ok(Self {
            class_idx: r.read_u32::<LittleEndian>()?,
            access_flags: r.read_u32::<LittleEndian>()?,
            superclass_idx: r.read_u32::<LittleEndian>()?,
            interfaces_off: r.read_u32::<LittleEndian>()?,
            source_file_idx: r.read_u32::<LittleEndian>()?,
            annotations_off: r.read_u32::<LittleEndian>()?,
            class_data_off: r.read_u32::<LittleEndian>()?,
            static_values_off: r.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.class_idx)?;
        w.write_u32::<LittleEndian>(self.access_flags)?;
        w.write_u32::<LittleEndian>(self.superclass_idx)?;
        w.write_u32::<LittleEndian>(self.interfaces_off)?;
        w.write_u32::<LittleEndian>(self.source_file_idx)?;
        w.write_u32::<LittleEndian>(self.annotations_off)?;
        w.write_u32::<LittleEndian>(self.class_data_off)?;
        w.write_u32::<LittleEndian>(self.static_values_off)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct MapItem {
    ty: u16,
    size: u32,
    offset: u32,
}

impl MapItem {
    fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u16::<LittleEndian>(self.ty)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }
}

/// Converts `com.example.Main` into the type descriptor `Lcom/example/Main;`.
pub fn descriptor(class_name: &str) -> Result<String> {
    anyhow::ensure!(
        class_name.split('.').all(is_java_identifier),
        "invalid class name `{}`",
        class_name
    );
    Ok(format!("L{};", class_name.replace('.', "/")))
}

/// Builds a dex image declaring `class_name` as its only class.
pub fn compile_dex(class_name: &str) -> Result<Vec<u8>> {
    let mut strings = StringPool::default();
    let class_descriptor = strings.id(&descriptor(class_name)?);
    let types = [class_descriptor];
    let strings = strings.finalize();

    let mut buf = vec![];
    let mut w = Cursor::new(&mut buf);
    DexHeader::default().write(&mut w)?;
    let header_size = position(&mut w)?;
    anyhow::ensure!(header_size == DexHeader::SIZE, "unexpected header size");

    // string ids are patched once the string data has been placed
    let string_ids = Section {
        size: u32::try_from(strings.len())?,
        offset: position(&mut w)?,
    };
    for _ in &strings {
        w.write_u32::<LittleEndian>(0)?;
    }

    let type_ids = Section {
        size: u32::try_from(types.len())?,
        offset: position(&mut w)?,
    };
    for descriptor_idx in types {
        w.write_u32::<LittleEndian>(descriptor_idx)?;
    }

    let class_defs = Section {
        size: 1,
        offset: position(&mut w)?,
    };
    ClassDef::placeholder(0).write(&mut w)?;

    pad(&mut w, 4)?;
    let data_off = position(&mut w)?;
    let string_data = StringData::encode(&strings, strings::write_mutf8_entry)?;
    w.write_all(&string_data.data)?;

    pad(&mut w, 4)?;
    let map_off = position(&mut w)?;
    let map = [
        MapItem {
            ty: TYPE_HEADER_ITEM,
            size: 1,
            offset: 0,
        },
        MapItem {
            ty: TYPE_STRING_ID_ITEM,
            size: string_ids.size,
            offset: string_ids.offset,
        },
        MapItem {
            ty: TYPE_TYPE_ID_ITEM,
            size: type_ids.size,
            offset: type_ids.offset,
        },
        MapItem {
            ty: TYPE_CLASS_DEF_ITEM,
            size: class_defs.size,
            offset: class_defs.offset,
        },
        MapItem {
            ty: TYPE_STRING_DATA_ITEM,
            size: string_ids.size,
            offset: data_off,
        },
        MapItem {
            ty: TYPE_MAP_LIST,
            size: 1,
            offset: map_off,
        },
    ];
    w.write_u32::<LittleEndian>(map.len() as u32)?;
    for item in &map {
        item.write(&mut w)?;
    }
    let file_size = position(&mut w)?;

    w.seek(SeekFrom::Start(string_ids.offset as u64))?;
    for offset in &string_data.offsets {
        w.write_u32::<LittleEndian>(data_off + offset)?;
    }

    let header = DexHeader {
        magic: DEX_MAGIC,
        file_size,
        header_size,
        endian_tag: ENDIAN_CONSTANT,
        map_off,
        string_ids,
        type_ids,
        class_defs,
        data: Section {
            size: file_size - data_off,
            offset: data_off,
        },
        ..Default::default()
    };
    w.rewind()?;
    header.write(&mut w)?;

    seal(&mut buf)?;
    tracing::debug!("dex image for {} is {} bytes", class_name, buf.len());
    Ok(buf)
}

/// Writes the signature and then the checksum, which covers the signature.
pub fn seal(dex: &mut [u8]) -> Result<()> {
    anyhow::ensure!(dex.len() >= DexHeader::SIZE as usize, "dex image too short");
    let signature = Sha1::digest(&dex[SIGNATURE_END..]);
    dex[SIGNATURE_OFFSET..SIGNATURE_END].copy_from_slice(&signature);
    let checksum = adler32_slice(&dex[SIGNATURE_OFFSET..]);
    dex[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Re-parses a dex image and checks that its header is self-consistent.
pub fn verify(dex: &[u8]) -> Result<DexHeader> {
    anyhow::ensure!(dex.len() >= DexHeader::SIZE as usize, "dex image too short");
    let header = DexHeader::read(&mut Cursor::new(dex))?;
    anyhow::ensure!(header.magic == DEX_MAGIC, "bad dex magic {:?}", header.magic);
    anyhow::ensure!(
        header.endian_tag == ENDIAN_CONSTANT,
        "bad endian tag 0x{:x}",
        header.endian_tag
    );
    anyhow::ensure!(
        header.header_size == DexHeader::SIZE,
        "bad header size 0x{:x}",
        header.header_size
    );
    anyhow::ensure!(
        header.file_size as usize == dex.len(),
        "file size {} does not match image length {}",
        header.file_size,
        dex.len()
    );
    let signature = Sha1::digest(&dex[SIGNATURE_END..]);
    anyhow::ensure!(
        header.signature[..] == signature[..],
        "dex signature mismatch"
    );
    let checksum = adler32_slice(&dex[SIGNATURE_OFFSET..]);
    anyhow::ensure!(
        header.checksum == checksum,
        "dex checksum 0x{:08x} does not match 0x{:08x}",
        header.checksum,
        checksum
    );
    for (name, section, item_size) in header.sections() {
        if section.size == 0 && section.offset == 0 {
            continue;
        }
        let end = (section.offset as u64)
            .checked_add(section.size as u64 * item_size as u64)
            .with_context(|| format!("{name} section overflows"))?;
        anyhow::ensure!(
            section.offset >= header.header_size && end <= header.file_size as u64,
            "{} section {:?} lies outside the image",
            name,
            section
        );
    }
    if header.map_off != 0 {
        anyhow::ensure!(
            header.map_off as u64 + 4 <= header.file_size as u64,
            "map offset 0x{:x} lies outside the image",
            header.map_off
        );
        let mut r = Cursor::new(dex);
        r.seek(SeekFrom::Start(header.map_off as u64))?;
        let count = r.read_u32::<LittleEndian>()? as u64;
        anyhow::ensure!(
            header.map_off as u64 + 4 + count * 12 <= header.file_size as u64,
            "map list lies outside the image"
        );
    }
    Ok(header)
}

/// Reads the string at `idx` through the string id table.
pub fn string(dex: &[u8], header: &DexHeader, idx: u32) -> Result<String> {
    anyhow::ensure!(idx < header.string_ids.size, "string index {} out of range", idx);
    let mut r = Cursor::new(dex);
    r.seek(SeekFrom::Start(header.string_ids.offset as u64 + idx as u64 * 4))?;
    let offset = r.read_u32::<LittleEndian>()?;
    anyhow::ensure!(offset < header.file_size, "string data out of range");
    r.seek(SeekFrom::Start(offset as u64))?;
    let _utf16_len = strings::read_uleb128(&mut r)?;
    let mut bytes = vec![];
    loop {
        match r.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).context("dex string is not plain utf-8")
}

fn position<W: Seek>(w: &mut W) -> Result<u32> {
    Ok(u32::try_from(w.stream_position()?)?)
}

fn pad<W: Write + Seek>(w: &mut W, align: u64) -> Result<()> {
    while w.stream_position()? % align != 0 {
        w.write_u8(0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straightforward Adler-32 to check against.
    fn reference_adler32(data: &[u8]) -> u32 {
        let (mut a, mut b) = (1u32, 0u32);
        for &byte in data {
            a = (a + byte as u32) % 65_521;
            b = (b + a) % 65_521;
        }
        (b << 16) | a
    }

    fn u32_at(dex: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(dex[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_checksum_covers_large_images() -> Result<()> {
        let mut dex = compile_dex("a.B")?;
        dex.extend((0..20_000u32).map(|i| (i * 7) as u8));
        let file_size = dex.len() as u32;
        dex[32..36].copy_from_slice(&file_size.to_le_bytes());
        seal(&mut dex)?;
        assert_eq!(u32_at(&dex, 8), reference_adler32(&dex[12..]));
        verify(&dex)?;
        Ok(())
    }

    #[test]
    fn test_descriptor() -> Result<()> {
        assert_eq!(
            descriptor("com.example.app.MainActivity")?,
            "Lcom/example/app/MainActivity;"
        );
        assert!(descriptor("").is_err());
        assert!(descriptor("Lcom/example;").is_err());
        assert!(descriptor(".Main").is_err());
        assert!(descriptor("Main.").is_err());
        assert!(descriptor("a..B").is_err());
        assert!(descriptor("com.1app.Main").is_err());
        assert_eq!(descriptor("Main")?, "LMain;");
        Ok(())
    }

    #[test]
    fn test_checksum_and_signature() -> Result<()> {
        crate::tests::init_logger();
        let dex = compile_dex("com.example.app.MainActivity")?;
        assert_eq!(&dex[..8], &[0x64, 0x65, 0x78, 0x0a, 0x30, 0x33, 0x35, 0x00]);
        assert_eq!(u32_at(&dex, 8), reference_adler32(&dex[12..]));
        let signature = Sha1::digest(&dex[32..]);
        assert_eq!(&dex[12..32], &signature[..]);
        Ok(())
    }

    #[test]
    fn test_file_size_and_sections() -> Result<()> {
        for class in ["a.B", "com.example.app.MainActivity", "com.github.cleanhdmi.X"] {
            let dex = compile_dex(class)?;
            let header = verify(&dex)?;
            assert_eq!(header.file_size as usize, dex.len());
            assert_eq!(u32_at(&dex, 32) as usize, dex.len());
            assert_eq!(header.header_size, 0x70);
            assert_eq!(header.endian_tag, ENDIAN_CONSTANT);
            for (name, section, item_size) in header.sections() {
                if section == Section::default() {
                    continue;
                }
                assert!(section.offset < header.file_size, "{name}");
                assert!(
                    section.offset + section.size * item_size <= header.file_size,
                    "{name}"
                );
            }
            assert_eq!(header.proto_ids, Section::default());
            assert_eq!(header.method_ids, Section::default());
            assert_eq!(header.data.offset % 4, 0);
            assert_eq!(header.data.offset + header.data.size, header.file_size);
            assert_eq!(header.string_ids.size, 1);
            assert_eq!(header.type_ids.size, 1);
            assert_eq!(header.class_defs.size, 1);
        }
        Ok(())
    }

    #[test]
    fn test_placeholder_class() -> Result<()> {
        let dex = compile_dex("com.example.app.MainActivity")?;
        let header = verify(&dex)?;
        let mut r = Cursor::new(&dex[..]);
        r.seek(SeekFrom::Start(header.class_defs.offset as u64))?;
        let class_def = ClassDef::read(&mut r)?;
        assert_eq!(class_def, ClassDef::placeholder(0));
        assert_eq!(class_def.superclass_idx, NO_INDEX);
        let descriptor_idx = u32_at(&dex, header.type_ids.offset as usize);
        assert_eq!(
            string(&dex, &header, descriptor_idx)?,
            "Lcom/example/app/MainActivity;"
        );
        // the string id points at the start of the data section
        assert_eq!(u32_at(&dex, header.string_ids.offset as usize), header.data.offset);
        Ok(())
    }

    #[test]
    fn test_verify_rejects_corruption() -> Result<()> {
        let dex = compile_dex("com.example.app.MainActivity")?;

        let mut flipped = dex.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert!(verify(&flipped).is_err());

        let mut truncated = dex.clone();
        truncated.pop();
        assert!(verify(&truncated).is_err());

        // resealing keeps checksums valid, so only the bounds check can catch this
        let mut out_of_range = dex.clone();
        let type_ids_off = 0x44;
        out_of_range[type_ids_off..type_ids_off + 4].copy_from_slice(&0x1000u32.to_le_bytes());
        seal(&mut out_of_range)?;
        assert!(verify(&out_of_range).is_err());

        assert!(verify(&dex[..0x20]).is_err());
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        assert_eq!(compile_dex("a.B")?, compile_dex("a.B")?);
        Ok(())
    }
}
