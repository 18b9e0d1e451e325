use crate::manifest::AndroidManifest;
use crate::res::{Chunk, ResTableHeader};
use anyhow::Result;

mod attributes;
mod xml;

pub use xml::{compile_xml, Attribute, Element};

pub fn compile_manifest(manifest: &AndroidManifest, balanced: bool) -> Result<Chunk> {
    manifest.validate()?;
    compile_xml(&manifest.to_element(), balanced)
}

/// A resource table that declares no packages.
pub fn compile_table() -> Chunk {
    Chunk::Table(ResTableHeader { package_count: 0 }, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Activity, Application, IntentFilter, Sdk, ANDROID_NS};
    use crate::res::{
        ChunkType, ResChunkHeader, ResValueType, ResXmlAttribute, ResXmlStartElement,
    };
    use std::io::Cursor;

    fn string(strings: &[String], id: i32) -> &str {
        strings[id as usize].as_str()
    }

    #[test]
    fn test_compile_minimal_manifest() -> Result<()> {
        crate::tests::init_logger();
        let manifest = AndroidManifest::new("com.example.app");
        let buf = compile_manifest(&manifest, true)?.to_bytes()?;

        let mut r = Cursor::new(&buf);
        let header = ResChunkHeader::read(&mut r)?;
        assert_eq!(header.ty, ChunkType::Xml as u16);
        assert_eq!(header.size as usize, buf.len());

        let chunks = match Chunk::parse(&mut Cursor::new(&buf))? {
            Chunk::Xml(chunks) => chunks,
            chunk => panic!("expected xml, got {chunk:?}"),
        };
        let strings = match &chunks[0] {
            Chunk::StringPool(strings) => strings.clone(),
            chunk => panic!("expected string pool, got {chunk:?}"),
        };
        assert_eq!(
            strings,
            vec![
                "versionCode",
                "versionName",
                "android",
                ANDROID_NS,
                "1.0",
                "com.example.app",
                "package",
                "manifest",
            ]
        );
        assert_eq!(
            chunks[1],
            Chunk::XmlResourceMap(vec![0x0101_021b, 0x0101_021c])
        );
        match &chunks[2] {
            Chunk::XmlStartNamespace(_, ns) => {
                assert_eq!(string(&strings, ns.prefix), "android");
                assert_eq!(string(&strings, ns.uri), ANDROID_NS);
            }
            chunk => panic!("expected namespace, got {chunk:?}"),
        }
        match &chunks[3] {
            Chunk::XmlStartElement(_, element, attrs) => {
                assert_eq!(string(&strings, element.name), "manifest");
                assert_eq!(element.attribute_count, 3);
                assert_eq!(string(&strings, attrs[0].name), "versionCode");
                assert_eq!(attrs[0].typed_value.data, 1);
                assert_eq!(string(&strings, attrs[0].namespace), ANDROID_NS);
                assert_eq!(string(&strings, attrs[1].raw_value), "1.0");
                assert_eq!(string(&strings, attrs[2].name), "package");
                assert_eq!(attrs[2].namespace, -1);
                assert_eq!(string(&strings, attrs[2].raw_value), "com.example.app");
                assert_eq!(attrs[2].typed_value.data_type, ResValueType::String as u8);
            }
            chunk => panic!("expected start element, got {chunk:?}"),
        }
        assert!(matches!(chunks[4], Chunk::XmlEndElement(..)));
        assert!(matches!(chunks[5], Chunk::XmlEndNamespace(..)));
        assert_eq!(chunks.len(), 6);
        Ok(())
    }

    #[test]
    fn test_unbalanced_manifest() -> Result<()> {
        let manifest = AndroidManifest::new("com.example.app");
        let chunk = compile_manifest(&manifest, false)?;
        let buf = chunk.to_bytes()?;
        let parsed = Chunk::parse(&mut Cursor::new(&buf))?;
        assert_eq!(parsed, chunk);
        match parsed {
            Chunk::Xml(chunks) => {
                assert_eq!(chunks.len(), 4);
                assert!(matches!(chunks[3], Chunk::XmlStartElement(..)));
            }
            chunk => panic!("expected xml, got {chunk:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_layout_follows_package_length() -> Result<()> {
        let short = compile_manifest(&AndroidManifest::new("a.b"), true)?.to_bytes()?;
        let long = compile_manifest(
            &AndroidManifest::new("com.example.a_much_longer_package_name"),
            true,
        )?
        .to_bytes()?;
        for buf in [&short, &long] {
            assert_eq!(buf.len() % 4, 0);
            let chunk = Chunk::parse(&mut Cursor::new(buf))?;
            assert_eq!(&chunk.to_bytes()?, buf);
        }
        assert!(long.len() > short.len());
        Ok(())
    }

    #[test]
    fn test_compile_full_manifest() -> Result<()> {
        let mut manifest = AndroidManifest::new("com.github.cleanhdmi");
        manifest.sdk = Some(Sdk {
            min_sdk_version: Some(10),
            target_sdk_version: None,
        });
        manifest.application = Some(Application {
            label: Some("Clean HDMI".into()),
            activities: vec![Activity {
                name: ".MainActivity".into(),
                intent_filters: vec![IntentFilter {
                    actions: vec!["android.intent.action.MAIN".into()],
                    categories: vec!["android.intent.category.LAUNCHER".into()],
                }],
                ..Default::default()
            }],
            ..Default::default()
        });
        let chunk = compile_manifest(&manifest, true)?;
        let buf = chunk.to_bytes()?;
        let Chunk::Xml(chunks) = Chunk::parse(&mut Cursor::new(&buf))? else {
            panic!("expected xml");
        };
        let Chunk::StringPool(strings) = &chunks[0] else {
            panic!("expected string pool");
        };
        let Chunk::XmlResourceMap(map) = &chunks[1] else {
            panic!("expected resource map");
        };
        assert_eq!(map.len(), 5);
        assert_eq!(
            &strings[..5],
            ["versionCode", "versionName", "minSdkVersion", "label", "name"]
        );
        let names = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::XmlStartElement(_, element, _) => Some(string(strings, element.name)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "manifest",
                "uses-sdk",
                "application",
                "activity",
                "intent-filter",
                "action",
                "category"
            ]
        );
        assert!(strings.iter().any(|s| s == "com.github.cleanhdmi.MainActivity"));
        let starts = names.len();
        let ends = chunks
            .iter()
            .filter(|chunk| matches!(chunk, Chunk::XmlEndElement(..)))
            .count();
        assert_eq!(starts, ends);
        Ok(())
    }

    fn start_elements(chunks: &[Chunk]) -> Vec<(&ResXmlStartElement, &[ResXmlAttribute])> {
        chunks
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::XmlStartElement(_, element, attrs) => Some((element, attrs.as_slice())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attributes_sorted_by_resource_id() -> Result<()> {
        let root = Element::new("manifest")
            .namespace("android", ANDROID_NS)
            .attr("package", "com.example.app")
            .android_attr("versionName", "1.0")
            .android_attr("versionCode", "1")
            .child(
                Element::new("activity")
                    .android_attr("name", "com.example.app.MainActivity")
                    .android_attr("label", "Main")
                    .android_attr("exported", "true"),
            );
        let Chunk::Xml(chunks) = compile_xml(&root, true)? else {
            panic!("expected xml");
        };
        let Chunk::StringPool(strings) = &chunks[0] else {
            panic!("expected string pool");
        };
        let Chunk::XmlResourceMap(map) = &chunks[1] else {
            panic!("expected resource map");
        };
        let elements = start_elements(&chunks);
        let ids = |attrs: &[ResXmlAttribute]| {
            attrs
                .iter()
                .map(|attr| map.get(attr.name as usize).copied().unwrap_or(u32::MAX))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(elements[0].1), [0x0101_021b, 0x0101_021c, u32::MAX]);
        assert_eq!(string(strings, elements[0].1[2].name), "package");
        assert_eq!(ids(elements[1].1), [0x0101_0001, 0x0101_0003, 0x0101_0010]);
        assert_eq!(
            string(strings, elements[1].1[1].raw_value),
            "com.example.app.MainActivity"
        );
        Ok(())
    }

    #[test]
    fn test_value_equal_to_attribute_name() -> Result<()> {
        let root = Element::new("manifest")
            .namespace("android", ANDROID_NS)
            .attr("package", "com.example.app")
            .child(
                Element::new("application")
                    .android_attr("label", "name")
                    .child(Element::new("activity").android_attr("name", "label")),
            );
        let Chunk::Xml(chunks) = compile_xml(&root, true)? else {
            panic!("expected xml");
        };
        let Chunk::StringPool(strings) = &chunks[0] else {
            panic!("expected string pool");
        };
        let Chunk::XmlResourceMap(map) = &chunks[1] else {
            panic!("expected resource map");
        };
        assert_eq!(map, &[0x0101_0001, 0x0101_0003]);
        for (_, attrs) in start_elements(&chunks).into_iter().skip(1) {
            let attr = &attrs[0];
            assert!(attr.raw_value as usize >= map.len());
            assert_eq!(attr.typed_value.data as i32, attr.raw_value);
            assert_ne!(string(strings, attr.name), string(strings, attr.raw_value));
        }
        assert_eq!(strings.iter().filter(|s| *s == "name").count(), 2);
        assert_eq!(strings.iter().filter(|s| *s == "label").count(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_package() {
        assert!(compile_manifest(&AndroidManifest::new("nodots"), true).is_err());
    }

    #[test]
    fn test_compile_table() -> Result<()> {
        let buf = compile_table().to_bytes()?;
        assert_eq!(buf.len(), 12);
        let mut r = Cursor::new(&buf);
        let header = ResChunkHeader::read(&mut r)?;
        assert_eq!(header.ty, ChunkType::Table as u16);
        assert_eq!(header.header_size, 12);
        assert_eq!(header.size, 12);
        assert_eq!(ResTableHeader::read(&mut r)?.package_count, 0);
        Ok(())
    }
}
