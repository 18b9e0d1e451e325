use crate::compiler::xml::{Attribute, Element};
use crate::manifest::ANDROID_NS;
use crate::res::{ResValue, ResValueType, ResXmlAttribute};
use crate::strings::StringPool;
use anyhow::{Context, Result};

/// Framework attributes understood by the manifest compiler, with their
/// resource ids from `android.R.attr`.
static ATTRIBUTES: &[AAttribute<'static>] = &[
    AAttribute::new("label", Some(0x0101_0001), ResValueType::String),
    AAttribute::new("name", Some(0x0101_0003), ResValueType::String),
    AAttribute::new("hasCode", Some(0x0101_000c), ResValueType::IntBoolean),
    AAttribute::new("debuggable", Some(0x0101_000f), ResValueType::IntBoolean),
    AAttribute::new("exported", Some(0x0101_0010), ResValueType::IntBoolean),
    AAttribute::new("minSdkVersion", Some(0x0101_020c), ResValueType::IntDec),
    AAttribute::new("versionCode", Some(0x0101_021b), ResValueType::IntDec),
    AAttribute::new("versionName", Some(0x0101_021c), ResValueType::String),
    AAttribute::new("targetSdkVersion", Some(0x0101_0270), ResValueType::IntDec),
    AAttribute::new("package", None, ResValueType::String),
];

struct AAttribute<'a> {
    name: &'a str,
    res_id: Option<u32>,
    ty: ResValueType,
}

impl AAttribute<'static> {
    const fn new(name: &'static str, res_id: Option<u32>, ty: ResValueType) -> Self {
        Self { name, res_id, ty }
    }
}

fn lookup(attr: &Attribute) -> Result<&'static AAttribute<'static>> {
    let info = ATTRIBUTES
        .iter()
        .find(|a| a.name == attr.name)
        .with_context(|| format!("unsupported attribute {}", attr.name))?;
    let is_android = attr.namespace.as_deref() == Some(ANDROID_NS);
    anyhow::ensure!(
        is_android == info.res_id.is_some(),
        "attribute {} used with the wrong namespace",
        attr.name
    );
    Ok(info)
}

/// Interns the names of all framework attributes before any other string so
/// that string index `i` maps to resource id `map[i]`.
pub fn create_resource_map(
    node: &Element,
    strings: &mut StringPool,
    map: &mut Vec<u32>,
) -> Result<()> {
    for attr in &node.attributes {
        let info = lookup(attr)?;
        if let Some(res_id) = info.res_id {
            if !strings.contains(&attr.name) {
                strings.id(&attr.name);
                map.push(res_id);
            }
        }
    }
    for node in &node.children {
        create_resource_map(node, strings, map)?;
    }
    Ok(())
}

pub fn compile_attr(attr: &Attribute, strings: &mut StringPool) -> Result<ResXmlAttribute> {
    let info = lookup(attr)?;
    let value = attr.value.as_str();
    let data = match info.ty {
        ResValueType::String => strings.value_id(value),
        ResValueType::IntDec => value
            .parse()
            .with_context(|| format!("expected integer for {}", attr.name))?,
        ResValueType::IntBoolean => match value {
            "true" => 0xffff_ffff,
            "false" => 0x0000_0000,
            _ => anyhow::bail!("expected boolean for {}", attr.name),
        },
    };
    let raw_value = if info.ty == ResValueType::String {
        data as i32
    } else {
        -1
    };
    Ok(ResXmlAttribute {
        namespace: attr
            .namespace
            .as_deref()
            .map(|ns| strings.id(ns) as i32)
            .unwrap_or(-1),
        name: strings.id(&attr.name) as i32,
        raw_value,
        typed_value: ResValue::new(info.ty, data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_map_precedes_other_strings() -> Result<()> {
        let root = Element::new("manifest")
            .attr("package", "com.example.app")
            .android_attr("versionCode", "1")
            .child(Element::new("uses-sdk").android_attr("minSdkVersion", "10"))
            .child(Element::new("application").android_attr("label", "App"));
        let mut strings = StringPool::default();
        let mut map = vec![];
        create_resource_map(&root, &mut strings, &mut map)?;
        assert_eq!(map, vec![0x0101_021b, 0x0101_020c, 0x0101_0001]);
        assert_eq!(strings.finalize(), vec!["versionCode", "minSdkVersion", "label"]);
        Ok(())
    }

    #[test]
    fn typed_values() -> Result<()> {
        let mut strings = StringPool::default();
        let code = Element::new("x").android_attr("versionCode", "42");
        let attr = compile_attr(&code.attributes[0], &mut strings)?;
        assert_eq!(attr.raw_value, -1);
        assert_eq!(attr.typed_value, ResValue::new(ResValueType::IntDec, 42));

        let debuggable = Element::new("x").android_attr("debuggable", "true");
        let attr = compile_attr(&debuggable.attributes[0], &mut strings)?;
        assert_eq!(attr.typed_value.data, 0xffff_ffff);

        let package = Element::new("x").attr("package", "com.example.app");
        let attr = compile_attr(&package.attributes[0], &mut strings)?;
        assert_eq!(attr.namespace, -1);
        assert_eq!(strings.get(attr.raw_value as u32), Some("com.example.app"));
        assert_eq!(attr.typed_value.data as i32, attr.raw_value);
        Ok(())
    }

    #[test]
    fn rejects_unknown_and_misplaced() {
        let mut strings = StringPool::default();
        let unknown = Element::new("x").android_attr("theme", "@style/x");
        assert!(compile_attr(&unknown.attributes[0], &mut strings).is_err());
        let misplaced = Element::new("x").attr("versionCode", "1");
        assert!(compile_attr(&misplaced.attributes[0], &mut strings).is_err());
        let bad_int = Element::new("x").android_attr("versionCode", "one");
        assert!(compile_attr(&bad_int.attributes[0], &mut strings).is_err());
    }
}
