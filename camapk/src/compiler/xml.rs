use crate::manifest::ANDROID_NS;
use crate::res::{
    Chunk, ResXmlAttribute, ResXmlEndElement, ResXmlNamespace, ResXmlNodeHeader,
    ResXmlStartElement,
};
use crate::strings::StringPool;
use anyhow::Result;

/// An xml element before compilation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Element {
    pub name: String,
    /// `(prefix, uri)` pairs declared on this element.
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            namespace: None,
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn android_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            namespace: Some(ANDROID_NS.to_string()),
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }
}

/// Compiles an element tree into a binary xml document.
///
/// The string pool and resource map come first. When `balanced` is false the
/// end-element and end-namespace chunks are left out.
pub fn compile_xml(root: &Element, balanced: bool) -> Result<Chunk> {
    let mut strings = StringPool::default();
    let mut chunks = vec![Chunk::Null, Chunk::Null];
    let mut map = vec![];
    super::attributes::create_resource_map(root, &mut strings, &mut map)?;
    strings.reserve();
    let namespaces = root
        .namespaces
        .iter()
        .map(|(prefix, uri)| ResXmlNamespace {
            prefix: strings.id(prefix) as i32,
            uri: strings.id(uri) as i32,
        })
        .collect::<Vec<_>>();
    for ns in &namespaces {
        chunks.push(Chunk::XmlStartNamespace(ResXmlNodeHeader::default(), *ns));
    }
    compile_node(root, &mut strings, &map, &mut chunks, balanced)?;
    if balanced {
        for ns in namespaces.iter().rev() {
            chunks.push(Chunk::XmlEndNamespace(ResXmlNodeHeader::default(), *ns));
        }
    }
    chunks[0] = Chunk::StringPool(strings.finalize());
    chunks[1] = Chunk::XmlResourceMap(map);
    Ok(Chunk::Xml(chunks))
}

fn compile_node(
    node: &Element,
    strings: &mut StringPool,
    map: &[u32],
    chunks: &mut Vec<Chunk>,
    balanced: bool,
) -> Result<()> {
    let mut attrs = vec![];
    for attr in &node.attributes {
        attrs.push(super::attributes::compile_attr(attr, strings)?);
    }
    // framework attributes by resource id, then the rest by name
    attrs.sort_by_key(|attr| {
        let res_id = map.get(attr.name as usize).copied().unwrap_or(u32::MAX);
        (res_id, strings.get(attr.name as u32))
    });
    let name = strings.id(&node.name) as i32;
    chunks.push(Chunk::XmlStartElement(
        ResXmlNodeHeader::default(),
        ResXmlStartElement {
            namespace: -1,
            name,
            attribute_start: ResXmlStartElement::SIZE,
            attribute_size: ResXmlAttribute::SIZE,
            attribute_count: u16::try_from(attrs.len())?,
            id_index: 0,
            class_index: 0,
            style_index: 0,
        },
        attrs,
    ));
    for node in &node.children {
        compile_node(node, strings, map, chunks, balanced)?;
    }
    if balanced {
        chunks.push(Chunk::XmlEndElement(
            ResXmlNodeHeader::default(),
            ResXmlEndElement {
                namespace: -1,
                name,
            },
        ));
    }
    Ok(())
}
