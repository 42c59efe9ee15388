//! `hierarchy.xml`: a tree of named nodes, some of which point at data files.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <folder name="root">
//!   <page name="Sales" dataFile="1"/>
//!   <folder name="Archive">
//!     <page name="2023" dataFile="2"/>
//!   </folder>
//! </folder>
//! ```
//!
//! A node's `name` is its path segment below the root and `dataFile` is the
//! identity of the data file it shows. Element names and other attributes are
//! carried through untouched; text content is not part of the model.
//!
//! The merge keeps everything in `first` and grafts in whatever `second`
//! added, so neither fork loses pages.

use std::collections::HashSet;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use super::HandlerError;

const NAME_ATTR: &str = "name";
const DATA_FILE_ATTR: &str = "dataFile";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One element of the hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Element name.
    pub tag: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements.
    pub children: Vec<Node>,
}

impl Node {
    /// Value of attribute `key`.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The node's path segment; unnamed nodes use `""`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.attribute(NAME_ATTR).unwrap_or_default()
    }

    /// The data file this node points at, if any.
    #[must_use]
    pub fn data_file(&self) -> Option<&str> {
        self.attribute(DATA_FILE_ATTR)
    }

    fn set_name(&mut self, name: String) {
        match self.attributes.iter_mut().find(|(k, _)| k == NAME_ATTR) {
            Some((_, v)) => *v = name,
            None => self.attributes.push((NAME_ATTR.to_owned(), name)),
        }
    }

    /// The same element without children.
    fn shell(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }
}

/// A parsed hierarchy document. An empty document has no root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    /// The single top-level element.
    pub root: Option<Node>,
}

impl Document {
    /// Parse XML text. Blank input is an empty document.
    ///
    /// # Errors
    /// Returns a description of the problem for malformed XML or more than
    /// one top-level element.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut stack: Vec<Node> = Vec::new();
        let mut root: Option<Node> = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(element(&e)?),
                Ok(Event::Empty(e)) => attach(&mut stack, &mut root, element(&e)?)?,
                Ok(Event::End(_)) => {
                    let node = stack.pop().ok_or("unbalanced end tag")?;
                    attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!(
                        "at byte {}: {e}",
                        reader.buffer_position()
                    ));
                }
            }
        }
        if !stack.is_empty() {
            return Err("unexpected end of document".to_owned());
        }
        Ok(Self { root })
    }

    /// Serialize with an XML declaration and two-space indentation. An empty
    /// document renders as the empty string.
    ///
    /// # Errors
    /// Returns [`HandlerError::Xml`] if the writer fails.
    pub fn render(&self) -> Result<String, HandlerError> {
        let Some(root) = &self.root else {
            return Ok(String::new());
        };
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        write_node(&mut writer, root)?;
        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| HandlerError::Xml(e.to_string()))
    }

    fn visit<'a>(&'a self, mut f: impl FnMut(&[&'a str], &'a Node)) {
        fn walk<'a>(
            node: &'a Node,
            path: &mut Vec<&'a str>,
            f: &mut impl FnMut(&[&'a str], &'a Node),
        ) {
            for child in &node.children {
                path.push(child.name());
                f(path.as_slice(), child);
                walk(child, path, f);
                path.pop();
            }
        }
        if let Some(root) = &self.root {
            walk(root, &mut Vec::new(), &mut f);
        }
    }
}

fn element(e: &BytesStart<'_>) -> Result<Node, String> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| err.to_string())?;
        attributes.push((key, value.into_owned()));
    }
    Ok(Node {
        tag: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_some() {
        return Err("more than one top-level element".to_owned());
    } else {
        *root = Some(node);
    }
    Ok(())
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<(), HandlerError> {
    let mut start = BytesStart::new(node.tag.as_str());
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if node.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_error)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.tag.as_str())))
        .map_err(xml_error)?;
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn xml_error(e: quick_xml::Error) -> HandlerError {
    HandlerError::Xml(e.to_string())
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn parse_branch(label: &str, bytes: &[u8]) -> Option<Document> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(branch = label, error = %e, "hierarchy is not UTF-8; ignoring branch");
            return None;
        }
    };
    match Document::parse(text) {
        Ok(doc) => Some(doc),
        Err(reason) => {
            tracing::warn!(branch = label, %reason, "hierarchy is not valid XML; ignoring branch");
            None
        }
    }
}

/// Merge three hierarchy documents and render the result.
///
/// # Errors
/// Returns [`HandlerError::Xml`] if the merged document cannot be written.
pub fn merge(parent: &[u8], first: &[u8], second: &[u8]) -> Result<String, HandlerError> {
    let parent = parse_branch("parent", parent);
    let first = parse_branch("first", first);
    let second = parse_branch("second", second);
    let merged = match (first, second) {
        (Some(first), Some(second)) => graft(&parent.unwrap_or_default(), &first, &second),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => parent.unwrap_or_default(),
    };
    merged.render()
}

/// `first`, plus every subtree of `second` that neither `parent` nor `first`
/// knows about, at the same path.
#[must_use]
pub fn graft(parent: &Document, first: &Document, second: &Document) -> Document {
    let Some(first_root) = &first.root else {
        return second.clone();
    };

    let mut known_ids: HashSet<&str> = HashSet::new();
    let mut known_paths: HashSet<Vec<&str>> = HashSet::new();
    for doc in [parent, first] {
        doc.visit(|path, node| {
            if let Some(id) = node.data_file() {
                known_ids.insert(id);
            }
            known_paths.insert(path.to_vec());
        });
    }

    let mut additions = Vec::new();
    if let Some(second_root) = &second.root {
        collect_additions(
            second_root,
            &mut Vec::new(),
            &mut Vec::new(),
            &known_ids,
            &known_paths,
            &mut additions,
        );
    }

    let mut root = first_root.clone();
    for (ancestors, node) in additions {
        let mut target = &mut root;
        for ancestor in ancestors {
            let index = match target
                .children
                .iter()
                .position(|c| c.name() == ancestor.name())
            {
                Some(index) => index,
                None => {
                    target.children.push(ancestor.shell());
                    target.children.len() - 1
                }
            };
            target = &mut target.children[index];
        }
        let mut added = node.clone();
        if added.attribute(NAME_ATTR).is_some() {
            let name = unique_name(target, added.name());
            if name != added.name() {
                tracing::debug!(from = added.name(), to = %name, "renamed grafted node");
                added.set_name(name);
            }
        }
        target.children.push(added);
    }

    Document { root: Some(root) }
}

fn collect_additions<'a>(
    node: &'a Node,
    ancestors: &mut Vec<&'a Node>,
    path: &mut Vec<&'a str>,
    known_ids: &HashSet<&str>,
    known_paths: &HashSet<Vec<&str>>,
    out: &mut Vec<(Vec<&'a Node>, &'a Node)>,
) {
    for child in &node.children {
        path.push(child.name());
        let is_new = match child.data_file() {
            Some(id) => !known_ids.contains(id),
            None => !known_paths.contains(path.as_slice()),
        };
        if is_new {
            out.push((ancestors.clone(), child));
        } else {
            ancestors.push(child);
            collect_additions(child, ancestors, path, known_ids, known_paths, out);
            ancestors.pop();
        }
        path.pop();
    }
}

/// `name`, or `name (2)`, `name (3)`, ... whichever is free among `parent`'s
/// children. With `n` children at most `n + 1` candidates are tried, so a
/// free one always exists.
fn unique_name(parent: &Node, name: &str) -> String {
    let taken = |candidate: &str| parent.children.iter().any(|c| c.name() == candidate);
    let mut candidate = name.to_owned();
    let mut n = 1_usize;
    while taken(&candidate) {
        n += 1;
        candidate = format!("{name} ({n})");
    }
    candidate
}
