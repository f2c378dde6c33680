//! HTML loading and serialization for the document arena.
//!
//! Parsing goes through html5ever so the engine sees exactly the tree a
//! browser would build from the server-rendered page (including `<template>`
//! contents, which rcdom keeps on a separate handle).

use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, parse_document, parse_fragment, QualName};
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};

use super::{Document, NodeData, NodeId};

/// Parse a full HTML document into a fresh arena.
pub fn load_document(html: &str) -> Document {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);
    let mut doc = Document::new();
    let root = doc.root();
    convert_children(&mut doc, root, &dom.document);
    doc
}

/// Parse an HTML fragment; the parsed top-level nodes are appended to
/// `parent` and returned.
pub fn append_fragment(doc: &mut Document, parent: NodeId, html: &str) -> Vec<NodeId> {
    let dom = parse_fragment(
        RcDom::default(),
        Default::default(),
        QualName::new(None, ns!(html), local_name!("div")),
        vec![],
    )
    .one(html);

    // Fragment contents hang off the synthetic <html> element.
    let document = &dom.document;
    let children = document.children.borrow();
    let Some(container) = children
        .iter()
        .find(|child| matches!(child.data, RcNodeData::Element { .. }))
    else {
        return Vec::new();
    };

    let before = doc.children(parent).len();
    convert_children(doc, parent, container);
    doc.children(parent).split_off(before)
}

fn convert_children(doc: &mut Document, parent: NodeId, handle: &Handle) {
    for child in handle.children.borrow().iter() {
        convert_node(doc, parent, child);
    }
}

fn convert_node(doc: &mut Document, parent: NodeId, handle: &Handle) {
    match &handle.data {
        RcNodeData::Document => convert_children(doc, parent, handle),
        RcNodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let element = doc.create_element(&name.local);
            for attr in attrs.borrow().iter() {
                doc.set_attr(element, &attr.name.local, &attr.value);
            }
            doc.append_child(parent, element);
            // Template children live on the template handle, not the node.
            if let Some(contents) = template_contents.borrow().as_ref() {
                convert_children(doc, element, contents);
            } else {
                convert_children(doc, element, handle);
            }
        }
        RcNodeData::Text { contents } => {
            let text = contents.borrow();
            if !text.is_empty() {
                let node = doc.create_text(&text);
                doc.append_child(parent, node);
            }
        }
        RcNodeData::Comment { contents } => {
            let node = doc.create_comment(&contents.to_string());
            doc.append_child(parent, node);
        }
        RcNodeData::Doctype { .. } | RcNodeData::ProcessingInstruction { .. } => {}
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Serialize a subtree back to HTML.
pub fn to_html(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, id, &mut out);
    out
}

/// Serialize only the children of a node (the `innerHTML` view).
pub fn inner_html(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(id) {
        write_node(doc, child, &mut out);
    }
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    let Some(node) = doc.get(id) else {
        return;
    };
    match &node.data {
        NodeData::Document => {
            for &child in &node.children {
                write_node(doc, child, out);
            }
        }
        NodeData::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    escape_attr(value, out);
                    out.push('"');
                }
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                return;
            }
            for &child in &node.children {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
        NodeData::Text(text) => escape_text(text, out),
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}

fn escape_text(text: &str, out: &mut String) {
    for character in text.chars() {
        match character {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn escape_attr(text: &str, out: &mut String) {
    for character in text.chars() {
        match character {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            other => out.push(other),
        }
    }
}
