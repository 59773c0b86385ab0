//! Snapshot compiler: turns a [`SiteSnapshot`] into one self-contained document
//! that can be rendered in a sandboxed frame.
//!
//! The output carries the page markup with every script and navigation hook
//! stripped, the snapshot CSS, the editor overlay styles, the target list as
//! inert JSON, and the instrumentation script. Compilation is a pure function
//! of `(snapshot, options)`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dom::{Document, Element, NodeId, NodeKind};
use crate::error::Result;
use crate::injector::{INJECTOR_JS, MARKER_ATTR, TARGETS_SCRIPT_ID};
use crate::snapshot::SiteSnapshot;

const DEFAULT_HOVER_COLOR: &str = "#58a6ff";
const DEFAULT_SELECTED_COLOR: &str = "#f0883e";

/// Attributes whose value is a URL that a `javascript:` scheme could abuse.
const URL_ATTRS: &[&str] = &[
    "href", "src", "action", "formaction", "xlink:href", "poster", "data", "background",
];

// ---------------------------------------------------------------------------
// Options / output
// ---------------------------------------------------------------------------

/// Editor overlay colors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub hover_color: String,
    pub selected_color: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            hover_color: DEFAULT_HOVER_COLOR.to_string(),
            selected_color: DEFAULT_SELECTED_COLOR.to_string(),
        }
    }
}

impl CompileOptions {
    /// The editor stylesheet: hover/selection outlines and inert-link cursors.
    pub fn editor_css(&self) -> String {
        let hover = safe_color(&self.hover_color, DEFAULT_HOVER_COLOR);
        let selected = safe_color(&self.selected_color, DEFAULT_SELECTED_COLOR);
        format!(
            ".cro-hover{{outline:2px dashed {hover} !important;outline-offset:2px !important}}\n\
             .cro-selected{{outline:2px solid {selected} !important;outline-offset:2px !important}}\n\
             [data-cro-instance]{{cursor:pointer}}\n\
             a[href]:not([data-cro-instance]),area[href]{{cursor:default}}\n"
        )
    }
}

fn safe_color<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let value = value.trim();
    let unsafe_char = |c: char| matches!(c, ';' | '{' | '}' | '<' | '>' | '!' | '\\') || c.is_control();
    if value.is_empty() || value.len() > 64 || value.chars().any(unsafe_char) {
        fallback
    } else {
        value
    }
}

/// A compiled, self-contained document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDocument {
    pub html: String,
}

impl CompiledDocument {
    pub fn as_str(&self) -> &str {
        &self.html
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile `snapshot` into a sandbox-renderable document.
pub fn compile(snapshot: &SiteSnapshot, options: &CompileOptions) -> Result<CompiledDocument> {
    let source = normalize(snapshot);
    let mut doc = Document::parse(&source);

    ensure_doctype(&mut doc);
    let removed = sanitize(&mut doc);
    debug!(
        removed_nodes = removed.nodes,
        removed_attrs = removed.attrs,
        "sanitized snapshot markup"
    );

    let head = ensure_section(&mut doc, "head", 0);
    if doc
        .descendants(head)
        .into_iter()
        .all(|id| doc.element(id).map_or(true, |el| el.name != "title"))
        && !snapshot.structure_metadata.title.is_empty()
    {
        doc.append_element_with_text(head, Element::new("title"), &snapshot.structure_metadata.title);
    }
    doc.append_element_with_text(
        head,
        Element::new("style").with_attr(MARKER_ATTR, "page"),
        &escape_closing_tag(&snapshot.css, "style"),
    );
    doc.append_element_with_text(
        head,
        Element::new("style").with_attr(MARKER_ATTR, "editor"),
        &options.editor_css(),
    );

    let body = ensure_section(&mut doc, "body", usize::MAX);
    let targets = embed_json(&serde_json::to_string(&snapshot.targetable_elements)?);
    doc.append_element_with_text(
        body,
        Element::new("script")
            .with_attr("type", "application/json")
            .with_attr("id", TARGETS_SCRIPT_ID)
            .with_attr(MARKER_ATTR, "targets"),
        &targets,
    );
    doc.append_element_with_text(
        body,
        Element::new("script").with_attr(MARKER_ATTR, "injector"),
        INJECTOR_JS,
    );

    Ok(CompiledDocument {
        html: doc.serialize(),
    })
}

/// Wrap markup that is not a full document in a minimal shell.
fn normalize(snapshot: &SiteSnapshot) -> String {
    let lower = snapshot.html.to_ascii_lowercase();
    if lower.contains("<html") {
        return snapshot.html.clone();
    }
    warn!(
        len = snapshot.html.len(),
        "snapshot markup is not a full document; wrapping in a shell"
    );
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
        escape_text(&snapshot.structure_metadata.title),
        snapshot.html
    )
}

fn ensure_doctype(doc: &mut Document) {
    let has_doctype = doc
        .node(Document::ROOT)
        .map(|root| {
            root.children()
                .iter()
                .any(|c| matches!(doc.node(*c).map(|n| &n.kind), Some(NodeKind::Doctype(_))))
        })
        .unwrap_or(false);
    if !has_doctype {
        doc.insert_child(Document::ROOT, 0, NodeKind::Doctype("html".to_string()));
    }
}

/// Find `<head>`/`<body>`, creating it under `<html>` at `position` if the
/// parser produced none (e.g. frameset documents have no body).
fn ensure_section(doc: &mut Document, name: &str, position: usize) -> NodeId {
    if let Some(id) = doc.first_element_named(name) {
        return id;
    }
    let html = match doc.first_element_named("html") {
        Some(id) => id,
        None => doc.append_child(Document::ROOT, NodeKind::Element(Element::new("html"))),
    };
    doc.insert_child(html, position, NodeKind::Element(Element::new(name)))
}

#[derive(Debug, Default)]
struct Removed {
    nodes: usize,
    attrs: usize,
}

/// Strip everything that could run code or navigate away from the frame.
fn sanitize(doc: &mut Document) -> Removed {
    let mut removed = Removed::default();
    for id in doc.descendants(Document::ROOT) {
        let Some(el) = doc.element(id) else {
            continue;
        };
        if is_executable(el) {
            doc.detach(id);
            removed.nodes += 1;
            continue;
        }
        let Some(el) = doc.element_mut(id) else {
            continue;
        };
        removed.attrs += scrub_attributes(el);
    }
    removed
}

fn is_executable(el: &Element) -> bool {
    match el.name.as_str() {
        "script" | "base" => true,
        "meta" => el
            .attr("http-equiv")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh")),
        _ => false,
    }
}

fn scrub_attributes(el: &mut Element) -> usize {
    let before = el.attrs.len();
    let is_link_like = matches!(el.name.as_str(), "a" | "area");
    let is_form = el.name == "form";

    let mut rewrite_href = false;
    el.attrs.retain(|(name, value)| {
        let name = name.to_ascii_lowercase();
        if name.starts_with("on") || name == "srcdoc" || name == "formaction" {
            return false;
        }
        if (is_link_like || is_form) && name == "target" {
            return false;
        }
        if is_form && name == "action" {
            return false;
        }
        if URL_ATTRS.contains(&name.as_str()) && is_script_url(value) {
            if name == "href" {
                rewrite_href = true;
                return true;
            }
            return false;
        }
        true
    });
    if rewrite_href {
        el.set_attr("href", "#");
    }
    before - el.attrs.len() + usize::from(rewrite_href)
}

/// `javascript:` (and `vbscript:`) after stripping the whitespace and control
/// characters browsers ignore inside a scheme.
fn is_script_url(value: &str) -> bool {
    let scheme: String = value
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .take(11)
        .collect::<String>()
        .to_ascii_lowercase();
    scheme.starts_with("javascript:") || scheme.starts_with("vbscript:")
}

/// Escape JSON for embedding inside a `<script>` element.
fn embed_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

/// Break any `</tag` sequence (case-insensitive) so raw text cannot close its
/// element early.
fn escape_closing_tag(text: &str, tag: &str) -> String {
    let needle = format!("</{}", tag);
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(&needle) {
        out.push_str(&text[last..idx]);
        out.push_str("<\\/");
        last = idx + 2;
    }
    out.push_str(&text[last..]);
    out
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
