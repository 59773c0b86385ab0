//! Instrumentation: binding target selectors to concrete nodes.
//!
//! The compiled document carries [`INJECTOR_JS`], which performs this binding
//! inside the browser frame. [`instrument_html`] performs the same binding on
//! an owned [`Document`] for the in-process context, so both sides agree on
//! which node every instance id names.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::dom::{Document, NodeId, QueryResult};
use crate::snapshot::TargetableElement;

/// The instrumentation script embedded in every compiled document.
pub const INJECTOR_JS: &str = include_str!("injector.js");

/// Attribute stamped on bound nodes. Space-separated when a node is bound
/// by several targets.
pub const INSTANCE_ATTR: &str = "data-cro-instance";

/// Attribute marking elements the compiler injected; never bound.
pub const MARKER_ATTR: &str = "data-cro";

pub const TARGETS_SCRIPT_ID: &str = "cro-targets";
pub const SELECTED_CLASS: &str = "cro-selected";

/// One concrete node bound to an instance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBinding {
    pub instance_id: String,
    pub cro_id: String,
    pub selector: String,
    pub ordinal: usize,
    #[serde(skip)]
    pub node: NodeId,
}

/// An instrumented document plus its bindings in binding order.
#[derive(Debug, Clone)]
pub struct Instrumented {
    pub document: Document,
    pub bindings: Vec<InstanceBinding>,
}

/// Read the embedded target list back out of a compiled document.
pub fn read_targets(doc: &Document) -> Vec<TargetableElement> {
    let Some(node) = doc.find_by_attr("id", TARGETS_SCRIPT_ID) else {
        debug!("compiled document carries no target list");
        return Vec::new();
    };
    match serde_json::from_str(&doc.text_content(node)) {
        Ok(targets) => targets,
        Err(e) => {
            warn!(error = %e, "unreadable target list; no elements will be bound");
            Vec::new()
        }
    }
}

/// Parse a compiled document and bind its embedded targets.
pub fn instrument_html(html: &str) -> Instrumented {
    let targets = read_targets(&Document::parse(html));
    let selectors: Vec<&str> = targets.iter().map(|t| t.selector.as_str()).collect();
    let (mut document, matches) = Document::parse_querying(html, &selectors);
    let bindings = instrument(&mut document, &targets, &matches);
    Instrumented { document, bindings }
}

/// Stamp instance ids onto matched nodes. `matches[i]` holds the selector
/// results for `targets[i]`.
///
/// Invalid selectors are skipped. The first target to name a `croId` owns it;
/// later targets with the same `croId` bind nothing.
pub fn instrument(
    doc: &mut Document,
    targets: &[TargetableElement],
    matches: &[QueryResult],
) -> Vec<InstanceBinding> {
    let mut bindings = Vec::new();
    let mut claimed = HashSet::new();

    for (target, result) in targets.iter().zip(matches) {
        if !claimed.insert(target.cro_id.as_str()) {
            warn!(cro_id = %target.cro_id, selector = %target.selector, "duplicate croId skipped");
            continue;
        }
        let nodes = match result {
            Ok(nodes) => nodes,
            Err(reason) => {
                warn!(cro_id = %target.cro_id, selector = %target.selector, %reason, "invalid selector skipped");
                continue;
            }
        };
        let eligible: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| doc.element(*id).is_some_and(|el| el.attr(MARKER_ATTR).is_none()))
            .collect();

        for (ordinal, node) in eligible.into_iter().enumerate() {
            let instance_id = target.instance_id(ordinal);
            if let Some(el) = doc.element_mut(node) {
                let stamped = match el.attr(INSTANCE_ATTR) {
                    Some(existing) => format!("{} {}", existing, instance_id),
                    None => instance_id.clone(),
                };
                el.set_attr(INSTANCE_ATTR, stamped);
            }
            bindings.push(InstanceBinding {
                instance_id,
                cro_id: target.cro_id.clone(),
                selector: target.selector.clone(),
                ordinal,
                node,
            });
        }
    }

    debug!(targets = targets.len(), bindings = bindings.len(), "instrumented document");
    bindings
}
