//! In-process isolated context.
//!
//! [`LocalContext`] owns a live copy of a compiled document and behaves like the
//! browser frame running the instrumentation script: it binds targets, emits
//! `elementSelected` when an instance is clicked, and applies
//! `applyModifications` commands arriving on its channel endpoint. It shares
//! no state with the host beyond the channel.

use std::collections::HashMap;

use tracing::debug;

use crate::channel::ContextEndpoint;
use crate::compiler::CompiledDocument;
use crate::dom::{Document, NodeId};
use crate::injector::{instrument_html, InstanceBinding, SELECTED_CLASS};
use crate::protocol::{
    ApplyModifications, ContextMessage, ElementSelected, Epoch, HostMessage, ObservedStyles,
    PropertyName,
};

/// Everything needed to mount an isolated context for one epoch.
#[derive(Debug)]
pub struct ContextMount {
    pub epoch: Epoch,
    pub document: CompiledDocument,
    pub endpoint: ContextEndpoint,
}

/// A mounted, instrumented document.
#[derive(Debug)]
pub struct LocalContext {
    epoch: Epoch,
    document: Document,
    bindings: Vec<InstanceBinding>,
    /// instance id → index into `bindings`
    registry: HashMap<String, usize>,
    selected: Option<NodeId>,
    endpoint: ContextEndpoint,
}

impl LocalContext {
    pub fn mount(mount: ContextMount) -> Self {
        let instrumented = instrument_html(mount.document.as_str());
        let registry = instrumented
            .bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (b.instance_id.clone(), i))
            .collect();
        debug!(epoch = %mount.epoch, bindings = instrumented.bindings.len(), "context mounted");
        LocalContext {
            epoch: mount.epoch,
            document: instrumented.document,
            bindings: instrumented.bindings,
            registry,
            selected: None,
            endpoint: mount.endpoint,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn bindings(&self) -> &[InstanceBinding] {
        &self.bindings
    }

    pub fn binding(&self, instance_id: &str) -> Option<&InstanceBinding> {
        self.registry.get(instance_id).map(|i| &self.bindings[*i])
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Drain pending commands. Returns how many were applied to a live node.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(frame) = self.endpoint.try_recv() {
            if frame.epoch != self.epoch {
                debug!(frame_epoch = %frame.epoch, epoch = %self.epoch, "dropping command from foreign epoch");
                continue;
            }
            match frame.message {
                HostMessage::ApplyModifications(cmd) => {
                    if self.apply(&cmd) {
                        applied += 1;
                    }
                }
            }
        }
        applied
    }

    /// Apply one command. An unknown or detached instance is a no-op.
    pub fn apply(&mut self, cmd: &ApplyModifications) -> bool {
        let Some(node) = self.live_node(&cmd.element_id) else {
            debug!(instance_id = %cmd.element_id, "no live element for instance; command ignored");
            return false;
        };
        for (property, value) in cmd.modifications.styles() {
            if let (Some(css), Some(el)) = (property.css_name(), self.document.element_mut(node)) {
                el.set_style_property(&css, value);
            }
        }
        if let Some(text) = cmd.modifications.text_content() {
            self.document.set_text_content(node, text);
        }
        true
    }

    /// Simulate a user click on an instance: move the selection highlight and
    /// emit `elementSelected`.
    pub fn click(&mut self, instance_id: &str) -> bool {
        let Some(node) = self.live_node(instance_id) else {
            debug!(%instance_id, "click on unknown instance");
            return false;
        };
        let selector = self
            .binding(instance_id)
            .map(|b| b.selector.clone())
            .unwrap_or_default();

        if let Some(previous) = self.selected.replace(node) {
            if previous != node {
                if let Some(el) = self.document.element_mut(previous) {
                    el.remove_class(SELECTED_CLASS);
                }
            }
        }
        let Some(el) = self.document.element_mut(node) else {
            return false;
        };
        el.add_class(SELECTED_CLASS);
        let tag_name = el.name.to_ascii_uppercase();

        let event = ElementSelected {
            element_id: instance_id.to_string(),
            tag_name,
            text_content: self.document.text_content(node),
            selector,
            styles: self.observe(node),
        };
        self.endpoint.emit(ContextMessage::ElementSelected(event))
    }

    /// Current text of an instance.
    pub fn text_of(&self, instance_id: &str) -> Option<String> {
        self.live_node(instance_id)
            .map(|node| self.document.text_content(node))
    }

    /// Current inline value of a style property on an instance.
    pub fn inline_style(&self, instance_id: &str, property: PropertyName) -> Option<String> {
        let node = self.live_node(instance_id)?;
        let css = property.css_name()?;
        self.document.element(node)?.style_property(&css)
    }

    /// Serialize the live document.
    pub fn render(&self) -> String {
        self.document.serialize()
    }

    fn live_node(&self, instance_id: &str) -> Option<NodeId> {
        let node = self.binding(instance_id)?.node;
        self.document.is_connected(node).then_some(node)
    }

    fn observe(&self, node: NodeId) -> ObservedStyles {
        let mut styles = ObservedStyles::default();
        let Some(el) = self.document.element(node) else {
            return styles;
        };
        for property in ObservedStyles::PROPERTIES {
            if let Some(value) = property.css_name().and_then(|css| el.style_property(&css)) {
                styles.set(property, value);
            }
        }
        styles
    }
}
