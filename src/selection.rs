//! Host-side selection tracking.

use serde::Serialize;

use crate::protocol::{ElementSelected, Modifications, ObservedStyles};

/// The instance the user last clicked, as reported by the isolated context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub instance_id: String,
    pub tag_name: String,
    pub text_content: String,
    pub selector: String,
    pub styles: ObservedStyles,
}

impl From<ElementSelected> for Selection {
    fn from(ev: ElementSelected) -> Self {
        Selection {
            instance_id: ev.element_id,
            tag_name: ev.tag_name,
            text_content: ev.text_content,
            selector: ev.selector,
            styles: ev.styles,
        }
    }
}

/// Holds at most one selection; a new one always replaces the old.
#[derive(Debug, Clone, Default)]
pub struct SelectionResolver {
    current: Option<Selection>,
}

impl SelectionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, selection: Selection) {
        self.current = Some(selection);
    }

    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Fold applied modifications into the held selection so later prompts
    /// see the element as it now is. Ignored if `instance_id` is no longer
    /// the selected instance.
    pub fn record_applied(&mut self, instance_id: &str, modifications: &Modifications) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if current.instance_id != instance_id {
            return;
        }
        for (property, value) in modifications.styles() {
            current.styles.set(property, value);
        }
        if let Some(text) = modifications.text_content() {
            current.text_content = text.to_string();
        }
    }
}
