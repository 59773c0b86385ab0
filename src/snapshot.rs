//! Scraped-site snapshot input types.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Page-level metadata captured by the scraper.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureMetadata {
    #[serde(default)]
    pub title: String,
}

/// A logical, selector-addressed group of editable elements. One target may
/// match several DOM nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetableElement {
    pub cro_id: String,
    pub selector: String,
    #[serde(rename = "type", default)]
    pub element_type: String,
    /// Sample of the element's text at scrape time.
    #[serde(default)]
    pub text: String,
}

impl TargetableElement {
    pub fn new(cro_id: impl Into<String>, selector: impl Into<String>) -> Self {
        TargetableElement {
            cro_id: cro_id.into(),
            selector: selector.into(),
            element_type: String::new(),
            text: String::new(),
        }
    }

    /// The instance id for the `ordinal`-th node matching this target.
    pub fn instance_id(&self, ordinal: usize) -> String {
        format!("{}-{}", self.cro_id, ordinal)
    }
}

/// Immutable captured representation of a scraped page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSnapshot {
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub structure_metadata: StructureMetadata,
    #[serde(default)]
    pub targetable_elements: Vec<TargetableElement>,
}

impl SiteSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(EditorError::InvalidSnapshot)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Look up a target by its logical id.
    pub fn target(&self, cro_id: &str) -> Option<&TargetableElement> {
        self.targetable_elements.iter().find(|t| t.cro_id == cro_id)
    }

    /// The target an instance id (`{croId}-{ordinal}`) was minted from.
    pub fn target_for_instance(&self, instance_id: &str) -> Option<&TargetableElement> {
        let (cro_id, ordinal) = instance_id.rsplit_once('-')?;
        let ordinal: usize = ordinal.parse().ok()?;
        self.target(cro_id)
            .filter(|t| t.instance_id(ordinal) == instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "html": "<button class=\"cta\">Buy</button>",
        "css": "button { color: red; }",
        "structureMetadata": { "title": "Shop" },
        "targetableElements": [
            { "croId": "cta", "selector": "button.cta", "type": "button", "text": "Buy" }
        ]
    }"#;

    #[test]
    fn test_snapshot_parses_wire_shape() {
        let snap = SiteSnapshot::from_json(SAMPLE).unwrap();
        assert_eq!(snap.structure_metadata.title, "Shop");
        assert_eq!(snap.targetable_elements.len(), 1);
        let t = &snap.targetable_elements[0];
        assert_eq!(t.cro_id, "cta");
        assert_eq!(t.selector, "button.cta");
        assert_eq!(t.element_type, "button");
        assert_eq!(t.text, "Buy");
    }

    #[test]
    fn test_snapshot_optional_fields_default() {
        let snap = SiteSnapshot::from_json(r#"{"html":"<p>x</p>"}"#).unwrap();
        assert!(snap.css.is_empty());
        assert!(snap.targetable_elements.is_empty());
        assert!(snap.structure_metadata.title.is_empty());
    }

    #[test]
    fn test_snapshot_missing_html_is_invalid() {
        let err = SiteSnapshot::from_json(r#"{"css":""}"#).unwrap_err();
        assert!(matches!(err, EditorError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_instance_id_format() {
        let t = TargetableElement::new("hero-title", "h1");
        assert_eq!(t.instance_id(0), "hero-title-0");
        assert_eq!(t.instance_id(12), "hero-title-12");
    }

    #[test]
    fn test_target_lookup() {
        let snap = SiteSnapshot::from_json(SAMPLE).unwrap();
        assert!(snap.target("cta").is_some());
        assert!(snap.target("missing").is_none());
    }

    #[test]
    fn test_target_for_instance() {
        let snap = SiteSnapshot {
            targetable_elements: vec![
                TargetableElement::new("cta", "button.cta"),
                TargetableElement::new("hero-title", "h1"),
            ],
            ..SiteSnapshot::default()
        };
        assert_eq!(snap.target_for_instance("cta-3").map(|t| t.selector.as_str()), Some("button.cta"));
        assert_eq!(snap.target_for_instance("hero-title-0").map(|t| t.cro_id.as_str()), Some("hero-title"));
        assert!(snap.target_for_instance("cta").is_none());
        assert!(snap.target_for_instance("cta-x").is_none());
        assert!(snap.target_for_instance("cta-01").is_none());
        assert!(snap.target_for_instance("ghost-0").is_none());
    }
}
