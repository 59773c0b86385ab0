//! Wire types shared by the host and the isolated context.
//!
//! The two payload shapes (`elementSelected`, `applyModifications`) are
//! bit-exact with what the injected script posts and receives. Every payload
//! travels inside a [`Frame`] carrying the session epoch it belongs to.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EditorError;

// ---------------------------------------------------------------------------
// Epoch
// ---------------------------------------------------------------------------

/// Session generation counter. Incremented on every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    pub const INITIAL: Epoch = Epoch(0);

    pub fn new(value: u64) -> Self {
        Epoch(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Epoch(self.0.saturating_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PropertyName: the editable property allowlist
// ---------------------------------------------------------------------------

/// A property the translator may set on an element: one of a fixed set of
/// style properties, or the element's text content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyName {
    BackgroundColor,
    Color,
    FontSize,
    FontWeight,
    FontFamily,
    FontStyle,
    LineHeight,
    LetterSpacing,
    TextAlign,
    TextDecoration,
    TextTransform,
    BorderRadius,
    Border,
    BorderColor,
    BorderWidth,
    BoxShadow,
    Padding,
    Margin,
    Width,
    Height,
    MaxWidth,
    Display,
    Gap,
    Opacity,
    TextContent,
}

impl PropertyName {
    pub const ALL: &'static [PropertyName] = &[
        PropertyName::BackgroundColor,
        PropertyName::Color,
        PropertyName::FontSize,
        PropertyName::FontWeight,
        PropertyName::FontFamily,
        PropertyName::FontStyle,
        PropertyName::LineHeight,
        PropertyName::LetterSpacing,
        PropertyName::TextAlign,
        PropertyName::TextDecoration,
        PropertyName::TextTransform,
        PropertyName::BorderRadius,
        PropertyName::Border,
        PropertyName::BorderColor,
        PropertyName::BorderWidth,
        PropertyName::BoxShadow,
        PropertyName::Padding,
        PropertyName::Margin,
        PropertyName::Width,
        PropertyName::Height,
        PropertyName::MaxWidth,
        PropertyName::Display,
        PropertyName::Gap,
        PropertyName::Opacity,
        PropertyName::TextContent,
    ];

    /// The camelCase name used on the wire and by `element.style[...]`.
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyName::BackgroundColor => "backgroundColor",
            PropertyName::Color => "color",
            PropertyName::FontSize => "fontSize",
            PropertyName::FontWeight => "fontWeight",
            PropertyName::FontFamily => "fontFamily",
            PropertyName::FontStyle => "fontStyle",
            PropertyName::LineHeight => "lineHeight",
            PropertyName::LetterSpacing => "letterSpacing",
            PropertyName::TextAlign => "textAlign",
            PropertyName::TextDecoration => "textDecoration",
            PropertyName::TextTransform => "textTransform",
            PropertyName::BorderRadius => "borderRadius",
            PropertyName::Border => "border",
            PropertyName::BorderColor => "borderColor",
            PropertyName::BorderWidth => "borderWidth",
            PropertyName::BoxShadow => "boxShadow",
            PropertyName::Padding => "padding",
            PropertyName::Margin => "margin",
            PropertyName::Width => "width",
            PropertyName::Height => "height",
            PropertyName::MaxWidth => "maxWidth",
            PropertyName::Display => "display",
            PropertyName::Gap => "gap",
            PropertyName::Opacity => "opacity",
            PropertyName::TextContent => "textContent",
        }
    }

    pub fn is_text_content(self) -> bool {
        self == PropertyName::TextContent
    }

    /// The CSS property name (`background-color`), or `None` for `textContent`.
    pub fn css_name(self) -> Option<String> {
        if self.is_text_content() {
            None
        } else {
            Some(to_kebab_case(self.as_str()))
        }
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyName {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyName::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| EditorError::DisallowedProperty(s.to_string()))
    }
}

impl Serialize for PropertyName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PropertyName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert a camelCase identifier to kebab-case: `borderRadius` → `border-radius`.
pub fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Modifications
// ---------------------------------------------------------------------------

/// A validated set of property assignments. Keys are always allowlisted;
/// ordering is the allowlist order so iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifications(BTreeMap<PropertyName, String>);

impl Modifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, property: PropertyName, value: impl Into<String>) {
        self.0.insert(property, value.into());
    }

    pub fn get(&self, property: PropertyName) -> Option<&str> {
        self.0.get(&property).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyName, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Style entries only, in allowlist order.
    pub fn styles(&self) -> impl Iterator<Item = (PropertyName, &str)> {
        self.iter().filter(|(k, _)| !k.is_text_content())
    }

    pub fn text_content(&self) -> Option<&str> {
        self.get(PropertyName::TextContent)
    }
}

impl<V: Into<String>> FromIterator<(PropertyName, V)> for Modifications {
    fn from_iter<I: IntoIterator<Item = (PropertyName, V)>>(iter: I) -> Self {
        Modifications(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// The fixed style subset read from an element when it is selected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservedStyles {
    pub background_color: String,
    pub color: String,
    pub font_size: String,
    pub font_weight: String,
    pub border_radius: String,
    pub padding: String,
    pub margin: String,
}

impl ObservedStyles {
    /// The properties captured on selection, in wire order.
    pub const PROPERTIES: [PropertyName; 7] = [
        PropertyName::BackgroundColor,
        PropertyName::Color,
        PropertyName::FontSize,
        PropertyName::FontWeight,
        PropertyName::BorderRadius,
        PropertyName::Padding,
        PropertyName::Margin,
    ];

    fn slot_mut(&mut self, property: PropertyName) -> Option<&mut String> {
        match property {
            PropertyName::BackgroundColor => Some(&mut self.background_color),
            PropertyName::Color => Some(&mut self.color),
            PropertyName::FontSize => Some(&mut self.font_size),
            PropertyName::FontWeight => Some(&mut self.font_weight),
            PropertyName::BorderRadius => Some(&mut self.border_radius),
            PropertyName::Padding => Some(&mut self.padding),
            PropertyName::Margin => Some(&mut self.margin),
            _ => None,
        }
    }

    pub fn get(&self, property: PropertyName) -> Option<&str> {
        let value = match property {
            PropertyName::BackgroundColor => &self.background_color,
            PropertyName::Color => &self.color,
            PropertyName::FontSize => &self.font_size,
            PropertyName::FontWeight => &self.font_weight,
            PropertyName::BorderRadius => &self.border_radius,
            PropertyName::Padding => &self.padding,
            PropertyName::Margin => &self.margin,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Set a tracked property. Returns `false` for untracked properties.
    pub fn set(&mut self, property: PropertyName, value: impl Into<String>) -> bool {
        match self.slot_mut(property) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }
}

/// `{"type":"elementSelected",...}`, isolated context to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelected {
    pub element_id: String,
    pub tag_name: String,
    pub text_content: String,
    pub selector: String,
    pub styles: ObservedStyles,
}

/// `{"type":"applyModifications",...}`, host to isolated context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyModifications {
    pub element_id: String,
    pub modifications: Modifications,
}

/// Messages emitted by the isolated context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextMessage {
    ElementSelected(ElementSelected),
}

/// Commands sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    ApplyModifications(ApplyModifications),
}

/// A payload tagged with the epoch it was produced in. Receivers drop frames
/// whose epoch differs from their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame<T> {
    pub epoch: Epoch,
    pub message: T,
}

impl<T> Frame<T> {
    pub fn new(epoch: Epoch, message: T) -> Self {
        Frame { epoch, message }
    }
}
