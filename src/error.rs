//! Crate-level error type.
//!
//! DOM-level misses (unknown instance ids, invalid selectors, malformed
//! snapshot markup) are recovered where they happen and only logged; they never
//! surface here. Everything in this enum is something a caller can act on.

use crate::protocol::Epoch;

/// Errors produced by the editing engine.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// The translator collaborator failed (network, service, or explicit
    /// `success: false`). Recoverable; the ledger is untouched.
    #[error("translation failed: {0}")]
    TranslationFailure(String),

    /// A translation response arrived for an epoch that has since been reset.
    #[error("discarded translation response from epoch {requested}; session is at epoch {current}")]
    StaleResponse { requested: Epoch, current: Epoch },

    /// The translator returned a property outside the style allowlist.
    #[error("property '{0}' is not an editable property")]
    DisallowedProperty(String),

    /// A property value that cannot be applied or emitted safely.
    #[error("invalid value for '{property}': {reason}")]
    InvalidValue {
        property: String,
        reason: &'static str,
    },

    /// The translator succeeded but returned nothing to apply.
    #[error("translation returned no modifications")]
    NoModifications,

    /// A prompt was submitted with no element selected.
    #[error("no element is selected")]
    NoSelection,

    /// A prompt was submitted while another translation is still pending.
    #[error("a translation is already in flight for this session")]
    TranslationInFlight,

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[source] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EditorError>;

impl EditorError {
    /// Whether the error should be shown to the user as a recoverable edit
    /// failure (as opposed to an internal or startup error).
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            EditorError::TranslationFailure(_)
                | EditorError::DisallowedProperty(_)
                | EditorError::InvalidValue { .. }
                | EditorError::NoModifications
                | EditorError::NoSelection
                | EditorError::TranslationInFlight
                | EditorError::EmptyPrompt
        )
    }
}
