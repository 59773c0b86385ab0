//! Prompt translation collaborator.
//!
//! A [`Translator`] maps `(prompt, selection, snapshot, history)` to a raw
//! property map. Its output is untrusted: the session validates it before
//! anything is applied.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranslatorConfig;
use crate::error::{EditorError, Result};
use crate::ledger::{ConversationEntry, ModificationRecord};
use crate::selection::Selection;
use crate::snapshot::SiteSnapshot;

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub prompt: String,
    pub selection: Selection,
    pub snapshot: Arc<SiteSnapshot>,
    pub conversation_history: Vec<ConversationEntry>,
    pub current_modifications: Vec<ModificationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Success {
        modifications: BTreeMap<String, String>,
        explanation: String,
    },
    Failure {
        error: String,
    },
}

impl TranslationOutcome {
    pub fn success<K, V, I>(modifications: I, explanation: impl Into<String>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        TranslationOutcome::Success {
            modifications: modifications
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            explanation: explanation.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        TranslationOutcome::Failure {
            error: error.into(),
        }
    }
}

/// `{ success, modifications, explanation }` / `{ success: false, error }`.
#[derive(Debug, Deserialize)]
struct WireOutcome {
    success: bool,
    #[serde(default)]
    modifications: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    error: Option<String>,
}

impl From<WireOutcome> for TranslationOutcome {
    fn from(wire: WireOutcome) -> Self {
        if !wire.success {
            return TranslationOutcome::failure(
                wire.error.unwrap_or_else(|| "translator reported failure".to_string()),
            );
        }
        let mut modifications = BTreeMap::new();
        for (key, value) in wire.modifications {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return TranslationOutcome::failure(format!(
                        "translator returned a non-scalar value for '{}': {}",
                        key, other
                    ))
                }
            };
            modifications.insert(key, value);
        }
        TranslationOutcome::Success {
            modifications,
            explanation: wire.explanation,
        }
    }
}

/// Parse a translator response body.
pub fn parse_outcome(body: &str) -> Result<TranslationOutcome> {
    let wire: WireOutcome = serde_json::from_str(body)
        .map_err(|e| EditorError::TranslationFailure(format!("malformed translator response: {}", e)))?;
    Ok(wire.into())
}

// ---------------------------------------------------------------------------
// Translator trait + implementations
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one prompt. Transport errors are `Err`; an explicit
    /// `success: false` from the collaborator is `Ok(Failure)`.
    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationOutcome>;
}

/// POSTs the request as JSON to a configured endpoint.
pub struct HttpTranslator {
    client: Client,
    endpoint: String,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EditorError::TranslationFailure(format!("http client: {}", e)))?;
        Ok(HttpTranslator {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationOutcome> {
        debug!(endpoint = %self.endpoint, instance_id = %request.selection.instance_id, "requesting translation");
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| EditorError::TranslationFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EditorError::TranslationFailure(format!(
                "translator returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EditorError::TranslationFailure(e.to_string()))?;
        parse_outcome(&body)
    }
}

/// Plays back queued outcomes in order. Used for offline replay and tests.
#[derive(Default)]
pub struct ScriptedTranslator {
    queue: Mutex<VecDeque<TranslationOutcome>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: impl IntoIterator<Item = TranslationOutcome>) -> Self {
        ScriptedTranslator {
            queue: Mutex::new(outcomes.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationOutcome> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.prompt.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| TranslationOutcome::failure("no scripted response queued")))
    }
}

/// Stands in when no endpoint is configured; every prompt fails cleanly.
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn translate(&self, _request: &TranslationRequest) -> Result<TranslationOutcome> {
        Err(EditorError::TranslationFailure(
            "no translator endpoint configured".to_string(),
        ))
    }
}

/// Build the translator described by `config`.
pub fn from_config(config: &TranslatorConfig) -> Result<Arc<dyn Translator>> {
    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => Ok(Arc::new(HttpTranslator::new(
            endpoint,
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(UnconfiguredTranslator)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ObservedStyles;

    fn request(prompt: &str) -> TranslationRequest {
        TranslationRequest {
            prompt: prompt.into(),
            selection: Selection {
                instance_id: "cta-0".into(),
                tag_name: "BUTTON".into(),
                text_content: "Buy".into(),
                selector: "button.cta".into(),
                styles: ObservedStyles::default(),
            },
            snapshot: Arc::new(SiteSnapshot::default()),
            conversation_history: Vec::new(),
            current_modifications: Vec::new(),
        }
    }

    #[test]
    fn test_parse_success() {
        let outcome = parse_outcome(r#"{"success":true,"modifications":{"backgroundColor":"green","fontWeight":700},"explanation":"done"}"#).unwrap();
        match outcome {
            TranslationOutcome::Success { modifications, explanation } => {
                assert_eq!(modifications["backgroundColor"], "green");
                assert_eq!(modifications["fontWeight"], "700");
                assert_eq!(explanation, "done");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_failure() {
        let outcome = parse_outcome(r#"{"success":false,"error":"model overloaded"}"#).unwrap();
        assert_eq!(outcome, TranslationOutcome::failure("model overloaded"));
    }

    #[test]
    fn test_parse_non_scalar_value_is_failure() {
        let outcome = parse_outcome(r#"{"success":true,"modifications":{"color":{"r":1}}}"#).unwrap();
        assert!(matches!(outcome, TranslationOutcome::Failure { .. }));
    }

    #[test]
    fn test_parse_malformed_body() {
        let err = parse_outcome("<html>502</html>").unwrap_err();
        assert!(matches!(err, EditorError::TranslationFailure(_)));
    }

    #[test]
    fn test_request_wire_shape() {
        let value = serde_json::to_value(request("make it green")).unwrap();
        assert_eq!(value["prompt"], "make it green");
        assert_eq!(value["selection"]["instanceId"], "cta-0");
        assert!(value["conversationHistory"].as_array().unwrap().is_empty());
        assert!(value["currentModifications"].is_array());
        assert!(value["snapshot"]["html"].is_string());
    }

    #[tokio::test]
    async fn test_scripted_translator_plays_in_order() {
        let t = ScriptedTranslator::with_outcomes([
            TranslationOutcome::success([("color", "red")], "one"),
            TranslationOutcome::failure("two"),
        ]);
        assert!(matches!(t.translate(&request("a")).await.unwrap(), TranslationOutcome::Success { .. }));
        assert_eq!(t.translate(&request("b")).await.unwrap(), TranslationOutcome::failure("two"));
        assert!(matches!(t.translate(&request("c")).await.unwrap(), TranslationOutcome::Failure { .. }));
        assert_eq!(t.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unconfigured_translator_errors() {
        let t = from_config(&TranslatorConfig::default()).unwrap();
        let err = t.translate(&request("x")).await.unwrap_err();
        assert!(matches!(err, EditorError::TranslationFailure(_)));
    }

    #[tokio::test]
    async fn test_http_translator_unreachable_endpoint() {
        let t = HttpTranslator::new("http://127.0.0.1:9/translate", Duration::from_millis(500)).unwrap();
        let err = t.translate(&request("x")).await.unwrap_err();
        assert!(matches!(err, EditorError::TranslationFailure(_)));
    }
}
