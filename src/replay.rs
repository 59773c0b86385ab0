//! Offline replay of a recorded edit script through a full session.
//!
//! Each step clicks an instance in an in-process context, feeds the step's
//! modifications through a scripted translator, and lets the session validate
//! and apply them exactly as it would for a live translator.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compiler::CompileOptions;
use crate::context::LocalContext;
use crate::error::Result;
use crate::session::Session;
use crate::snapshot::SiteSnapshot;
use crate::translator::{ScriptedTranslator, TranslationOutcome};

/// One scripted edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStep {
    pub instance_id: String,
    pub prompt: String,
    pub modifications: BTreeMap<String, String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl EditStep {
    pub fn load_all(path: &Path) -> Result<Vec<EditStep>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedStep {
    pub index: usize,
    pub instance_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// Synthesized code for the applied steps.
    pub artifact: String,
    pub applied: usize,
    pub rejected: Vec<RejectedStep>,
    /// The live document after all steps.
    pub document: String,
}

/// Run `steps` against `snapshot`. Steps that fail validation or target an
/// unknown instance are reported and skipped.
pub async fn replay(
    snapshot: SiteSnapshot,
    options: CompileOptions,
    steps: &[EditStep],
) -> Result<ReplayReport> {
    let (mut session, mount) = Session::open_with(Arc::new(snapshot), options)?;
    let mut context = LocalContext::mount(mount);
    let mut applied = 0;
    let mut rejected = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        let mut reject = |reason: String| {
            warn!(index, instance_id = %step.instance_id, %reason, "replay step skipped");
            rejected.push(RejectedStep {
                index,
                instance_id: step.instance_id.clone(),
                reason,
            });
        };

        if !context.click(&step.instance_id) {
            reject(format!("no element bound to '{}'", step.instance_id));
            continue;
        }
        session.pump_events();

        let translator = ScriptedTranslator::with_outcomes([TranslationOutcome::Success {
            modifications: step.modifications.clone(),
            explanation: step.explanation.clone().unwrap_or_default(),
        }]);
        match session.prompt(&step.prompt, &translator).await {
            Ok(_) => {
                context.pump();
                applied += 1;
            }
            Err(e) if e.is_user_visible() => reject(e.to_string()),
            Err(e) => return Err(e),
        }
    }

    Ok(ReplayReport {
        artifact: session.synthesize(),
        applied,
        rejected,
        document: context.render(),
    })
}
