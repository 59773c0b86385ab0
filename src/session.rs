//! Editing session: the host-side state machine.
//!
//! ```text
//! Idle ──elementSelected──▶ Selected ──submit_prompt──▶ AwaitingTranslation
//!                            ▲    │                         │        │
//!                            │    └──elementSelected────────┘        │ success
//!                            │                            failure    ▼
//!                            └──────────────────────────────────  Applying
//! any ──reset──▶ Idle (ledger cleared, epoch + 1, fresh document and channel)
//! ```
//!
//! A translation is requested with [`Session::submit_prompt`] and resolved
//! with [`Session::complete_translation`]; the ticket in between carries the
//! epoch it was issued in, so a response that outlives a reset is discarded.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::applier;
use crate::channel::{channel, HostEndpoint};
use crate::compiler::{compile, CompileOptions, CompiledDocument};
use crate::context::ContextMount;
use crate::dom;
use crate::error::{EditorError, Result};
use crate::ledger::{ConversationEntry, HistoryLedger, ModificationRecord, Role};
use crate::protocol::{ContextMessage, Epoch, Frame};
use crate::selection::{Selection, SelectionResolver};
use crate::snapshot::SiteSnapshot;
use crate::synthesizer::synthesize;
use crate::translator::{TranslationOutcome, TranslationRequest, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Selected,
    AwaitingTranslation,
    Applying,
}

/// Proof that a translation was requested: the only way to complete one.
#[derive(Debug)]
pub struct TranslationTicket {
    epoch: Epoch,
    prompt: String,
    selection: Selection,
}

impl TranslationTicket {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }
}

/// Result of a reset: the mount for the fresh context, and the artifact
/// synthesized from the history that was cleared.
#[derive(Debug)]
pub struct ResetOutcome {
    pub mount: ContextMount,
    pub artifact: String,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    snapshot: Arc<SiteSnapshot>,
    options: CompileOptions,
    epoch: Epoch,
    document: CompiledDocument,
    endpoint: HostEndpoint,
    resolver: SelectionResolver,
    state: SessionState,
    ledger: HistoryLedger,
}

impl Session {
    /// Open a session with default editor options.
    pub fn open(snapshot: SiteSnapshot) -> Result<(Self, ContextMount)> {
        Self::open_with(Arc::new(snapshot), CompileOptions::default())
    }

    pub fn open_with(
        snapshot: Arc<SiteSnapshot>,
        options: CompileOptions,
    ) -> Result<(Self, ContextMount)> {
        let document = compile(&snapshot, &options)?;
        let epoch = Epoch::INITIAL;
        let (endpoint, context_endpoint) = channel(epoch);
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            snapshot,
            options,
            epoch,
            document: document.clone(),
            endpoint,
            resolver: SelectionResolver::new(),
            state: SessionState::Idle,
            ledger: HistoryLedger::new(),
        };
        info!(
            session = %session.id,
            targets = session.snapshot.targetable_elements.len(),
            "session opened"
        );
        Ok((
            session,
            ContextMount {
                epoch,
                document,
                endpoint: context_endpoint,
            },
        ))
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.resolver.current()
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn document(&self) -> &CompiledDocument {
        &self.document
    }

    pub fn snapshot(&self) -> &Arc<SiteSnapshot> {
        &self.snapshot
    }

    // -- events -------------------------------------------------------------

    /// Handle one frame from the context. Returns `false` if it was dropped.
    ///
    /// The selector recorded for a selection always comes from the snapshot
    /// target the instance id names; the one the context reports is ignored.
    pub fn handle_frame(&mut self, frame: Frame<ContextMessage>) -> bool {
        if frame.epoch != self.epoch {
            debug!(session = %self.id, frame_epoch = %frame.epoch, epoch = %self.epoch, "dropping event from foreign epoch");
            return false;
        }
        match frame.message {
            ContextMessage::ElementSelected(ev) => {
                let Some(target) = self.snapshot.target_for_instance(&ev.element_id) else {
                    debug!(session = %self.id, instance_id = %ev.element_id, "dropping selection of unknown instance");
                    return false;
                };
                if !dom::is_valid_selector(&target.selector) {
                    debug!(session = %self.id, instance_id = %ev.element_id, selector = %target.selector, "dropping selection of unbindable target");
                    return false;
                }
                if ev.selector != target.selector {
                    debug!(session = %self.id, reported = %ev.selector, selector = %target.selector, "reported selector replaced");
                }
                let selector = target.selector.clone();
                debug!(session = %self.id, instance_id = %ev.element_id, "element selected");
                let mut selection = Selection::from(ev);
                selection.selector = selector;
                self.resolver.observe(selection);
                if self.state == SessionState::Idle {
                    self.state = SessionState::Selected;
                }
            }
        }
        true
    }

    /// Drain and handle every pending frame. Returns how many were accepted.
    pub fn pump_events(&mut self) -> usize {
        let mut accepted = 0;
        while let Some(frame) = self.endpoint.try_recv() {
            if self.handle_frame(frame) {
                accepted += 1;
            }
        }
        accepted
    }

    // -- prompting ----------------------------------------------------------

    /// Start a translation for the current selection.
    pub fn submit_prompt(&mut self, prompt: &str) -> Result<TranslationTicket> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(EditorError::EmptyPrompt);
        }
        if matches!(
            self.state,
            SessionState::AwaitingTranslation | SessionState::Applying
        ) {
            return Err(EditorError::TranslationInFlight);
        }
        let selection = self
            .resolver
            .current()
            .cloned()
            .ok_or(EditorError::NoSelection)?;
        self.state = SessionState::AwaitingTranslation;
        debug!(session = %self.id, instance_id = %selection.instance_id, epoch = %self.epoch, "translation requested");
        Ok(TranslationTicket {
            epoch: self.epoch,
            prompt: prompt.to_string(),
            selection,
        })
    }

    /// The request to hand the translator for `ticket`.
    pub fn translation_request(&self, ticket: &TranslationTicket) -> TranslationRequest {
        TranslationRequest {
            prompt: ticket.prompt.clone(),
            selection: ticket.selection.clone(),
            snapshot: Arc::clone(&self.snapshot),
            conversation_history: self.ledger.conversation().to_vec(),
            current_modifications: self.ledger.records().to_vec(),
        }
    }

    /// Resolve a translation. A ticket from an earlier epoch is rejected with
    /// [`EditorError::StaleResponse`] and changes nothing.
    pub fn complete_translation(
        &mut self,
        ticket: TranslationTicket,
        outcome: Result<TranslationOutcome>,
    ) -> Result<ModificationRecord> {
        if ticket.epoch != self.epoch {
            debug!(session = %self.id, requested = %ticket.epoch, current = %self.epoch, "discarding stale translation");
            return Err(EditorError::StaleResponse {
                requested: ticket.epoch,
                current: self.epoch,
            });
        }

        let validated = match outcome {
            Ok(TranslationOutcome::Success {
                modifications,
                explanation,
            }) => applier::validate(&modifications).map(|m| (m, explanation)),
            Ok(TranslationOutcome::Failure { error }) => Err(EditorError::TranslationFailure(error)),
            Err(e) => Err(e),
        };
        let (modifications, explanation) = match validated {
            Ok(pair) => pair,
            Err(e) => {
                warn!(session = %self.id, instance_id = %ticket.selection.instance_id, error = %e, "translation not applied");
                self.state = self.settled_state();
                return Err(e);
            }
        };

        self.state = SessionState::Applying;
        let count = modifications.len();
        let record = applier::apply(
            &self.endpoint,
            &ticket.selection,
            &ticket.prompt,
            modifications,
            &mut self.ledger,
        );
        let related = Some(record.instance_id.clone());
        self.ledger
            .append_conversation(ConversationEntry::new(Role::User, ticket.prompt, related.clone()));
        let reply = if explanation.trim().is_empty() {
            format!("Applied {} change(s) to {}.", count, record.instance_id)
        } else {
            explanation
        };
        self.ledger
            .append_conversation(ConversationEntry::new(Role::Assistant, reply, related));
        self.resolver
            .record_applied(&record.instance_id, &record.properties);
        self.state = self.settled_state();
        Ok(record)
    }

    /// Submit, translate and complete in one call.
    pub async fn prompt(
        &mut self,
        prompt: &str,
        translator: &dyn Translator,
    ) -> Result<ModificationRecord> {
        let ticket = self.submit_prompt(prompt)?;
        let request = self.translation_request(&ticket);
        let outcome = translator.translate(&request).await;
        self.complete_translation(ticket, outcome)
    }

    fn settled_state(&self) -> SessionState {
        if self.resolver.current().is_some() {
            SessionState::Selected
        } else {
            SessionState::Idle
        }
    }

    // -- reset / synthesis --------------------------------------------------

    /// Discard all edits and start a new epoch with a freshly compiled
    /// document. Either everything changes or nothing does.
    pub fn reset(&mut self) -> Result<ResetOutcome> {
        let document = compile(&self.snapshot, &self.options)?;
        let artifact = synthesize(&self.ledger.snapshot());
        let epoch = self.epoch.next();
        let (endpoint, context_endpoint) = channel(epoch);

        let cleared = self.ledger.len();
        self.ledger.reset();
        self.resolver.clear();
        self.epoch = epoch;
        self.endpoint = endpoint;
        self.document = document.clone();
        self.state = SessionState::Idle;

        info!(session = %self.id, epoch = %epoch, cleared, "session reset");
        Ok(ResetOutcome {
            mount: ContextMount {
                epoch,
                document,
                endpoint: context_endpoint,
            },
            artifact,
        })
    }

    /// Synthesize the code artifact for the current history.
    pub fn synthesize(&self) -> String {
        synthesize(&self.ledger.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalContext;
    use crate::protocol::PropertyName;
    use crate::snapshot::TargetableElement;
    use crate::translator::ScriptedTranslator;

    fn snapshot() -> SiteSnapshot {
        SiteSnapshot {
            html: "<html><body><button class=cta>A</button><button class=cta>B</button></body></html>".into(),
            targetable_elements: vec![TargetableElement::new("cta", "button.cta")],
            ..SiteSnapshot::default()
        }
    }

    fn opened() -> (Session, LocalContext) {
        let (session, mount) = Session::open(snapshot()).unwrap();
        (session, LocalContext::mount(mount))
    }

    fn select(session: &mut Session, ctx: &mut LocalContext, id: &str) {
        assert!(ctx.click(id));
        assert_eq!(session.pump_events(), 1);
    }

    #[test]
    fn test_open_starts_idle_at_initial_epoch() {
        let (session, ctx) = opened();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.epoch(), Epoch::INITIAL);
        assert_eq!(ctx.epoch(), Epoch::INITIAL);
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_selection_moves_to_selected() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-1");
        assert_eq!(session.state(), SessionState::Selected);
        assert_eq!(session.selection().unwrap().instance_id, "cta-1");
    }

    #[test]
    fn test_submit_requires_selection() {
        let (mut session, _ctx) = opened();
        assert!(matches!(session.submit_prompt("green"), Err(EditorError::NoSelection)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_submit_rejects_empty_prompt() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        assert!(matches!(session.submit_prompt("   "), Err(EditorError::EmptyPrompt)));
    }

    #[test]
    fn test_one_translation_in_flight() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let _ticket = session.submit_prompt("green").unwrap();
        assert_eq!(session.state(), SessionState::AwaitingTranslation);
        assert!(matches!(session.submit_prompt("red"), Err(EditorError::TranslationInFlight)));
    }

    #[test]
    fn test_reselect_while_awaiting_keeps_ticket_target() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("green").unwrap();
        select(&mut session, &mut ctx, "cta-1");
        assert_eq!(session.state(), SessionState::AwaitingTranslation);
        let record = session
            .complete_translation(ticket, Ok(TranslationOutcome::success([("color", "green")], "")))
            .unwrap();
        assert_eq!(record.instance_id, "cta-0");
    }

    #[test]
    fn test_failure_returns_to_selected_without_ledger_change() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("green").unwrap();
        let err = session
            .complete_translation(ticket, Ok(TranslationOutcome::failure("overloaded")))
            .unwrap_err();
        assert!(matches!(err, EditorError::TranslationFailure(ref m) if m == "overloaded"));
        assert_eq!(session.state(), SessionState::Selected);
        assert!(session.ledger().is_empty());
        assert_eq!(session.ledger().conversation_len(), 0);
    }

    #[test]
    fn test_disallowed_property_rejects_whole_result() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("pin it").unwrap();
        let err = session
            .complete_translation(
                ticket,
                Ok(TranslationOutcome::success([("color", "red"), ("position", "fixed")], "")),
            )
            .unwrap_err();
        assert!(matches!(err, EditorError::DisallowedProperty(_)));
        assert!(session.ledger().is_empty());
        assert_eq!(ctx.pump(), 0);
        assert_eq!(ctx.inline_style("cta-0", PropertyName::Color), None);
    }

    #[test]
    fn test_success_appends_record_and_conversation() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("make it green").unwrap();
        let record = session
            .complete_translation(
                ticket,
                Ok(TranslationOutcome::success([("backgroundColor", "green")], "Made it green.")),
            )
            .unwrap();
        assert_eq!(session.state(), SessionState::Selected);
        assert_eq!(record.epoch, Epoch::INITIAL);
        assert_eq!(session.ledger().len(), 1);
        let convo = session.ledger().conversation();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].role, Role::User);
        assert_eq!(convo[0].content, "make it green");
        assert_eq!(convo[1].content, "Made it green.");
        assert_eq!(ctx.pump(), 1);
        assert_eq!(ctx.inline_style("cta-0", PropertyName::BackgroundColor).as_deref(), Some("green"));
        assert_eq!(session.selection().unwrap().styles.background_color, "green");
    }

    #[test]
    fn test_stale_ticket_after_reset_changes_nothing() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("green").unwrap();
        let reset = session.reset().unwrap();
        let mut ctx = LocalContext::mount(reset.mount);

        let err = session
            .complete_translation(ticket, Ok(TranslationOutcome::success([("color", "green")], "")))
            .unwrap_err();
        assert!(matches!(
            err,
            EditorError::StaleResponse { requested, current }
                if requested == Epoch::INITIAL && current == Epoch::new(1)
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.ledger().is_empty());
        assert_eq!(ctx.pump(), 0);
    }

    #[test]
    fn test_frames_from_old_epoch_are_dropped() {
        let (mut session, mut old_ctx) = opened();
        let reset = session.reset().unwrap();
        let _new_ctx = LocalContext::mount(reset.mount);
        // The old context's channel is gone; a relayed frame with the old
        // epoch must still be ignored.
        old_ctx.click("cta-0");
        assert!(!session.handle_frame(Frame::new(
            Epoch::INITIAL,
            ContextMessage::ElementSelected(crate::protocol::ElementSelected {
                element_id: "cta-0".into(),
                tag_name: "BUTTON".into(),
                text_content: "A".into(),
                selector: "button.cta".into(),
                styles: Default::default(),
            }),
        )));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.selection().is_none());
    }

    #[test]
    fn test_reset_returns_prior_artifact_and_fresh_document() {
        let (mut session, mut ctx) = opened();
        let first = session.document().clone();
        select(&mut session, &mut ctx, "cta-0");
        let ticket = session.submit_prompt("green").unwrap();
        session
            .complete_translation(ticket, Ok(TranslationOutcome::success([("backgroundColor", "green")], "")))
            .unwrap();

        let reset = session.reset().unwrap();
        assert!(reset.artifact.contains("background-color: green;"));
        assert_eq!(reset.mount.epoch, Epoch::new(1));
        assert_eq!(reset.mount.document, first);
        assert_eq!(session.document(), &first);
        assert_eq!(session.ledger().len(), 0);
        assert_eq!(session.ledger().conversation_len(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_prompt_round_trip_with_translator() {
        let (mut session, mut ctx) = opened();
        select(&mut session, &mut ctx, "cta-1");
        let translator = ScriptedTranslator::with_outcomes([TranslationOutcome::success(
            [("fontSize", "24px")],
            "Bigger.",
        )]);
        let record = session.prompt("bigger text", &translator).await.unwrap();
        assert_eq!(record.instance_id, "cta-1");
        ctx.pump();
        assert_eq!(ctx.inline_style("cta-1", PropertyName::FontSize).as_deref(), Some("24px"));
        assert_eq!(ctx.inline_style("cta-0", PropertyName::FontSize), None);
    }
}
