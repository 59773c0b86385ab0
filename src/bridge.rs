//! WebSocket bridge between a browser-hosted sandbox frame and a [`Session`].
//!
//! ## Design
//! - SnapshotStore: Arc<Mutex<HashMap<String, PendingSnapshot>>> shared by all
//!   connections; `POST /session` registers a snapshot under a 6-char code
//!   plus a random access token
//! - Each WS connection to `/ws/CODE?token=…` owns one [`Session`]; the
//!   session dies with the connection
//! - The browser page relays between the sandboxed iframe (postMessage) and
//!   this socket; the server side holds the context endpoint and forwards
//!   frames in both directions
//! - Translations run on spawned tasks and report back through an mpsc
//!   channel polled by the connection's select loop
//!
//! ## Messages
//! Browser → server: `frame`, `prompt`, `reset`, `synthesize`, `ping`.
//! Server → browser: `mount`, `command`, `state`, `applied`, `error`, `code`, `pong`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::compiler::CompileOptions;
use crate::error::{EditorError, Result};
use crate::ledger::{now_ms, ModificationRecord};
use crate::protocol::{ContextMessage, Epoch, Frame, HostMessage};
use crate::selection::Selection;
use crate::session::{Session, SessionState, TranslationTicket};
use crate::snapshot::SiteSnapshot;
use crate::translator::{TranslationOutcome, Translator};

/// Shared snapshot store: session code → pending snapshot.
pub type SnapshotStore = Arc<Mutex<HashMap<String, PendingSnapshot>>>;

/// A registered snapshot waiting for (or serving) editor connections.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub snapshot: Arc<SiteSnapshot>,
    pub token: String,
    pub created_at_ms: u64,
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

pub fn new_snapshot_store() -> SnapshotStore {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Generate a random 6-character uppercase alphanumeric session code.
pub fn generate_code() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Register a snapshot, returning `(code, token)`.
pub fn register_snapshot(store: &SnapshotStore, snapshot: SiteSnapshot) -> (String, String) {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let snapshot = Arc::new(snapshot);
    let Ok(mut guard) = store.lock() else {
        return (generate_code(), token);
    };
    let mut code = generate_code();
    while guard.contains_key(&code) {
        code = generate_code();
    }
    guard.insert(
        code.clone(),
        PendingSnapshot {
            snapshot,
            token: token.clone(),
            created_at_ms: now_ms(),
        },
    );
    (code, token)
}

/// Look up a snapshot, checking the token in constant time.
pub fn authorize(store: &SnapshotStore, code: &str, token: &str) -> Option<Arc<SiteSnapshot>> {
    let guard = store.lock().ok()?;
    let pending = guard.get(code)?;
    let ok: bool = pending.token.as_bytes().ct_eq(token.as_bytes()).into();
    ok.then(|| Arc::clone(&pending.snapshot))
}

/// Drop snapshots registered more than `max_age_ms` ago. Returns how many were removed.
pub fn prune_expired(store: &SnapshotStore, max_age_ms: u64) -> usize {
    let Ok(mut guard) = store.lock() else {
        return 0;
    };
    let now = now_ms();
    let before = guard.len();
    guard.retain(|_, p| now.saturating_sub(p.created_at_ms) <= max_age_ms);
    before - guard.len()
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// An event the sandbox frame posted, stamped with the epoch of the
    /// document it came from.
    Frame { frame: Frame<ContextMessage> },
    Prompt { prompt: String },
    Reset,
    Synthesize,
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Mount {
        epoch: Epoch,
        document: String,
    },
    Command {
        frame: Frame<HostMessage>,
    },
    State {
        epoch: Epoch,
        state: SessionState,
        selection: Option<Selection>,
        #[serde(rename = "ledgerLen")]
        ledger_len: usize,
        #[serde(rename = "conversationLen")]
        conversation_len: usize,
    },
    Applied {
        record: ModificationRecord,
    },
    Error {
        message: String,
    },
    Code {
        artifact: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn state_of(session: &Session) -> Self {
        ServerMessage::State {
            epoch: session.epoch(),
            state: session.state(),
            selection: session.selection().cloned(),
            ledger_len: session.ledger().len(),
            conversation_len: session.ledger().conversation_len(),
        }
    }

    fn error(err: &EditorError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}

async fn send_json<S>(sink: &mut S, msg: &ServerMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(text) => sink.send(WsMessage::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to encode server message");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handler
// ---------------------------------------------------------------------------

type Completion = (TranslationTicket, Result<TranslationOutcome>);

/// Drive one editor connection until the socket closes.
pub async fn handle_ws<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    snapshot: Arc<SiteSnapshot>,
    options: CompileOptions,
    translator: Arc<dyn Translator>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws.split();

    let (mut session, mount) = match Session::open_with(snapshot, options) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = send_json(&mut ws_sink, &ServerMessage::error(&e)).await;
            return;
        }
    };
    let mut context = mount.endpoint;
    info!(session = %session.id(), "editor connected");

    let mount_msg = ServerMessage::Mount {
        epoch: mount.epoch,
        document: mount.document.html,
    };
    if !send_json(&mut ws_sink, &mount_msg).await
        || !send_json(&mut ws_sink, &ServerMessage::state_of(&session)).await
    {
        return;
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    // Main loop: multiplex browser frames, outbound commands and translation completions.
    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "websocket error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(session = %session.id(), error = %e, "ignoring malformed client message");
                        continue;
                    }
                };

                let mut replies = Vec::new();
                match parsed {
                    ClientMessage::Frame { frame } => {
                        context.forward(frame);
                        if session.pump_events() > 0 {
                            replies.push(ServerMessage::state_of(&session));
                        }
                    }
                    ClientMessage::Prompt { prompt } => match session.submit_prompt(&prompt) {
                        Ok(ticket) => {
                            let request = session.translation_request(&ticket);
                            let translator = Arc::clone(&translator);
                            let tx = done_tx.clone();
                            tokio::spawn(async move {
                                let outcome = translator.translate(&request).await;
                                let _ = tx.send((ticket, outcome));
                            });
                            replies.push(ServerMessage::state_of(&session));
                        }
                        Err(e) => replies.push(ServerMessage::error(&e)),
                    },
                    ClientMessage::Reset => match session.reset() {
                        Ok(outcome) => {
                            context = outcome.mount.endpoint;
                            replies.push(ServerMessage::Code { artifact: outcome.artifact });
                            replies.push(ServerMessage::Mount {
                                epoch: outcome.mount.epoch,
                                document: outcome.mount.document.html,
                            });
                            replies.push(ServerMessage::state_of(&session));
                        }
                        Err(e) => replies.push(ServerMessage::error(&e)),
                    },
                    ClientMessage::Synthesize => {
                        replies.push(ServerMessage::Code { artifact: session.synthesize() });
                    }
                    ClientMessage::Ping => replies.push(ServerMessage::Pong),
                }
                let mut open = true;
                for reply in &replies {
                    if !send_json(&mut ws_sink, reply).await {
                        open = false;
                        break;
                    }
                }
                if !open {
                    break;
                }
            }

            Some(frame) = context.recv() => {
                if !send_json(&mut ws_sink, &ServerMessage::Command { frame }).await {
                    break;
                }
            }

            Some((ticket, outcome)) = done_rx.recv() => {
                let reply = match session.complete_translation(ticket, outcome) {
                    Ok(record) => ServerMessage::Applied { record },
                    Err(EditorError::StaleResponse { .. }) => continue,
                    Err(e) => ServerMessage::error(&e),
                };
                if !send_json(&mut ws_sink, &reply).await
                    || !send_json(&mut ws_sink, &ServerMessage::state_of(&session)).await
                {
                    break;
                }
            }
        }
    }

    info!(session = %session.id(), edits = session.ledger().len(), "editor disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ElementSelected, ObservedStyles};
    use crate::snapshot::TargetableElement;

    fn snapshot() -> SiteSnapshot {
        SiteSnapshot {
            html: "<p>x</p>".into(),
            ..SiteSnapshot::default()
        }
    }

    #[test]
    fn test_generate_code_length() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_generate_code_is_random() {
        let codes: std::collections::HashSet<_> = (0..20).map(|_| generate_code()).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn test_register_and_authorize() {
        let store = new_snapshot_store();
        let (code, token) = register_snapshot(&store, snapshot());
        assert!(authorize(&store, &code, &token).is_some());
        assert!(authorize(&store, &code, "wrong").is_none());
        assert!(authorize(&store, &code, "").is_none());
        assert!(authorize(&store, "NOPE00", &token).is_none());
    }

    #[test]
    fn test_prune_expired() {
        let store = new_snapshot_store();
        let (code, _) = register_snapshot(&store, snapshot());
        if let Ok(mut guard) = store.lock() {
            guard.get_mut(&code).unwrap().created_at_ms = 0;
        }
        register_snapshot(&store, snapshot());
        assert_eq!(prune_expired(&store, 60_000), 1);
        assert_eq!(store.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_client_message_decoding() {
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        let prompt: ClientMessage = serde_json::from_str(r#"{"type":"prompt","prompt":"green"}"#).unwrap();
        assert_eq!(prompt, ClientMessage::Prompt { prompt: "green".into() });
        let frame: ClientMessage = serde_json::from_str(
            r#"{"type":"frame","frame":{"epoch":2,"message":{"type":"elementSelected","elementId":"a-0","tagName":"A","textContent":"x","selector":"a","styles":{}}}}"#,
        )
        .unwrap();
        let ClientMessage::Frame { frame } = frame else {
            panic!("expected frame");
        };
        assert_eq!(frame.epoch, Epoch::new(2));
        let ContextMessage::ElementSelected(ev) = frame.message;
        assert_eq!(ev.element_id, "a-0");
    }

    #[test]
    fn test_server_message_encoding() {
        let (session, _mount) = Session::open(snapshot()).unwrap();
        let value = serde_json::to_value(ServerMessage::state_of(&session)).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["state"], "idle");
        assert_eq!(value["ledgerLen"], 0);
        assert!(value["selection"].is_null());

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_command_message_carries_frame() {
        let frame = Frame::new(
            Epoch::new(1),
            HostMessage::ApplyModifications(crate::protocol::ApplyModifications {
                element_id: "a-0".into(),
                modifications: crate::protocol::Modifications::new(),
            }),
        );
        let value = serde_json::to_value(ServerMessage::Command { frame }).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["frame"]["epoch"], 1);
        assert_eq!(value["frame"]["message"]["type"], "applyModifications");
    }

    #[test]
    fn test_forwarded_frame_reaches_session() {
        let (mut session, mount) = Session::open(SiteSnapshot {
            html: "<a href=/x>x</a>".into(),
            targetable_elements: vec![TargetableElement::new("a", "a")],
            ..SiteSnapshot::default()
        })
        .unwrap();
        let context = mount.endpoint;
        context.forward(Frame::new(
            Epoch::INITIAL,
            ContextMessage::ElementSelected(ElementSelected {
                element_id: "a-0".into(),
                tag_name: "A".into(),
                text_content: "x".into(),
                selector: "a".into(),
                styles: ObservedStyles::default(),
            }),
        ));
        context.forward(Frame::new(
            Epoch::INITIAL,
            ContextMessage::ElementSelected(ElementSelected {
                element_id: "b-0".into(),
                tag_name: "B".into(),
                text_content: String::new(),
                selector: "b".into(),
                styles: ObservedStyles::default(),
            }),
        ));
        assert_eq!(session.pump_events(), 1);
        assert_eq!(session.state(), SessionState::Selected);
        assert_eq!(session.selection().map(|s| s.instance_id.as_str()), Some("a-0"));
    }
}
