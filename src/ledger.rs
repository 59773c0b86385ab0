//! Append-only edit history and conversation transcript.
//!
//! Records are never edited or removed individually. The only way to shrink
//! the ledger is [`HistoryLedger::reset`], which the session performs together
//! with an epoch bump.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::{Epoch, Modifications};

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the prompt conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_instance_id: Option<String>,
    pub timestamp: u64,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>, related_instance_id: Option<String>) -> Self {
        ConversationEntry {
            role,
            content: content.into(),
            related_instance_id,
            timestamp: now_ms(),
        }
    }
}

/// One applied edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationRecord {
    pub id: String,
    pub prompt: String,
    pub instance_id: String,
    pub selector: String,
    pub properties: Modifications,
    /// Element text before a `textContent` change; `None` when the edit
    /// did not touch text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_text: Option<String>,
    pub epoch: Epoch,
    pub timestamp: u64,
}

/// Read-only view over a ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSnapshot<'a> {
    pub records: &'a [ModificationRecord],
    pub conversation: &'a [ConversationEntry],
}

#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    records: Vec<ModificationRecord>,
    conversation: Vec<ConversationEntry>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: ModificationRecord) {
        self.records.push(record);
    }

    pub fn append_conversation(&mut self, entry: ConversationEntry) {
        self.conversation.push(entry);
    }

    /// Clear both records and conversation.
    pub fn reset(&mut self) {
        self.records.clear();
        self.conversation.clear();
    }

    pub fn snapshot(&self) -> LedgerSnapshot<'_> {
        LedgerSnapshot {
            records: &self.records,
            conversation: &self.conversation,
        }
    }

    pub fn records(&self) -> &[ModificationRecord] {
        &self.records
    }

    pub fn conversation(&self) -> &[ConversationEntry] {
        &self.conversation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn conversation_len(&self) -> usize {
        self.conversation.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PropertyName;

    fn record(prompt: &str) -> ModificationRecord {
        ModificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            instance_id: "cta-0".into(),
            selector: "button.cta".into(),
            properties: [(PropertyName::Color, "red")].into_iter().collect(),
            previous_text: None,
            epoch: Epoch::INITIAL,
            timestamp: now_ms(),
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let mut ledger = HistoryLedger::new();
        ledger.append(record("first"));
        ledger.append(record("second"));
        let prompts: Vec<_> = ledger.records().iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = HistoryLedger::new();
        ledger.append(record("a"));
        ledger.append_conversation(ConversationEntry::new(Role::User, "a", None));
        ledger.reset();
        assert!(ledger.is_empty());
        assert_eq!(ledger.conversation_len(), 0);
    }

    #[test]
    fn test_snapshot_views_current_contents() {
        let mut ledger = HistoryLedger::new();
        ledger.append(record("a"));
        ledger.append_conversation(ConversationEntry::new(Role::Assistant, "done", Some("cta-0".into())));
        let snap = ledger.snapshot();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.conversation[0].related_instance_id.as_deref(), Some("cta-0"));
    }

    #[test]
    fn test_record_wire_shape() {
        let value = serde_json::to_value(record("make it red")).unwrap();
        assert_eq!(value["instanceId"], "cta-0");
        assert_eq!(value["properties"]["color"], "red");
        assert_eq!(value["epoch"], 0);
        assert!(value.get("previousText").is_none());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let entry = ConversationEntry::new(Role::User, "hi", None);
        let value = serde_json::to_value(entry).unwrap();
        assert_eq!(value["role"], "user");
        assert!(value.get("relatedInstanceId").is_none());
    }

    #[test]
    fn test_now_ms_is_nonzero() {
        assert!(now_ms() > 0);
    }
}
