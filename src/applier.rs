//! Validation of translator output and dispatch of modification commands.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::channel::HostEndpoint;
use crate::error::{EditorError, Result};
use crate::ledger::{now_ms, HistoryLedger, ModificationRecord};
use crate::protocol::{ApplyModifications, HostMessage, Modifications, PropertyName};
use crate::selection::Selection;

pub const MAX_STYLE_VALUE_LEN: usize = 512;
pub const MAX_TEXT_LEN: usize = 10_000;

/// Turn a raw property map into validated [`Modifications`].
///
/// Any key outside the allowlist rejects the whole map.
pub fn validate(raw: &BTreeMap<String, String>) -> Result<Modifications> {
    let mut mods = Modifications::new();
    for (key, value) in raw {
        let property: PropertyName = key.parse()?;
        check_value(property, value)?;
        let value = if property.is_text_content() {
            value.clone()
        } else {
            value.trim().to_string()
        };
        mods.insert(property, value);
    }
    if mods.is_empty() {
        return Err(EditorError::NoModifications);
    }
    Ok(mods)
}

fn check_value(property: PropertyName, value: &str) -> Result<()> {
    let invalid = |reason: &'static str| EditorError::InvalidValue {
        property: property.to_string(),
        reason,
    };
    if property.is_text_content() {
        if value.chars().count() > MAX_TEXT_LEN {
            return Err(invalid("text is too long"));
        }
        return Ok(());
    }
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("value is empty"));
    }
    if trimmed.len() > MAX_STYLE_VALUE_LEN {
        return Err(invalid("value is too long"));
    }
    if trimmed
        .chars()
        .any(|c| matches!(c, ';' | '{' | '}' | '<' | '>') || c.is_control())
    {
        return Err(invalid("value contains a forbidden character"));
    }
    if trimmed.contains("/*") || trimmed.contains("*/") {
        return Err(invalid("value contains a comment"));
    }
    Ok(())
}

/// Send `modifications` to the selected instance and append the record.
///
/// The command is fire-and-forget: the record is appended whether or not the
/// context is still listening.
pub fn apply(
    endpoint: &HostEndpoint,
    selection: &Selection,
    prompt: &str,
    modifications: Modifications,
    ledger: &mut HistoryLedger,
) -> ModificationRecord {
    let previous_text = modifications
        .text_content()
        .map(|_| selection.text_content.clone());

    let delivered = endpoint.send(HostMessage::ApplyModifications(ApplyModifications {
        element_id: selection.instance_id.clone(),
        modifications: modifications.clone(),
    }));
    if !delivered {
        debug!(instance_id = %selection.instance_id, "modification command not delivered");
    }

    let record = ModificationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        prompt: prompt.to_string(),
        instance_id: selection.instance_id.clone(),
        selector: selection.selector.clone(),
        properties: modifications,
        previous_text,
        epoch: endpoint.epoch(),
        timestamp: now_ms(),
    };
    info!(
        instance_id = %record.instance_id,
        properties = record.properties.len(),
        epoch = %record.epoch,
        "modification applied"
    );
    ledger.append(record.clone());
    record
}
