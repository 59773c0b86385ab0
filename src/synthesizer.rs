//! Code synthesis: ledger → CSS rule blocks plus text-change comments.
//!
//! Output depends only on record contents and order. Ids, timestamps and
//! epochs never appear in it.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ledger::{LedgerSnapshot, ModificationRecord};

pub const EMPTY_ARTIFACT: &str = "/* No modifications recorded. */\n";

/// Render the edit history as a code artifact.
pub fn synthesize(ledger: &LedgerSnapshot<'_>) -> String {
    let records = ledger.records;
    if records.is_empty() {
        return EMPTY_ARTIFACT.to_string();
    }

    let mut out = String::new();

    // Style rules, grouped by selector in first-appearance order.
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&ModificationRecord>> = HashMap::new();
    for record in records.iter().filter(|r| r.properties.styles().next().is_some()) {
        let key = record.selector.as_str();
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record);
    }

    for selector in &order {
        let Some(group) = groups.get(selector) else {
            continue;
        };
        let _ = writeln!(out, "/* ==== {} ==== */", css_comment(selector));
        for record in group {
            let _ = writeln!(out, "/* Prompt: {} */", css_comment(&record.prompt));
            let _ = writeln!(out, "{} {{", single_line(selector));
            for (property, value) in record.properties.styles() {
                if let Some(css) = property.css_name() {
                    let _ = writeln!(out, "  {}: {};", css, value);
                }
            }
            out.push_str("}\n\n");
        }
    }

    // Text changes, in ledger order.
    let mut last_text: HashMap<&str, &str> = HashMap::new();
    let mut wrote_header = false;
    for record in records {
        let Some(after) = record.properties.text_content() else {
            continue;
        };
        if !wrote_header {
            out.push_str("<!-- Content changes -->\n");
            wrote_header = true;
        }
        let before = last_text
            .get(record.instance_id.as_str())
            .copied()
            .or(record.previous_text.as_deref())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "<!-- {} ({}) -->",
            html_comment(&record.selector),
            html_comment(&record.instance_id)
        );
        let _ = writeln!(out, "<!-- Prompt: {} -->", html_comment(&record.prompt));
        let _ = writeln!(out, "<!--   before: \"{}\" -->", html_comment(before));
        let _ = writeln!(out, "<!--   after: \"{}\" -->", html_comment(after));
        out.push('\n');
        last_text.insert(record.instance_id.as_str(), after);
    }

    // drop the trailing separator
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn single_line(s: &str) -> String {
    s.split(['\n', '\r']).collect::<Vec<_>>().join(" ")
}

/// Text safe to place inside `/* ... */`.
fn css_comment(s: &str) -> String {
    single_line(s).replace("*/", "*\\/")
}

/// Text safe to place inside `<!-- ... -->`.
fn html_comment(s: &str) -> String {
    single_line(s).replace("--", "- -").replace('>', "&gt;")
}
