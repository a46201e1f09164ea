use rosy_types::models::{ClassificationResult, ReceiptDetails, WasteCategory};
use serde_json::{Map, Value};

use crate::gateway::RawModelOutput;
use crate::offline::OfflineRecord;

/// Confidence reported for locally computed records.
pub const HEURISTIC_CONFIDENCE: u8 = 85;

/// Confidence reported for anything derived from model text.
pub const MODEL_CONFIDENCE: u8 = 80;

const UNKNOWN_ITEM: &str = "Unknown";
const NO_GUIDANCE: &str = "No guidance";
const RECEIPT_ITEM: &str = "Bank transaction / receipt";
const RECEIPT_GUIDANCE: &str = "This looks like a receipt. You can upload it as proof.";

const CATEGORY_KEYS: &[&str] = &["type", "category", "wasteCategory", "waste_category"];
const ITEM_KEYS: &[&str] = &["item", "itemLabel", "item_label", "name"];
const GUIDANCE_KEYS: &[&str] = &["guidance", "guidanceText", "guidance_text"];
const RECEIPT_KEYS: &[&str] = &["isReceipt", "is_receipt", "receipt"];

/// Result of looking for a JSON object inside free-form model text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Map<String, Value>),
    Unparsed(String),
}

/// Finds the first balanced `{...}` span that parses as a JSON object.
/// Braces inside string literals do not count toward balance.
pub fn tolerant_parse(text: &str) -> ParseOutcome {
    for (start, _) in text.match_indices('{') {
        let Some(len) = balanced_len(&text[start..]) else {
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str(&text[start..start + len]) {
            return ParseOutcome::Parsed(map);
        }
    }
    ParseOutcome::Unparsed(text.to_string())
}

/// `s` must start with `{`. Returns the byte length of the balanced span.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turns any gateway output into a complete result. Never fails.
pub fn interpret(output: &RawModelOutput) -> ClassificationResult {
    match output {
        RawModelOutput::Offline(record) => from_offline(record),
        RawModelOutput::Model(text) | RawModelOutput::OfflineReply(text) => {
            match tolerant_parse(text) {
                ParseOutcome::Parsed(fields) => from_fields(&fields),
                ParseOutcome::Unparsed(raw) => fallback_result(&raw),
            }
        }
    }
}

/// Result used when the model text holds no usable JSON object.
pub fn fallback_result(raw: &str) -> ClassificationResult {
    let guidance = match raw.trim() {
        "" => NO_GUIDANCE,
        text => text,
    };
    ClassificationResult::new(WasteCategory::NonOrganic, UNKNOWN_ITEM, guidance, MODEL_CONFIDENCE)
}

fn from_offline(record: &OfflineRecord) -> ClassificationResult {
    let result = ClassificationResult::new(
        record.category,
        record.item.clone(),
        record.guidance.clone(),
        HEURISTIC_CONFIDENCE,
    );
    if record.is_receipt {
        result.with_receipt(None)
    } else {
        result
    }
}

fn from_fields(fields: &Map<String, Value>) -> ClassificationResult {
    let is_receipt = lookup(fields, RECEIPT_KEYS).map(truthy).unwrap_or(false);

    let category = lookup(fields, CATEGORY_KEYS)
        .and_then(Value::as_str)
        .map(parse_category)
        .unwrap_or(WasteCategory::NonOrganic);

    let (default_item, default_guidance) = if is_receipt {
        (RECEIPT_ITEM, RECEIPT_GUIDANCE)
    } else {
        (UNKNOWN_ITEM, NO_GUIDANCE)
    };
    let item = lookup(fields, ITEM_KEYS)
        .and_then(text_of)
        .unwrap_or_else(|| default_item.to_string());
    let guidance = lookup(fields, GUIDANCE_KEYS)
        .and_then(text_of)
        .unwrap_or_else(|| default_guidance.to_string());

    let result = ClassificationResult::new(category, item, guidance, MODEL_CONFIDENCE);
    if !is_receipt {
        return result;
    }
    result.with_receipt(Some(ReceiptDetails {
        vendor: fields.get("vendor").and_then(text_of),
        amount: fields.get("amount").and_then(text_of),
        date: fields.get("date").and_then(text_of),
    }))
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| fields.get(*k))
}

fn parse_category(raw: &str) -> WasteCategory {
    match raw.trim().to_lowercase().as_str() {
        "organic" => WasteCategory::Organic,
        _ => WasteCategory::NonOrganic,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "y" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
