use serde_json::Value;
use thiserror::Error;

use crate::types::StructuredOutput;

const DEAL_LISTING_PHRASES: [&str; 3] = [
    "here are the deals",
    "found these deals",
    "check out these products",
];
const ORDER_LISTING_PHRASES: [&str; 2] = ["here are your orders", "recent orders"];

/// A candidate completion broke the tag/payload consistency contract.
///
/// `reason` is written for the model, it is fed back verbatim as corrective
/// feedback on the next attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct SchemaViolation {
    pub reason: String,
}

impl SchemaViolation {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Checks that the declared `type` agrees with the populated payload and that
/// the prose does not promise a listing the payload does not carry.
pub fn validate_output(candidate: &Value) -> Result<StructuredOutput, SchemaViolation> {
    let Some(object) = candidate.as_object() else {
        return Err(SchemaViolation::new(
            "Output must be a valid structured object.",
        ));
    };

    let kind = object.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "deals" if is_empty_list(object.get("deals")) => {
            return Err(SchemaViolation::new(
                "Type is 'deals' but the 'deals' list is empty. If no deals were found, use type='text' and say so. If deals WERE found, ensure the 'deals' array is populated.",
            ));
        }
        "orders" if is_empty_list(object.get("orders")) => {
            return Err(SchemaViolation::new(
                "Type is 'orders' but the 'orders' list is empty. If the user has no orders, use type='text' and say so. Otherwise populate the 'orders' array.",
            ));
        }
        "payments" if is_empty_list(object.get("payments")) => {
            return Err(SchemaViolation::new(
                "Type is 'payments' but the 'payments' list is empty. If there are no payments, use type='text' and say so. Otherwise populate the 'payments' array.",
            ));
        }
        "profile" if object.get("profile").is_none_or(Value::is_null) => {
            return Err(SchemaViolation::new(
                "Type is 'profile' but the 'profile' object is missing. If the profile could not be loaded, use type='text' and say so. Otherwise populate 'profile'.",
            ));
        }
        "text" => {
            let content = object
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            if contains_any(&content, &DEAL_LISTING_PHRASES) {
                return Err(SchemaViolation::new(
                    "You said 'Here are the deals' (or similar) but set type='text'. You MUST set type='deals' and populate the 'deals' array to render the cards.",
                ));
            }
            if contains_any(&content, &ORDER_LISTING_PHRASES) {
                return Err(SchemaViolation::new(
                    "You said 'Here are your orders' (or similar) but set type='text'. You MUST set type='orders' and populate the 'orders' array.",
                ));
            }
        }
        _ => {}
    }

    Ok(StructuredOutput::from_object(object))
}

fn is_empty_list(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .is_none_or(|items| items.is_empty())
}

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| haystack.contains(phrase))
}
