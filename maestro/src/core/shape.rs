//! Structural shape check for parsed model replies.
//!
//! Violations are reported, never enforced: the loop keeps going with whatever
//! the normalizer could salvage.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;

const STRUCTURED_RESPONSE_SCHEMA: &str =
    include_str!("../../schemas/structured_response.schema.json");

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(STRUCTURED_RESPONSE_SCHEMA)
        .expect("structured response schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("structured response schema should compile")
});

/// Return schema violations for a reply object, empty when it conforms.
pub fn shape_violations(reply: &Value) -> Vec<String> {
    VALIDATOR
        .iter_errors(reply)
        .map(|err| err.to_string())
        .collect()
}
