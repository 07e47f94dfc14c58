use thiserror::Error;

/// Errors from typed reads of a composite snapshot
///
/// Per-field failures stay local to the field that produced them; nothing
/// here aborts sibling fields or other generations.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("field not in schema: {0}")]
    UnknownField(String),

    #[error("field still pending: {0}")]
    FieldPending(String),

    #[error("field {field} failed: {reason}")]
    FieldFailed { field: String, reason: String },

    #[error("failed to deserialize field value: {0}")]
    Serialization(#[from] serde_json::Error),
}
