use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("parameter set is empty")]
    EmptyParameters,

    #[error("parameter name must not be empty")]
    EmptyParameterName,

    #[error("parameter name {0:?} contains a reserved character ('=', newline or NUL)")]
    InvalidParameterName(String),

    #[error("parameter '{name}' is not a finite number: {value}")]
    NonFiniteParameter { name: String, value: f64 },

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("invalid task id: {0}")]
    InvalidTaskId(String),
}
