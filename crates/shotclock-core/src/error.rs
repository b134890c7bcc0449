//! Error types for inbound control input.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("missing `cmd` field")]
    MissingCmd,

    #[error("unknown command `{0}`")]
    UnknownCmd(String),

    #[error("`set` value is not a non-negative integer: {0}")]
    InvalidValue(String),
}
