use thiserror::Error;

/// Failures decoding identifiers that arrive from the shared topic namespace.
///
/// None of these are fatal: the offending input is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed device address: {0:?}")]
    MalformedAddress(String),

    #[error("malformed attribute uuid: {0:?}")]
    MalformedUuid(String),

    #[error("malformed topic: {0:?}")]
    MalformedTopic(String),
}
