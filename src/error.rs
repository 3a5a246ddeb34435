//! Error taxonomy for the command engine.
//!
//! Every handler failure is a `RedisError`; the dispatcher is the single
//! place that turns one into wire bytes, so the prefixes here must match
//! what `redis-cli` and common client libraries expect verbatim.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RedisError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR index out of range")]
    OutOfRange,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR {0}")]
    InvalidArgument(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    #[error("NOGROUP No such key '{0}' or consumer group '{1}'")]
    NoGroup(String, String),

    #[error("BUSYGROUP Consumer Group name already exists")]
    BusyGroup,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    InvalidStreamId,

    #[error("NOAUTH Authentication required.")]
    NoAuth,

    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    WrongPass,

    #[error("NOPERM this user has no permissions to run this command")]
    NoPerm,

    #[error("ERR DB index is out of range")]
    BadDbIndex,

    #[error("ERR internal server error")]
    Internal,

    #[error("ERR {0}")]
    Other(String),
}

impl RedisError {
    /// The exact text that follows the leading `-` on the wire (no CRLF).
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

pub type RedisResult<T> = Result<T, RedisError>;
