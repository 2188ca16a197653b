//! Error types for the race and betting server
//!
//! Each component reports failures with its own typed error. At the dispatch
//! boundary they are all folded into [`ApiError`], which maps one-to-one onto
//! the wire-level [`ErrorKind`] taxonomy.

use shared::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Failure raised by a storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("no record for {0}")]
    NotFound(String),
    #[error("storage lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceError {
    #[error("race {0} has already started")]
    AlreadyStarted(String),
    #[error("race {0} is not in progress")]
    NotInProgress(String),
    #[error("race {name} has {registered} of {capacity} racers")]
    RosterUnderfilled {
        name: String,
        registered: usize,
        capacity: usize,
    },
    #[error("race {name} has unfinished racers")]
    Unfinished { name: String },
    #[error("race {name} did not finish within {ticks} ticks")]
    Stalled { name: String, ticks: u32 },
    #[error("race scheduler is not running")]
    QueueClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    #[error("betting closed")]
    BettingClosed,
    #[error("betting closed for race {0}")]
    WrongRace(String),
    #[error("stake must be positive")]
    InvalidAmount,
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("racer {0} is not running in the current race")]
    UnknownRacer(u32),
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Error surfaced to a client as a structured error response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DomainState(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Protocol(_) => ErrorKind::Protocol,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::DomainState(_) => ErrorKind::DomainState,
            ApiError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Storage details stay in the server log; clients get a generic message.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            ApiError::Persistence(_) => "request failed: storage error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            kind: self.kind(),
            message,
        }
    }
}

impl From<BetError> for ApiError {
    fn from(err: BetError) -> Self {
        match err {
            BetError::InvalidAmount => ApiError::Validation(err.to_string()),
            BetError::Persistence(e) => ApiError::Persistence(e),
            other => ApiError::DomainState(other.to_string()),
        }
    }
}

impl From<RaceError> for ApiError {
    fn from(err: RaceError) -> Self {
        ApiError::DomainState(err.to_string())
    }
}
