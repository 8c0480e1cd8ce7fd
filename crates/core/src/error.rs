use std::fmt;

use thiserror::Error;

/// Which embedding space an identifier or index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Item,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Item => "item",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("unknown {kind} {id}")]
    UnknownEntity { kind: EntityKind, id: String },
    #[error("unknown {kind} index {index} (codec holds {len} entries)")]
    UnknownIndex {
        kind: EntityKind,
        index: usize,
        len: usize,
    },
    #[error("insufficient data for user {user}: {ratings} rating(s), need at least 2")]
    InsufficientData { user: i64, ratings: usize },
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("degenerate ratings: {0}")]
    DegenerateRatings(String),
}

pub type Result<T> = std::result::Result<T, RecError>;

impl RecError {
    pub fn unknown(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    /// True for failures caused by a missing codec or table entry.
    pub fn is_unknown_entity(&self) -> bool {
        matches!(
            self,
            RecError::UnknownEntity { .. } | RecError::UnknownIndex { .. }
        )
    }
}
