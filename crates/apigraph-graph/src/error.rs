//! Persistence errors.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Cypher statement failed: {statement}")]
    Query {
        statement: String,
        #[source]
        source: neo4rs::Error,
    },

    #[error("Transaction for {label} failed")]
    Transaction {
        label: String,
        #[source]
        source: neo4rs::Error,
    },

    #[error("Invalid graph identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Failed to decode result: {0}")]
    Decode(String),

    /// Raised by the in-memory store when a failure was injected.
    #[error("Store rejected write: {0}")]
    Rejected(String),

    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    pub fn query(statement: &str, source: neo4rs::Error) -> Self {
        Self::Query {
            statement: statement.to_string(),
            source,
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// True when the store itself is unreachable, as opposed to one
    /// statement or record being refused. Callers stop on these.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Closed => true,
            Self::Query { source, .. } | Self::Transaction { source, .. } => matches!(
                source,
                neo4rs::Error::IOError { .. }
                    | neo4rs::Error::ConnectionError
                    | neo4rs::Error::AuthenticationError(_)
                    | neo4rs::Error::UnexpectedMessage(_)
            ),
            Self::InvalidIdentifier(_) | Self::Decode(_) | Self::Rejected(_) => false,
        }
    }
}

/// Check a label, relationship type or property name before it is spliced into Cypher.
///
/// Accepts ASCII letters, digits and `_`, not starting with a digit.
pub fn validate_identifier(name: &str) -> StoreResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
