//! Engine-level error taxonomy
//!
//! Maps onto the HTTP surface as 400 (validation), 404 (not found) and
//! 500 (everything else).

use crate::db::DbError;

#[derive(Debug)]
pub enum EngineError {
    /// Caller supplied bad or missing input; never retried automatically
    Validation(String),
    /// An id did not resolve
    NotFound(String),
    /// Underlying store failure
    Storage(DbError),
    /// The text-generation call itself failed (network, auth, bad response)
    Generation(String),
    /// Model output was not JSON-extractable after all fallbacks
    GenerationParse(String),
    /// A step inside the decision advancer's multi-step sequence failed.
    /// Already-committed sub-steps are not rolled back.
    DecisionProcessing(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{}", msg),
            EngineError::NotFound(msg) => write!(f, "Not found: {}", msg),
            EngineError::Storage(e) => write!(f, "Storage error: {}", e),
            EngineError::Generation(msg) => write!(f, "Generation failed: {}", msg),
            EngineError::GenerationParse(msg) => {
                write!(f, "Could not parse generated content: {}", msg)
            }
            EngineError::DecisionProcessing(msg) => {
                write!(f, "Decision processing failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<DbError> for EngineError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => EngineError::NotFound(what),
            DbError::Validation(msg) => EngineError::Validation(msg),
            other => EngineError::Storage(other),
        }
    }
}

impl EngineError {
    /// HTTP status code for the API envelope
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), 400);
        assert_eq!(EngineError::NotFound("x".into()).status_code(), 404);
        assert_eq!(EngineError::GenerationParse("x".into()).status_code(), 500);
        assert_eq!(
            EngineError::DecisionProcessing("x".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_db_not_found_folds_into_not_found() {
        let e: EngineError = DbError::NotFound("scenario 7".into()).into();
        assert!(matches!(e, EngineError::NotFound(_)));
        assert_eq!(e.status_code(), 404);
    }
}
