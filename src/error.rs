//! Crate error type.
//!
//! Only conditions the caller can act on are typed errors: graph validation
//! failures, lock rejections, navigator misuse. Placement conflicts are
//! resolved automatically and missing media is a data value, so neither
//! appears here.

use crate::entities::strip::StripId;

pub type Result<T> = std::result::Result<T, SpliceError>;

#[derive(thiserror::Error, Debug)]
pub enum SpliceError {
    #[error("strip not found: {0}")]
    StripNotFound(StripId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("mutation would create a dependency cycle through strip {0}")]
    GraphCycle(StripId),

    #[error("strip {0} is locked")]
    Locked(StripId),

    #[error("strip {0} is not a meta strip")]
    NotMeta(StripId),

    #[error("strip {0} is not an effect strip")]
    NotEffect(StripId),

    #[error("persistence error: {0}")]
    Persist(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpliceError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        let id = StripId::new();
        assert!(
            SpliceError::StripNotFound(id)
                .to_string()
                .contains("strip not found:")
        );
        assert!(
            SpliceError::invalid_state("x")
                .to_string()
                .contains("invalid state:")
        );
        assert!(SpliceError::Locked(id).to_string().contains("locked"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("decode failed");
        let err = SpliceError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("decode failed"));
    }
}
