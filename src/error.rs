use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// An upstream series was empty or unreadable, or the aligned intersection is empty.
    /// `detail` carries the raw provider payload when one was returned.
    #[error("data unavailable for {source_name}: {detail}")]
    DataUnavailable {
        source_name: String,
        detail: String,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EngineError {
    pub fn unavailable(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }

    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, EngineError::DataUnavailable { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
