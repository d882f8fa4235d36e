use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("malformed provenance link `{link}`: {reason}")]
    MalformedLink { link: String, reason: String },
    #[error("cluster {cluster} estimated at {estimated} tokens exceeds chunk budget {budget}")]
    ClusterOverflow {
        cluster: usize,
        estimated: usize,
        budget: usize,
    },
    #[error("generation failed for chunk {chunk} after {attempts} attempt(s): {reason}")]
    GenerationFailure {
        chunk: usize,
        attempts: u32,
        reason: String,
    },
    #[error("no valid bullets survived validation")]
    NoValidBullets,
    #[error("config invalid: {0}")]
    InvalidConfig(String),
    #[error("duplicate message id `{0}` in input")]
    DuplicateMessageId(String),
    #[error("input invalid: {0}")]
    InvalidInput(String),
}

impl DigestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedLink { .. } => "MALFORMED_LINK",
            Self::ClusterOverflow { .. } => "CLUSTER_OVERFLOW",
            Self::GenerationFailure { .. } => "GENERATION_FAILURE",
            Self::NoValidBullets => "NO_VALID_BULLETS",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::DuplicateMessageId(_) => "DUPLICATE_MESSAGE_ID",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Only configuration and input-shape errors abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::DuplicateMessageId(_) | Self::InvalidInput(_)
        )
    }
}

/// Why a bullet was dropped by validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("text shorter than {min_chars} characters after cleaning")]
    EmptyContent { min_chars: usize },
    #[error("no provenance link survived")]
    MissingProvenance,
    #[error("duplicates an accepted bullet from chunk {chunk}: `{duplicate_of}`")]
    IntraChunkDuplicate { chunk: usize, duplicate_of: String },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyContent { .. } => "EMPTY_CONTENT",
            Self::MissingProvenance => "MISSING_PROVENANCE",
            Self::IntraChunkDuplicate { .. } => "INTRA_CHUNK_DUPLICATE",
        }
    }
}
