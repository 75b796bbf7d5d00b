use super::contribution::Contribution;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("contribution for session {session_key} was not persisted: {reason}")]
    DuplicateOrPersistence { session_key: String, reason: String },
    /// `contribution` is set when the record was written before the campaign
    /// lookup failed. That record is kept, not rolled back.
    #[error("campaign {campaign_ref} not found")]
    CampaignNotFound {
        campaign_ref: String,
        contribution: Option<Box<Contribution>>,
    },
    #[error("aggregate overflow on campaign {campaign_ref}")]
    AmountOverflow { campaign_ref: String },
    #[error("record codec failure: {0}")]
    Codec(String),
    #[error("failed to generate record identifier: {0}")]
    Identifier(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sled::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    DuplicateOrPersistence,
    CampaignNotFound,
    StorageUnavailable,
    Internal,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::InvalidInput(_) => ErrorKind::InvalidInput,
            ReconcileError::DuplicateOrPersistence { .. } => ErrorKind::DuplicateOrPersistence,
            ReconcileError::CampaignNotFound { .. } => ErrorKind::CampaignNotFound,
            ReconcileError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            ReconcileError::AmountOverflow { .. }
            | ReconcileError::Codec(_)
            | ReconcileError::Identifier(_) => ErrorKind::Internal,
        }
    }

    /// True when a contribution exists but its campaign aggregate was never applied.
    pub fn is_partial_failure(&self) -> bool {
        matches!(
            self,
            ReconcileError::CampaignNotFound {
                contribution: Some(_),
                ..
            }
        )
    }

    pub fn recorded_contribution(&self) -> Option<&Contribution> {
        match self {
            ReconcileError::CampaignNotFound {
                contribution: Some(contribution),
                ..
            } => Some(contribution),
            _ => None,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ReconcileError::InvalidInput(msg.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
