use thiserror::Error;

use super::types::SyncScope;
use crate::api::{ApiError, PrivilegeError};
use crate::entity::collection_kind::CollectionKind;
use crate::store::StoreError;

/// Why a sync run was abandoned. In every case the cache is left as it was.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("project {project} has no usable credentials")]
    NoCredentials { project: String },

    #[error(transparent)]
    PermissionDenied(#[from] PrivilegeError),

    #[error(
        "{kind}: fetched {fetched} of {expected} ({:.1}%), below the required {:.1}%",
        ratio_percent(*fetched, *expected),
        required_ratio * 100.0
    )]
    DataLossThreshold {
        kind: CollectionKind,
        fetched: u64,
        expected: u64,
        required_ratio: f64,
    },

    #[error("could not discover the size of {scope}: {source}")]
    Discovery {
        scope: SyncScope,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

fn ratio_percent(fetched: u64, expected: u64) -> f64 {
    if expected == 0 {
        100.0
    } else {
        fetched as f64 * 100.0 / expected as f64
    }
}

impl SyncError {
    /// The run stopped before any write because too little was fetched.
    pub fn is_data_loss(&self) -> bool {
        matches!(self, SyncError::DataLossThreshold { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_message_reports_percentages() {
        let err = SyncError::DataLossThreshold {
            kind: CollectionKind::Members,
            fetched: 900,
            expected: 1_000,
            required_ratio: 0.95,
        };
        assert_eq!(
            err.to_string(),
            "members: fetched 900 of 1000 (90.0%), below the required 95.0%"
        );
        assert!(err.is_data_loss());
    }
}
