//! Metadata request errors

use thiserror::Error;

/// Failure of a single metadata request
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The server answered with a non-success status
    #[error("metadata server returned status {status} for {key}")]
    Status { status: u16, key: String },

    /// Connection, timeout or body read failure
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A 200 response that did not carry a change token
    #[error("metadata response for {key} has no ETag header")]
    MissingEtag { key: String },

    /// The request URL could not be built from the base URL and key
    #[error("invalid metadata URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl MetadataError {
    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            MetadataError::Status { status, .. } => Some(*status),
            MetadataError::Request(e) => e.status().map(|s| s.as_u16()),
            MetadataError::MissingEtag { .. } | MetadataError::InvalidUrl { .. } => None,
        }
    }

    /// Whether the watched key does not exist
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_classified_by_status() {
        let err = MetadataError::Status {
            status: 404,
            key: "instance/shutdown-details/stop-state".to_string(),
        };
        assert!(err.is_not_found());

        let err = MetadataError::Status {
            status: 503,
            key: "instance/shutdown-details/stop-state".to_string(),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_missing_etag_has_no_status() {
        let err = MetadataError::MissingEtag {
            key: "instance/shutdown-details/stop-state".to_string(),
        };
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("ETag"));
    }
}
