//! Result kinds for per-item operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_connectors::ConnectorError;

/// Classification of one check or mutation, derived from the connector
/// error variant (and so from the HTTP status), never from message text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    NotFound,
    PermissionDenied,
    Throttled,
    Conflict,
    Unknown,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::PermissionDenied => "permission_denied",
            OutcomeKind::Throttled => "throttled",
            OutcomeKind::Conflict => "conflict",
            OutcomeKind::Unknown => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }

    pub fn of<T>(result: &Result<T, ConnectorError>) -> Self {
        match result {
            Ok(_) => OutcomeKind::Success,
            Err(e) => e.into(),
        }
    }
}

impl From<&ConnectorError> for OutcomeKind {
    fn from(error: &ConnectorError) -> Self {
        match error {
            ConnectorError::NotFound(_) => OutcomeKind::NotFound,
            ConnectorError::AuthenticationFailed(_) | ConnectorError::AuthorizationDenied(_) => {
                OutcomeKind::PermissionDenied
            }
            ConnectorError::RateLimited(_) => OutcomeKind::Throttled,
            ConnectorError::Conflict(_) => OutcomeKind::Conflict,
            _ => OutcomeKind::Unknown,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            OutcomeKind::from(&ConnectorError::AuthorizationDenied("x".into())),
            OutcomeKind::PermissionDenied
        );
        assert_eq!(
            OutcomeKind::from(&ConnectorError::RateLimited(10)),
            OutcomeKind::Throttled
        );
        assert_eq!(
            OutcomeKind::from(&ConnectorError::Conflict("exists".into())),
            OutcomeKind::Conflict
        );
        assert_eq!(
            OutcomeKind::from(&ConnectorError::Timeout("slow".into())),
            OutcomeKind::Unknown
        );
    }

    #[test]
    fn test_message_text_is_ignored() {
        // Wording that looks like a conflict still classifies by variant.
        let err = ConnectorError::RequestFailed("One or more added object references already exist".into());
        assert_eq!(OutcomeKind::from(&err), OutcomeKind::Unknown);
    }

    #[test]
    fn test_of_result() {
        let ok: Result<(), ConnectorError> = Ok(());
        assert!(OutcomeKind::of(&ok).is_success());
        let err: Result<(), ConnectorError> = Err(ConnectorError::NotFound("gone".into()));
        assert_eq!(OutcomeKind::of(&err), OutcomeKind::NotFound);
    }
}
