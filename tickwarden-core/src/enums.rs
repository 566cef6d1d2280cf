//! Status enums for claim and gap rows

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CLAIM STATUS
// ============================================================================

/// Lifecycle of a claim row. Transitions `Claimed -> Completed` or
/// `Claimed -> Failed`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    Claimed,
    Completed,
    Failed,
}

impl ClaimStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "claimed" => Ok(ClaimStatus::Claimed),
            "completed" => Ok(ClaimStatus::Completed),
            "failed" => Ok(ClaimStatus::Failed),
            _ => Err(StatusParseError {
                kind: "claim status",
                value: s.to_string(),
            }),
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClaimStatus::Claimed)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// GAP STATUS
// ============================================================================

/// Lifecycle of a gap row. `Permanent` gaps are never searched again but are
/// kept for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapStatus {
    Pending,
    Permanent,
}

impl GapStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            GapStatus::Pending => "pending",
            GapStatus::Permanent => "permanent",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(GapStatus::Pending),
            "permanent" => Ok(GapStatus::Permanent),
            _ => Err(StatusParseError {
                kind: "gap status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for GapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for GapStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// CLAIM OUTCOME
// ============================================================================

/// Result of an atomic claim attempt.
///
/// `AlreadyClaimed` is the expected contention signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }

    /// Label used for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::AlreadyClaimed => "already_claimed",
        }
    }
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for StatusParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_status_db_roundtrip() {
        for status in [ClaimStatus::Claimed, ClaimStatus::Completed, ClaimStatus::Failed] {
            assert_eq!(ClaimStatus::from_db_str(status.as_db_str()), Ok(status));
        }
    }

    #[test]
    fn test_claim_status_parse_is_case_insensitive() {
        assert_eq!("COMPLETED".parse::<ClaimStatus>(), Ok(ClaimStatus::Completed));
    }

    #[test]
    fn test_claim_status_terminal() {
        assert!(!ClaimStatus::Claimed.is_terminal());
        assert!(ClaimStatus::Completed.is_terminal());
        assert!(ClaimStatus::Failed.is_terminal());
    }

    #[test]
    fn test_gap_status_rejects_unknown() {
        let err = GapStatus::from_db_str("closed").unwrap_err();
        assert_eq!(err.kind, "gap status");
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_claim_outcome_labels() {
        assert!(ClaimOutcome::Claimed.is_claimed());
        assert_eq!(ClaimOutcome::AlreadyClaimed.as_label(), "already_claimed");
    }
}
