use serde::{Deserialize, Serialize};

/// Outcome of a single test execution as reported by the run log.
///
/// `Error` exists only between parsing and import: the import boundary folds
/// it into `Failed`, and no persisted row ever carries it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    /// Parse a status token from a run log. Unknown tokens map to `Error`,
    /// which the import boundary later folds to `Failed`.
    pub fn parse(token: &str) -> TestStatus {
        match token.trim().to_ascii_uppercase().as_str() {
            "PASSED" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            "SKIPPED" => TestStatus::Skipped,
            _ => TestStatus::Error,
        }
    }

    /// Collapse `Error` into `Failed` for persistence.
    pub fn fold_error(self) -> TestStatus {
        match self {
            TestStatus::Error => TestStatus::Failed,
            other => other,
        }
    }

    pub fn is_failing(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test-case priority from metadata. Stored as its string form; absence is
/// surfaced as "UNKNOWN" in aggregates.
pub type Priority = String;

pub const UNKNOWN_PRIORITY: &str = "UNKNOWN";

/// Display and aggregation order of priority buckets.
pub const PRIORITY_LEVELS: [&str; 5] = ["P0", "P1", "P2", "P3", UNKNOWN_PRIORITY];

/// Sort rank of a priority bucket; anything unrecognized sorts with UNKNOWN.
pub fn priority_rank(priority: &str) -> usize {
    PRIORITY_LEVELS
        .iter()
        .position(|p| *p == priority)
        .unwrap_or(PRIORITY_LEVELS.len() - 1)
}
