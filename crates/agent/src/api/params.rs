use lazy_static::lazy_static;
use models::{TestStatus, PRIORITY_LEVELS};
use regex::Regex;

use super::error::ApiError;

lazy_static! {
    static ref SEGMENT_RE: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,100}$").unwrap();
}

/// Release and module path segments: alphanumerics plus `.`, `_`, `-`.
pub fn validate_segment(kind: &str, value: &str) -> Result<(), ApiError> {
    if SEGMENT_RE.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::unprocessable(format!("invalid {kind} {value:?}")))
    }
}

/// Parse a comma-separated priority filter: subset of P0..P3, UNKNOWN.
pub fn parse_priorities(raw: Option<&str>) -> Result<Vec<String>, ApiError> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let mut priorities = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let token = token.to_ascii_uppercase();
        if !PRIORITY_LEVELS.contains(&token.as_str()) {
            return Err(ApiError::bad_request(format!(
                "invalid priority {token:?}; expected one of {PRIORITY_LEVELS:?}"
            )));
        }
        if !priorities.contains(&token) {
            priorities.push(token);
        }
    }
    Ok(priorities)
}

/// Parse a comma-separated status filter over persisted statuses.
/// ERROR is never stored, so it is not accepted here.
pub fn parse_statuses(raw: Option<&str>) -> Result<Vec<TestStatus>, ApiError> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let mut statuses = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let status = match token.to_ascii_uppercase().as_str() {
            "PASSED" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            "SKIPPED" => TestStatus::Skipped,
            other => {
                return Err(ApiError::bad_request(format!(
                    "invalid status {other:?}; expected PASSED, FAILED or SKIPPED"
                )))
            }
        };
        if !statuses.contains(&status) {
            statuses.push(status);
        }
    }
    Ok(statuses)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn segments_reject_path_tricks() {
        assert!(validate_segment("release", "7.0").is_ok());
        assert!(validate_segment("module", "business_policy").is_ok());
        assert!(validate_segment("release", "../etc").is_err());
        assert!(validate_segment("release", "a b").is_err());
        assert!(validate_segment("release", "").is_err());
    }

    #[test]
    fn priorities_validate_and_dedup() {
        assert_eq!(
            parse_priorities(Some("P0, p1,P0,UNKNOWN")).unwrap(),
            vec!["P0", "P1", "UNKNOWN"]
        );
        assert!(parse_priorities(Some("P7")).is_err());
        assert!(parse_priorities(None).unwrap().is_empty());
    }

    #[test]
    fn statuses_reject_error() {
        assert_eq!(
            parse_statuses(Some("passed,FAILED")).unwrap(),
            vec![TestStatus::Passed, TestStatus::Failed]
        );
        assert!(parse_statuses(Some("ERROR")).is_err());
        assert!(parse_statuses(Some("BOGUS")).is_err());
    }
}
