use models::TestStatus;

/// A single test execution parsed from a run log, possibly enriched with a
/// rerun outcome and a JUnit failure message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTest {
    pub setup_ip: String,
    pub status: TestStatus,
    pub file_path: String,
    pub class_name: String,
    pub test_name: String,
    /// Execution topology taken from the log filename.
    pub topology: String,
    /// Position within the originating log file.
    pub order_index: i64,
    pub was_rerun: bool,
    pub rerun_still_failed: bool,
    pub failure_message: Option<String>,
}

impl ParsedTest {
    pub fn test_key(&self) -> String {
        models::test_key(&self.file_path, &self.class_name, &self.test_name)
    }
}

/// Counts over one job's parsed results.
///
/// `pass_rate` here excludes skipped tests from the denominator. The rate
/// persisted on a Job row divides by the full total instead; both conventions
/// are load-bearing for their respective consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSummary {
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub error: i64,
}

impl JobSummary {
    pub fn from_results(results: &[ParsedTest]) -> JobSummary {
        let mut summary = JobSummary {
            total: results.len() as i64,
            ..Default::default()
        };
        for r in results {
            match r.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let executed = self.total - self.skipped;
        if executed == 0 {
            return 100.0;
        }
        (self.passed as f64 / executed as f64 * 10_000.0).round() / 100.0
    }

    pub fn fail_rate(&self) -> f64 {
        let executed = self.total - self.skipped;
        if self.total == 0 || executed == 0 {
            return 0.0;
        }
        ((self.failed + self.error) as f64 / executed as f64 * 10_000.0).round() / 100.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn result(status: TestStatus) -> ParsedTest {
        ParsedTest {
            setup_ip: "10.0.0.1".to_string(),
            status,
            file_path: "a.py".to_string(),
            class_name: "C".to_string(),
            test_name: "t".to_string(),
            topology: "5s".to_string(),
            order_index: 0,
            was_rerun: false,
            rerun_still_failed: false,
            failure_message: None,
        }
    }

    #[test]
    fn summary_excludes_skipped_from_denominator() {
        let results = vec![
            result(TestStatus::Passed),
            result(TestStatus::Passed),
            result(TestStatus::Failed),
            result(TestStatus::Skipped),
        ];
        let summary = JobSummary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.skipped, 1);
        // 2 passed of 3 executed.
        assert_eq!(summary.pass_rate(), 66.67);
    }

    #[test]
    fn summary_all_skipped_is_full_pass_rate() {
        let results = vec![result(TestStatus::Skipped), result(TestStatus::Skipped)];
        let summary = JobSummary::from_results(&results);
        assert_eq!(summary.pass_rate(), 100.0);
        assert_eq!(summary.fail_rate(), 0.0);
    }

    #[test]
    fn summary_empty_is_zero() {
        assert_eq!(JobSummary::from_results(&[]).pass_rate(), 0.0);
    }
}
