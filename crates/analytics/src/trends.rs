use std::collections::{HashMap, HashSet};

use models::{normalize_test_name, TestStatus, UNKNOWN_PRIORITY};
use sqlx::SqlitePool;
use tracker_sql::jobs::JobWithContext;
use tracker_sql::{jobs, metadata, test_results};

/// Rerun outcome of one test within one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RerunInfo {
    pub was_rerun: bool,
    pub rerun_still_failed: bool,
}

/// One test's status across the analysis window of jobs.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TestTrend {
    pub test_key: String,
    pub file_path: String,
    pub class_name: String,
    pub test_name: String,
    pub priority: Option<String>,
    pub topology_metadata: Option<String>,
    pub test_state: Option<String>,
    /// Jenkins job id -> status.
    pub results_by_job: HashMap<String, TestStatus>,
    pub rerun_info_by_job: HashMap<String, RerunInfo>,
    /// Jenkins job id -> Jenkins module name (for job URLs).
    pub job_modules: HashMap<String, String>,
    /// Jenkins job id -> parent build id.
    pub parent_job_ids: HashMap<String, String>,
}

fn numeric(id: &str) -> i64 {
    id.parse().unwrap_or(0)
}

impl TestTrend {
    /// Job ids where this test has results, ascending numerically.
    pub fn sorted_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.results_by_job.keys().cloned().collect();
        ids.sort_by_key(|id| numeric(id));
        ids
    }

    pub fn latest_status(&self) -> Option<TestStatus> {
        let latest = self.results_by_job.keys().max_by_key(|id| numeric(id))?;
        self.results_by_job.get(latest).copied()
    }

    pub fn is_always_passing(&self) -> bool {
        !self.results_by_job.is_empty()
            && self.results_by_job.values().all(|s| *s == TestStatus::Passed)
    }

    pub fn is_always_failing(&self) -> bool {
        !self.results_by_job.is_empty()
            && self.results_by_job.values().all(|s| *s == TestStatus::Failed)
    }

    /// Passed at least once, then failed at least twice consecutively through
    /// the latest job, with no pass after the first failure. A later pass
    /// makes the pattern flaky instead.
    pub fn is_regression(&self) -> bool {
        if !self.results_by_job.values().any(|s| *s == TestStatus::Passed) {
            return false;
        }
        let sorted = self.sorted_job_ids();
        if sorted.len() < 2 {
            return false;
        }

        let consecutive_tail_failures = sorted
            .iter()
            .rev()
            .take_while(|id| self.results_by_job[*id] == TestStatus::Failed)
            .count();
        if consecutive_tail_failures < 2 {
            return false;
        }

        let Some(first_fail) = sorted
            .iter()
            .position(|id| self.results_by_job[id] == TestStatus::Failed)
        else {
            return false;
        };
        !sorted[first_fail + 1..]
            .iter()
            .any(|id| self.results_by_job[id] == TestStatus::Passed)
    }

    /// Both passes and failures in the window, the failures are not confined
    /// to the latest job (that's a new failure), and the pattern is not a
    /// regression.
    pub fn is_flaky(&self) -> bool {
        let has_pass = self.results_by_job.values().any(|s| *s == TestStatus::Passed);
        let has_fail = self.results_by_job.values().any(|s| *s == TestStatus::Failed);
        if !(has_pass && has_fail) {
            return false;
        }

        let sorted = self.sorted_job_ids();
        let latest = sorted.last().expect("non-empty");
        let failed_jobs: Vec<&String> = sorted
            .iter()
            .filter(|id| self.results_by_job[*id] == TestStatus::Failed)
            .collect();
        if failed_jobs.len() == 1 && failed_jobs[0] == latest {
            return false;
        }

        !self.is_regression()
    }

    /// Strict new failure: PASSED in the immediately previous job of
    /// `job_ids` and FAILED in the last. Only the final two entries matter.
    pub fn is_new_failure(&self, job_ids: &[String]) -> bool {
        if job_ids.len() < 2 {
            return false;
        }
        let mut sorted: Vec<&String> = job_ids.iter().collect();
        sorted.sort_by_key(|id| numeric(id));

        let current = self.results_by_job.get(sorted[sorted.len() - 1]);
        let previous = self.results_by_job.get(sorted[sorted.len() - 2]);
        previous == Some(&TestStatus::Passed) && current == Some(&TestStatus::Failed)
    }

    pub fn priority_bucket(&self) -> &str {
        self.priority.as_deref().unwrap_or(UNKNOWN_PRIORITY)
    }
}

/// Restrict jobs to those belonging to the top `limit` parent builds. All
/// sub-jobs of a retained parent stay, so tests that ran only in an older
/// sibling job remain visible.
fn limit_to_recent_parents(jobs: Vec<JobWithContext>, limit: usize) -> Vec<JobWithContext> {
    let mut parent_ids: Vec<i64> = jobs
        .iter()
        .map(|j| numeric(j.job.parent_key()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    parent_ids.sort_unstable_by(|a, b| b.cmp(a));
    let retained: HashSet<i64> = parent_ids.into_iter().take(limit).collect();

    jobs.into_iter()
        .filter(|j| retained.contains(&numeric(j.job.parent_key())))
        .collect()
}

/// Compute per-test trends over a module's jobs.
///
/// `use_testcase_module` selects the authoritative path-derived grouping;
/// the legacy branch groups by the Jenkins job's module instead. `job_limit`
/// bounds the analysis window to the most recent N parent builds.
pub async fn calculate_test_trends(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    use_testcase_module: bool,
    job_limit: Option<usize>,
) -> anyhow::Result<Vec<TestTrend>> {
    let mut selected = if use_testcase_module {
        jobs::fetch_jobs_for_testcase_module(release, module, None, pool).await?
    } else {
        jobs::fetch_jobs_for_release(release, pool)
            .await?
            .into_iter()
            .filter(|j| j.module_name == module)
            .collect()
    };
    if selected.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(limit) = job_limit {
        selected = limit_to_recent_parents(selected, limit);
    }

    let job_context: HashMap<i64, &JobWithContext> =
        selected.iter().map(|j| (j.job.id, j)).collect();
    let job_pks: Vec<i64> = selected.iter().map(|j| j.job.id).collect();

    let module_filter = use_testcase_module.then_some(module);
    let rows = test_results::fetch_results_for_jobs(&job_pks, module_filter, pool).await?;

    let mut trends: HashMap<String, TestTrend> = HashMap::new();
    for row in rows {
        let Some(context) = job_context.get(&row.job_id) else {
            continue;
        };
        let jenkins_job_id = context.job.job_id.clone();

        let trend = trends
            .entry(row.test_key())
            .or_insert_with(|| TestTrend {
                test_key: row.test_key(),
                file_path: row.file_path.clone(),
                class_name: row.class_name.clone(),
                test_name: row.test_name.clone(),
                priority: row.priority.clone(),
                topology_metadata: row.topology_metadata.clone(),
                ..Default::default()
            });

        trend
            .results_by_job
            .insert(jenkins_job_id.clone(), row.status);
        trend.rerun_info_by_job.insert(
            jenkins_job_id.clone(),
            RerunInfo {
                was_rerun: row.was_rerun,
                rerun_still_failed: row.rerun_still_failed,
            },
        );
        trend
            .job_modules
            .insert(jenkins_job_id.clone(), context.module_name.clone());
        trend
            .parent_job_ids
            .insert(jenkins_job_id, context.job.parent_key().to_string());
    }

    // Enrich with test_state, matching parameterized names against metadata.
    let names: Vec<String> = trends
        .values()
        .map(|t| normalize_test_name(&t.test_name).to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let state_by_name: HashMap<String, Option<String>> = metadata::fetch_by_names(&names, pool)
        .await?
        .into_iter()
        .map(|m| (m.testcase_name, m.test_state))
        .collect();
    for trend in trends.values_mut() {
        let normalized = normalize_test_name(&trend.test_name);
        trend.test_state = state_by_name.get(normalized).cloned().flatten();
    }

    Ok(trends.into_values().collect())
}

#[derive(Debug, Clone, Default)]
pub struct TrendFilter {
    pub flaky_only: bool,
    pub regression_only: bool,
    pub always_failing_only: bool,
    pub new_failures_only: bool,
    /// AND filter: latest status must be FAILED.
    pub failed_only: bool,
    /// AND filter; `UNKNOWN` matches tests without metadata priority.
    pub priorities: Vec<String>,
}

/// Apply trend filters. `failed_only` and `priorities` narrow the set; the
/// category flags union among themselves.
pub fn filter_trends(trends: Vec<TestTrend>, filter: &TrendFilter) -> Vec<TestTrend> {
    let mut filtered = trends;

    if filter.failed_only {
        filtered.retain(|t| t.latest_status() == Some(TestStatus::Failed));
    }

    let any_category = filter.flaky_only
        || filter.regression_only
        || filter.always_failing_only
        || filter.new_failures_only;
    if any_category {
        filtered.retain(|t| {
            (filter.flaky_only && t.is_flaky())
                || (filter.regression_only && t.is_regression())
                || (filter.always_failing_only && t.is_always_failing())
                || (filter.new_failures_only && t.is_new_failure(&t.sorted_job_ids()))
        });
    }

    if !filter.priorities.is_empty() {
        filtered.retain(|t| filter.priorities.iter().any(|p| p == t.priority_bucket()));
    }

    filtered
}

/// Failure statistics of one module's analysis window.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FailureSummary {
    pub flaky_by_priority: HashMap<String, i64>,
    /// Flaky tests whose own latest run passed; these are the candidates the
    /// exclude-flaky adjustment removes from pass rates.
    pub passed_flaky_by_priority: HashMap<String, i64>,
    pub new_failures_by_priority: HashMap<String, i64>,
    pub flaky_test_keys: Vec<String>,
    /// Priority bucket per flaky key, for per-priority adjustments.
    #[serde(skip)]
    pub flaky_priority_by_key: HashMap<String, String>,
    pub total_flaky: i64,
    pub total_passed_flaky: i64,
    pub total_new_failures: i64,
}

fn count_by_priority<'a>(tests: impl Iterator<Item = &'a TestTrend>) -> HashMap<String, i64> {
    let mut counts = HashMap::new();
    for test in tests {
        *counts.entry(test.priority_bucket().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Flaky and new-failure statistics over the most recent `window` parent
/// builds, broken down by priority.
pub async fn dashboard_failure_summary(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    use_testcase_module: bool,
    window: usize,
) -> anyhow::Result<FailureSummary> {
    let trends =
        calculate_test_trends(pool, release, module, use_testcase_module, Some(window)).await?;
    if trends.is_empty() {
        return Ok(FailureSummary::default());
    }

    let flaky: Vec<&TestTrend> = trends.iter().filter(|t| t.is_flaky()).collect();
    let passed_flaky: Vec<&TestTrend> = flaky
        .iter()
        .filter(|t| t.latest_status() == Some(TestStatus::Passed))
        .copied()
        .collect();
    let new_failures: Vec<&TestTrend> = trends
        .iter()
        .filter(|t| t.is_new_failure(&t.sorted_job_ids()))
        .collect();

    Ok(FailureSummary {
        flaky_by_priority: count_by_priority(flaky.iter().copied()),
        passed_flaky_by_priority: count_by_priority(passed_flaky.iter().copied()),
        new_failures_by_priority: count_by_priority(new_failures.iter().copied()),
        flaky_test_keys: flaky.iter().map(|t| t.test_key.clone()).collect(),
        flaky_priority_by_key: flaky
            .iter()
            .map(|t| (t.test_key.clone(), t.priority_bucket().to_string()))
            .collect(),
        total_flaky: flaky.len() as i64,
        total_passed_flaky: passed_flaky.len() as i64,
        total_new_failures: new_failures.len() as i64,
    })
}
