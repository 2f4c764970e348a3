use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use models::{extract_module_from_path, ALL_MODULES_IDENTIFIER, PRIORITY_LEVELS};
use sqlx::SqlitePool;
use tracker_sql::jobs::{self, JobWithContext};
use tracker_sql::test_results::{self, JobStats};

use crate::trends::{dashboard_failure_summary, FailureSummary};

fn numeric(id: &str) -> i64 {
    id.parse().unwrap_or(0)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn rate(passed: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(passed as f64 / total as f64 * 100.0)
    }
}

/// Group jobs under their parent build, parents ordered newest first.
fn group_by_parent(jobs: &[JobWithContext]) -> (HashMap<String, Vec<&JobWithContext>>, Vec<String>) {
    let mut groups: HashMap<String, Vec<&JobWithContext>> = HashMap::new();
    for job in jobs {
        groups
            .entry(job.job.parent_key().to_string())
            .or_default()
            .push(job);
    }
    let mut parent_ids: Vec<String> = groups.keys().cloned().collect();
    parent_ids.sort_by_key(|id| std::cmp::Reverse(numeric(id)));
    (groups, parent_ids)
}

fn aggregate<'a>(
    job_pks: impl Iterator<Item = i64>,
    stats_by_job: &'a HashMap<i64, JobStats>,
) -> JobStats {
    let mut total = JobStats::default();
    for pk in job_pks {
        if let Some(stats) = stats_by_job.get(&pk) {
            total.accumulate(stats);
        }
    }
    total
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ParentJobEntry {
    pub parent_job_id: String,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Parent build ids available for a release/module dropdown, newest first.
/// Falls back to import time when the CI execution timestamp is unknown.
pub async fn parent_jobs(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    version: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<ParentJobEntry>> {
    let jobs = fetch_module_jobs(pool, release, module, version).await?;
    let (groups, parent_ids) = group_by_parent(&jobs);

    Ok(parent_ids
        .into_iter()
        .take(limit)
        .map(|parent_id| {
            let members = &groups[&parent_id];
            let executed_at = members
                .iter()
                .filter_map(|j| j.job.executed_at)
                .max()
                .or_else(|| members.iter().map(|j| j.job.created_at).max());
            ParentJobEntry {
                parent_job_id: parent_id,
                executed_at,
            }
        })
        .collect())
}

async fn fetch_module_jobs(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    version: Option<&str>,
) -> anyhow::Result<Vec<JobWithContext>> {
    if module == ALL_MODULES_IDENTIFIER {
        let mut jobs = jobs::fetch_jobs_for_release(release, pool).await?;
        if let Some(version) = version {
            jobs.retain(|j| j.job.version.as_deref() == Some(version));
        }
        Ok(jobs)
    } else {
        Ok(jobs::fetch_jobs_for_testcase_module(release, module, version, pool).await?)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdjustedStats {
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
    pub excluded_passed_flaky_count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LatestJobStats {
    pub job_id: String,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryStats {
    pub total_jobs: i64,
    pub latest_job: LatestJobStats,
    pub total_tests: i64,
    pub average_pass_rate: f64,
    pub flaky_by_priority: HashMap<String, i64>,
    pub passed_flaky_by_priority: HashMap<String, i64>,
    pub new_failures_by_priority: HashMap<String, i64>,
    pub total_flaky: i64,
    pub total_passed_flaky: i64,
    pub total_new_failures: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_stats: Option<AdjustedStats>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentJob {
    pub job_id: String,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryEntry {
    pub job_id: String,
    pub pass_rate: f64,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_passed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_passed_flaky_count: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModuleBreakdownEntry {
    pub module_name: String,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_passed_flaky_count: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardSummary {
    pub release: String,
    pub module: String,
    pub summary: SummaryStats,
    pub recent_jobs: Vec<RecentJob>,
    pub pass_rate_history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_breakdown: Option<Vec<ModuleBreakdownEntry>>,
}

/// Count PASSED flaky tests per parent group from one batched
/// passed-keys query.
async fn passed_flaky_by_parent(
    pool: &SqlitePool,
    parent_pks: &HashMap<String, Vec<i64>>,
    flaky_keys: &HashSet<String>,
    module_filter: Option<&str>,
) -> anyhow::Result<HashMap<String, i64>> {
    let mut counts: HashMap<String, i64> =
        parent_pks.keys().map(|k| (k.clone(), 0)).collect();
    if flaky_keys.is_empty() {
        return Ok(counts);
    }

    let all_pks: Vec<i64> = parent_pks.values().flatten().copied().collect();
    let parent_by_pk: HashMap<i64, &String> = parent_pks
        .iter()
        .flat_map(|(parent, pks)| pks.iter().map(move |pk| (*pk, parent)))
        .collect();

    for (job_pk, test_key) in
        test_results::passed_keys_for_jobs(&all_pks, module_filter, pool).await?
    {
        if flaky_keys.contains(&test_key) {
            if let Some(parent) = parent_by_pk.get(&job_pk) {
                *counts.get_mut(*parent).expect("seeded above") += 1;
            }
        }
    }
    Ok(counts)
}

fn adjusted(stats: &JobStats, excluded: i64) -> AdjustedStats {
    let adjusted_passed = stats.passed - excluded;
    AdjustedStats {
        total: stats.total,
        passed: adjusted_passed,
        failed: stats.failed,
        skipped: stats.skipped,
        pass_rate: rate(adjusted_passed, stats.total),
        excluded_passed_flaky_count: excluded,
    }
}

/// Dashboard summary for one path-derived module.
///
/// The selected parent build (the requested one, else the latest) drives the
/// headline statistics; recent jobs and the pass-rate history always span
/// the last ten parents.
pub async fn module_summary(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    version: Option<&str>,
    parent_job_id: Option<&str>,
    exclude_flaky: bool,
    window: usize,
) -> anyhow::Result<Option<DashboardSummary>> {
    let all_jobs = jobs::fetch_jobs_for_testcase_module(release, module, version, pool).await?;
    if all_jobs.is_empty() {
        return Ok(None);
    }

    let (groups, parent_ids) = group_by_parent(&all_jobs);
    let selected = match parent_job_id {
        Some(requested) if groups.contains_key(requested) => requested.to_string(),
        _ => parent_ids[0].clone(),
    };
    let selected_pks: Vec<i64> = groups[&selected].iter().map(|j| j.job.id).collect();

    let stats_by_job = test_results::stats_for_jobs(&selected_pks, Some(module), pool).await?;
    let selected_stats = aggregate(selected_pks.iter().copied(), &stats_by_job);
    let pass_rate = rate(selected_stats.passed, selected_stats.total);

    let failure_summary =
        dashboard_failure_summary(pool, release, module, true, window).await?;
    let flaky_keys: HashSet<String> = failure_summary.flaky_test_keys.iter().cloned().collect();

    // Recent parent groups with one stats query across all their sub-jobs.
    let recent_parent_ids: Vec<&String> = parent_ids.iter().take(10).collect();
    let recent_parent_pks: HashMap<String, Vec<i64>> = recent_parent_ids
        .iter()
        .map(|parent| {
            (
                (*parent).clone(),
                groups[*parent].iter().map(|j| j.job.id).collect(),
            )
        })
        .collect();
    let all_recent_pks: Vec<i64> = recent_parent_pks.values().flatten().copied().collect();
    let recent_stats_by_job =
        test_results::stats_for_jobs(&all_recent_pks, Some(module), pool).await?;

    let recent_jobs: Vec<RecentJob> = recent_parent_ids
        .iter()
        .map(|parent| {
            let members = &groups[*parent];
            let stats = aggregate(members.iter().map(|j| j.job.id), &recent_stats_by_job);
            let first = members[0];
            RecentJob {
                job_id: (*parent).clone(),
                total: stats.total,
                passed: stats.passed,
                failed: stats.failed,
                skipped: stats.skipped,
                pass_rate: rate(stats.passed, stats.total),
                version: first.job.version.clone(),
                created_at: first.job.created_at,
                executed_at: first.job.executed_at,
            }
        })
        .collect();

    let flaky_counts = if exclude_flaky {
        passed_flaky_by_parent(pool, &recent_parent_pks, &flaky_keys, Some(module)).await?
    } else {
        HashMap::new()
    };

    let pass_rate_history: Vec<HistoryEntry> = recent_jobs
        .iter()
        .rev()
        .map(|job| {
            let mut entry = HistoryEntry {
                job_id: job.job_id.clone(),
                pass_rate: job.pass_rate,
                total: job.total,
                passed: job.passed,
                failed: job.failed,
                adjusted_pass_rate: None,
                adjusted_passed: None,
                excluded_passed_flaky_count: None,
            };
            if exclude_flaky {
                let excluded = flaky_counts.get(&job.job_id).copied().unwrap_or(0);
                let adjusted_passed = job.passed - excluded;
                entry.adjusted_passed = Some(adjusted_passed);
                entry.adjusted_pass_rate = Some(rate(adjusted_passed, job.total));
                entry.excluded_passed_flaky_count = Some(excluded);
            }
            entry
        })
        .collect();

    let adjusted_stats = if exclude_flaky && !flaky_keys.is_empty() {
        let excluded = flaky_counts.get(&selected).copied().unwrap_or(0);
        Some(adjusted(&selected_stats, excluded))
    } else {
        None
    };

    Ok(Some(DashboardSummary {
        release: release.to_string(),
        module: module.to_string(),
        summary: SummaryStats {
            total_jobs: parent_ids.len() as i64,
            latest_job: LatestJobStats {
                job_id: selected,
                total: selected_stats.total,
                passed: selected_stats.passed,
                failed: selected_stats.failed,
                skipped: selected_stats.skipped,
                pass_rate,
            },
            total_tests: selected_stats.total,
            average_pass_rate: pass_rate,
            flaky_by_priority: failure_summary.flaky_by_priority,
            passed_flaky_by_priority: failure_summary.passed_flaky_by_priority,
            new_failures_by_priority: failure_summary.new_failures_by_priority,
            total_flaky: failure_summary.total_flaky,
            total_passed_flaky: failure_summary.total_passed_flaky,
            total_new_failures: failure_summary.total_new_failures,
            adjusted_stats,
        },
        recent_jobs,
        pass_rate_history,
        module_breakdown: None,
    }))
}

/// Release-wide summary across every path-derived module, grouped by parent
/// build. Per-module flaky statistics aggregate over each module's own
/// window; the module breakdown covers the selected parent only.
pub async fn all_modules_summary(
    pool: &SqlitePool,
    release: &str,
    version: Option<&str>,
    parent_job_id: Option<&str>,
    priorities: &[String],
    exclude_flaky: bool,
    window: usize,
) -> anyhow::Result<Option<DashboardSummary>> {
    let all_jobs = fetch_module_jobs(pool, release, ALL_MODULES_IDENTIFIER, version).await?;
    if all_jobs.is_empty() {
        return Ok(None);
    }

    let (groups, parent_ids) = group_by_parent(&all_jobs);
    let selected = match parent_job_id {
        Some(requested) if groups.contains_key(requested) => requested.to_string(),
        _ => parent_ids[0].clone(),
    };
    let selected_pks: Vec<i64> = groups[&selected].iter().map(|j| j.job.id).collect();

    let stats_by_job = test_results::stats_for_jobs(&selected_pks, None, pool).await?;
    let selected_stats = aggregate(selected_pks.iter().copied(), &stats_by_job);

    // Aggregate each module's failure summary; each module analyses its own
    // parent window.
    let module_names = test_results::distinct_testcase_modules(release, pool).await?;
    let mut totals = FailureSummary::default();
    let mut flaky_keys: HashSet<String> = HashSet::new();
    for module in &module_names {
        let summary = dashboard_failure_summary(pool, release, module, true, window).await?;
        totals.total_flaky += summary.total_flaky;
        totals.total_passed_flaky += summary.total_passed_flaky;
        totals.total_new_failures += summary.total_new_failures;
        for (priority, count) in summary.flaky_by_priority {
            *totals.flaky_by_priority.entry(priority).or_insert(0) += count;
        }
        for (priority, count) in summary.passed_flaky_by_priority {
            *totals.passed_flaky_by_priority.entry(priority).or_insert(0) += count;
        }
        for (priority, count) in summary.new_failures_by_priority {
            *totals.new_failures_by_priority.entry(priority).or_insert(0) += count;
        }
        flaky_keys.extend(summary.flaky_test_keys);
    }

    // Module breakdown for the selected parent, one grouped query.
    let breakdown_stats =
        test_results::stats_by_module_for_jobs(&selected_pks, priorities, pool).await?;
    let breakdown_flaky = if exclude_flaky {
        passed_flaky_keys_in_jobs(pool, &selected_pks, &flaky_keys).await?
    } else {
        Vec::new()
    };
    let mut module_breakdown: Vec<ModuleBreakdownEntry> = breakdown_stats
        .into_iter()
        .map(|(module_name, stats)| {
            let mut entry = ModuleBreakdownEntry {
                total: stats.total,
                passed: stats.passed,
                failed: stats.failed,
                skipped: stats.skipped,
                pass_rate: rate(stats.passed, stats.total),
                adjusted_pass_rate: None,
                excluded_passed_flaky_count: None,
                module_name,
            };
            if exclude_flaky {
                let excluded = breakdown_flaky
                    .iter()
                    .filter(|key| key_module(key) == Some(entry.module_name.as_str()))
                    .count() as i64;
                let adjusted_passed = entry.passed - excluded;
                entry.adjusted_pass_rate = Some(rate(adjusted_passed, entry.total));
                entry.excluded_passed_flaky_count = Some(excluded);
            }
            entry
        })
        .collect();
    module_breakdown.sort_by(|a, b| a.module_name.cmp(&b.module_name));

    // Recent runs across the last ten parents.
    let recent_parent_ids: Vec<&String> = parent_ids.iter().take(10).collect();
    let recent_parent_pks: HashMap<String, Vec<i64>> = recent_parent_ids
        .iter()
        .map(|parent| {
            (
                (*parent).clone(),
                groups[*parent].iter().map(|j| j.job.id).collect(),
            )
        })
        .collect();
    let all_recent_pks: Vec<i64> = recent_parent_pks.values().flatten().copied().collect();
    let recent_stats_by_job = test_results::stats_for_jobs(&all_recent_pks, None, pool).await?;

    let recent_jobs: Vec<RecentJob> = recent_parent_ids
        .iter()
        .map(|parent| {
            let members = &groups[*parent];
            let stats = aggregate(members.iter().map(|j| j.job.id), &recent_stats_by_job);
            let first = members[0];
            RecentJob {
                job_id: (*parent).clone(),
                total: stats.total,
                passed: stats.passed,
                failed: stats.failed,
                skipped: stats.skipped,
                pass_rate: rate(stats.passed, stats.total),
                version: first.job.version.clone(),
                created_at: first.job.created_at,
                executed_at: first.job.executed_at,
            }
        })
        .collect();

    let flaky_counts = if exclude_flaky {
        passed_flaky_by_parent(pool, &recent_parent_pks, &flaky_keys, None).await?
    } else {
        HashMap::new()
    };

    let pass_rate_history: Vec<HistoryEntry> = recent_jobs
        .iter()
        .rev()
        .map(|job| {
            let mut entry = HistoryEntry {
                job_id: job.job_id.clone(),
                pass_rate: job.pass_rate,
                total: job.total,
                passed: job.passed,
                failed: job.failed,
                adjusted_pass_rate: None,
                adjusted_passed: None,
                excluded_passed_flaky_count: None,
            };
            if exclude_flaky {
                let excluded = flaky_counts.get(&job.job_id).copied().unwrap_or(0);
                let adjusted_passed = job.passed - excluded;
                entry.adjusted_passed = Some(adjusted_passed);
                entry.adjusted_pass_rate = Some(rate(adjusted_passed, job.total));
                entry.excluded_passed_flaky_count = Some(excluded);
            }
            entry
        })
        .collect();

    let adjusted_stats = if exclude_flaky && !flaky_keys.is_empty() {
        let excluded = flaky_counts.get(&selected).copied().unwrap_or(0);
        Some(adjusted(&selected_stats, excluded))
    } else {
        None
    };

    Ok(Some(DashboardSummary {
        release: release.to_string(),
        module: ALL_MODULES_IDENTIFIER.to_string(),
        summary: SummaryStats {
            total_jobs: parent_ids.len() as i64,
            latest_job: LatestJobStats {
                job_id: selected,
                total: selected_stats.total,
                passed: selected_stats.passed,
                failed: selected_stats.failed,
                skipped: selected_stats.skipped,
                pass_rate: rate(selected_stats.passed, selected_stats.total),
            },
            total_tests: selected_stats.total,
            average_pass_rate: rate(selected_stats.passed, selected_stats.total),
            flaky_by_priority: totals.flaky_by_priority,
            passed_flaky_by_priority: totals.passed_flaky_by_priority,
            new_failures_by_priority: totals.new_failures_by_priority,
            total_flaky: totals.total_flaky,
            total_passed_flaky: totals.total_passed_flaky,
            total_new_failures: totals.total_new_failures,
            adjusted_stats,
        },
        recent_jobs,
        pass_rate_history,
        module_breakdown: Some(module_breakdown),
    }))
}

/// The module a test key belongs to, derived from its file-path component.
fn key_module(test_key: &str) -> Option<&str> {
    let file_path = test_key.split("::").next()?;
    extract_module_from_path(file_path)
}

async fn passed_flaky_keys_in_jobs(
    pool: &SqlitePool,
    job_pks: &[i64],
    flaky_keys: &HashSet<String>,
) -> anyhow::Result<Vec<String>> {
    if flaky_keys.is_empty() {
        return Ok(Vec::new());
    }
    Ok(test_results::passed_keys_for_jobs(job_pks, None, pool)
        .await?
        .into_iter()
        .map(|(_, key)| key)
        .filter(|key| flaky_keys.contains(key))
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PriorityStat {
    pub priority: String,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_passed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_passed_flaky_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<PreviousStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_pass_rate: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviousStat {
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
}

/// Per-priority statistics of one parent build, optionally compared against
/// the previous parent and adjusted for passed flaky tests.
pub async fn priority_stats(
    pool: &SqlitePool,
    release: &str,
    module: &str,
    parent_job_id: &str,
    compare: bool,
    exclude_flaky: bool,
    window: usize,
) -> anyhow::Result<Option<Vec<PriorityStat>>> {
    let all_jobs = fetch_module_jobs(pool, release, module, None).await?;
    let (groups, parent_ids) = group_by_parent(&all_jobs);
    let Some(members) = groups.get(parent_job_id) else {
        return Ok(None);
    };
    let module_filter = (module != ALL_MODULES_IDENTIFIER).then_some(module);
    let job_pks: Vec<i64> = members.iter().map(|j| j.job.id).collect();

    let by_priority =
        test_results::stats_by_priority_for_jobs(&job_pks, module_filter, pool).await?;

    // Per-priority passed-flaky counts within this parent.
    let mut excluded_by_priority: HashMap<String, i64> = HashMap::new();
    if exclude_flaky {
        let flaky_priority_by_key = if module == ALL_MODULES_IDENTIFIER {
            let mut merged: HashMap<String, String> = HashMap::new();
            for module in test_results::distinct_testcase_modules(release, pool).await? {
                let summary =
                    dashboard_failure_summary(pool, release, &module, true, window).await?;
                merged.extend(summary.flaky_priority_by_key);
            }
            merged
        } else {
            dashboard_failure_summary(pool, release, module, true, window)
                .await?
                .flaky_priority_by_key
        };
        for (_, key) in test_results::passed_keys_for_jobs(&job_pks, module_filter, pool).await? {
            if let Some(priority) = flaky_priority_by_key.get(&key) {
                *excluded_by_priority.entry(priority.clone()).or_insert(0) += 1;
            }
        }
    }

    // Previous parent for comparison, one step older in the ordering.
    let mut previous_by_priority: HashMap<String, JobStats> = HashMap::new();
    if compare {
        let position = parent_ids.iter().position(|id| id == parent_job_id);
        if let Some(previous_id) = position.and_then(|idx| parent_ids.get(idx + 1)) {
            let previous_pks: Vec<i64> = groups[previous_id].iter().map(|j| j.job.id).collect();
            previous_by_priority =
                test_results::stats_by_priority_for_jobs(&previous_pks, module_filter, pool)
                    .await?;
        }
    }

    let mut rows = Vec::new();
    for priority in PRIORITY_LEVELS {
        let Some(stats) = by_priority.get(priority) else {
            continue;
        };
        let pass_rate = rate(stats.passed, stats.total);
        let mut row = PriorityStat {
            priority: priority.to_string(),
            total: stats.total,
            passed: stats.passed,
            failed: stats.failed,
            skipped: stats.skipped,
            pass_rate,
            adjusted_passed: None,
            adjusted_pass_rate: None,
            excluded_passed_flaky_count: None,
            previous: None,
            delta_pass_rate: None,
        };
        if exclude_flaky {
            let excluded = excluded_by_priority.get(priority).copied().unwrap_or(0);
            let adjusted_passed = stats.passed - excluded;
            row.adjusted_passed = Some(adjusted_passed);
            row.adjusted_pass_rate = Some(rate(adjusted_passed, stats.total));
            row.excluded_passed_flaky_count = Some(excluded);
        }
        if let Some(previous) = previous_by_priority.get(priority) {
            let previous_rate = rate(previous.passed, previous.total);
            row.previous = Some(PreviousStat {
                total: previous.total,
                passed: previous.passed,
                failed: previous.failed,
                skipped: previous.skipped,
                pass_rate: previous_rate,
            });
            row.delta_pass_rate = Some(round2(pass_rate - previous_rate));
        }
        rows.push(row);
    }

    Ok(Some(rows))
}
