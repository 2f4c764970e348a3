mod bug_impact;
mod clustering;
mod summary;
mod trends;

pub use bug_impact::{
    bug_affected_tests, bug_breakdown, bug_details, AffectedTestcase, BugDetails, ModuleBugStats,
};
pub use clustering::{
    cluster_failures, clustered_failures_for_jobs, error_type, normalize_message,
    ClusteredFailures, FailureCluster,
};
pub use summary::{
    all_modules_summary, module_summary, parent_jobs, priority_stats, AdjustedStats,
    DashboardSummary, HistoryEntry, ParentJobEntry, PriorityStat, RecentJob, SummaryStats,
};
pub use trends::{
    calculate_test_trends, dashboard_failure_summary, filter_trends, FailureSummary, RerunInfo,
    TestTrend, TrendFilter,
};
