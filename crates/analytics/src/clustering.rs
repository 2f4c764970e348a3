use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracker_sql::test_results::{self, TestResultRow};

lazy_static! {
    static ref HEX_ADDR_RE: Regex = Regex::new(r"0x[0-9a-fA-F]+").unwrap();
    static ref IP_RE: Regex = Regex::new(r"\b\d{1,3}(\.\d{1,3}){3}\b").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"\b\d+\b").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref LINE_NUMBER_RE: Regex = Regex::new(r"line (\d+)").unwrap();
}

/// Mask the variable parts of a failure message so equivalent failures group
/// together: addresses, IPs and bare numbers become placeholders.
pub fn normalize_message(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let masked = HEX_ADDR_RE.replace_all(first_line, "<ADDR>");
    let masked = IP_RE.replace_all(&masked, "<IP>");
    let masked = NUMBER_RE.replace_all(&masked, "<NUM>");
    WHITESPACE_RE.replace_all(&masked, " ").into_owned()
}

/// The leading exception token: `AssertionError: ...` -> `AssertionError`.
pub fn error_type(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    match first_line.split_once(':') {
        Some((head, _)) if !head.trim().is_empty() && !head.contains(' ') => {
            head.trim().to_string()
        }
        _ => "Unknown".to_string(),
    }
}

fn extract_line_number(message: &str) -> Option<i64> {
    LINE_NUMBER_RE
        .captures(message)
        .and_then(|caps| caps[1].parse().ok())
}

fn fingerprint(error_type: &str, normalized_message: &str) -> String {
    let digest = Sha256::digest(format!("{error_type}|{normalized_message}").as_bytes());
    hex_prefix(&digest, 12)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterSignature {
    pub error_type: String,
    pub file_path: String,
    pub line_number: Option<i64>,
    pub normalized_message: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AffectedTest {
    pub test_name: String,
    pub class_name: String,
    pub file_path: String,
    pub priority: Option<String>,
    pub jenkins_topology: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureCluster {
    pub signature: ClusterSignature,
    pub count: i64,
    /// `exact` when every member carries an identical raw message; `fuzzy`
    /// when only the normalized forms agree.
    pub match_type: String,
    pub affected_tests: Vec<AffectedTest>,
    pub affected_topologies: Vec<String>,
    pub affected_priorities: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusteredFailures {
    pub clusters: Vec<FailureCluster>,
    pub summary: ClusterSummary,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterSummary {
    pub total_failures: i64,
    pub unique_clusters: i64,
}

/// Group the failures of a job set by failure signature.
pub fn cluster_failures(failures: &[TestResultRow]) -> ClusteredFailures {
    let mut groups: HashMap<(String, String), Vec<&TestResultRow>> = HashMap::new();
    for failure in failures {
        let message = failure.failure_message.as_deref().unwrap_or("Unknown error");
        let key = (error_type(message), normalize_message(message));
        groups.entry(key).or_default().push(failure);
    }

    let mut clusters: Vec<FailureCluster> = groups
        .into_iter()
        .map(|((error_type, normalized_message), members)| {
            let representative = members[0];
            let raw_message = representative
                .failure_message
                .as_deref()
                .unwrap_or("Unknown error");
            let exact = members.iter().all(|m| {
                m.failure_message.as_deref().unwrap_or("Unknown error") == raw_message
            });

            let mut affected_topologies: Vec<String> = members
                .iter()
                .filter_map(|m| m.jenkins_topology.clone())
                .collect();
            affected_topologies.sort();
            affected_topologies.dedup();

            let mut affected_priorities: Vec<String> = members
                .iter()
                .map(|m| {
                    m.priority
                        .clone()
                        .unwrap_or_else(|| models::UNKNOWN_PRIORITY.to_string())
                })
                .collect();
            affected_priorities.sort_by_key(|p| models::priority_rank(p));
            affected_priorities.dedup();

            FailureCluster {
                signature: ClusterSignature {
                    fingerprint: fingerprint(&error_type, &normalized_message),
                    file_path: representative.file_path.clone(),
                    line_number: extract_line_number(raw_message),
                    error_type,
                    normalized_message,
                },
                count: members.len() as i64,
                match_type: if exact { "exact" } else { "fuzzy" }.to_string(),
                affected_tests: members
                    .iter()
                    .map(|m| AffectedTest {
                        test_name: m.test_name.clone(),
                        class_name: m.class_name.clone(),
                        file_path: m.file_path.clone(),
                        priority: m.priority.clone(),
                        jenkins_topology: m.jenkins_topology.clone(),
                        failure_message: m.failure_message.clone(),
                    })
                    .collect(),
                affected_topologies,
                affected_priorities,
            }
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.signature.fingerprint.cmp(&b.signature.fingerprint))
    });

    ClusteredFailures {
        summary: ClusterSummary {
            total_failures: failures.len() as i64,
            unique_clusters: clusters.len() as i64,
        },
        clusters,
    }
}

/// Cluster the failures of one parent build's sub-jobs.
pub async fn clustered_failures_for_jobs(
    pool: &SqlitePool,
    job_pks: &[i64],
) -> anyhow::Result<ClusteredFailures> {
    let failures = test_results::fetch_failures_for_jobs(job_pks, pool).await?;
    Ok(cluster_failures(&failures))
}
