use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use models::TestStatus;
use regex::Regex;

use crate::junit::parse_junit_directory;
use crate::records::ParsedTest;

lazy_static! {
    // [<setup_ip>] <STATUS> <file>::<class>::<test>
    static ref LOG_LINE_RE: Regex =
        Regex::new(r"\[([^\]]+)\]\s+(PASSED|FAILED|SKIPPED|ERROR)\s+(.+?)::(.+?)::(.+?)\s*$")
            .unwrap();
}

/// Parse one run-log line. Lines that don't match the result pattern
/// (banners, tracebacks, timing output) yield None.
pub fn parse_log_line(line: &str, topology: &str) -> Option<ParsedTest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let caps = LOG_LINE_RE.captures(line)?;

    Some(ParsedTest {
        setup_ip: caps[1].trim().to_string(),
        status: TestStatus::parse(&caps[2]),
        file_path: caps[3].trim().to_string(),
        class_name: caps[4].trim().to_string(),
        test_name: caps[5].trim().to_string(),
        topology: topology.to_string(),
        order_index: 0,
        was_rerun: false,
        rerun_still_failed: false,
        failure_message: None,
    })
}

/// Extract the topology label from a log filename.
///
/// `1767888104_bp_5s.order.txt` -> `5s`
/// `re_run_bp_others_routing.order.txt` -> `others_routing`
pub fn extract_topology(filename: &str) -> String {
    let base = filename.trim_end_matches(".order.txt");

    if base.starts_with("re_run_") {
        // re_run_bp_<topology>: the topology is everything past the third '_'.
        match base.splitn(4, '_').nth(3) {
            Some(topology) => topology.to_string(),
            None => "unknown".to_string(),
        }
    } else {
        // <timestamp>_bp_<topology>
        match base.splitn(3, '_').nth(2) {
            Some(topology) => topology.to_string(),
            None => "unknown".to_string(),
        }
    }
}

pub fn is_rerun_file(filename: &str) -> bool {
    filename.starts_with("re_run_")
}

/// Parse a single `.order.txt` file, assigning order indices from
/// `start_order_index`. A file that can't be read parses as empty.
pub fn parse_log_file(path: &Path, start_order_index: i64) -> Vec<ParsedTest> {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let topology = extract_topology(&filename);

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to read run log");
            return Vec::new();
        }
    };

    let mut order_index = start_order_index;
    let mut results = Vec::new();
    for line in contents.lines() {
        if let Some(mut result) = parse_log_line(line, &topology) {
            result.order_index = order_index;
            order_index += 1;
            results.push(result);
        }
    }
    results
}

/// Merge a main run with its rerun. The rerun's status overwrites the main
/// run's entry for the same test key, with `was_rerun` set and
/// `rerun_still_failed` when the rerun still ended FAILED or ERROR. The
/// rerun entry inherits the main run's order index so merged output keeps the
/// original execution order. Idempotent: merging the same rerun twice is a
/// no-op.
pub fn merge_with_rerun(
    main_results: Vec<ParsedTest>,
    rerun_results: Vec<ParsedTest>,
) -> Vec<ParsedTest> {
    let mut merged = main_results;
    let mut index_by_key: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, r)| (r.test_key(), idx))
        .collect();

    for mut rerun in rerun_results {
        rerun.was_rerun = true;
        rerun.rerun_still_failed = rerun.status.is_failing();

        match index_by_key.get(&rerun.test_key()) {
            Some(&idx) => {
                rerun.order_index = merged[idx].order_index;
                merged[idx] = rerun;
            }
            None => {
                index_by_key.insert(rerun.test_key(), merged.len());
                merged.push(rerun);
            }
        }
    }
    merged
}

/// Parse every run log in a job directory, merging main runs with reruns per
/// topology, then overlay failure messages from the `junit/` tree.
/// Individual unreadable files are skipped; this never fails outright.
pub fn parse_job_directory(job_path: &Path) -> Vec<ParsedTest> {
    let mut files: Vec<std::path::PathBuf> = match std::fs::read_dir(job_path) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|f| f.to_string_lossy().ends_with(".order.txt"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(err) => {
            tracing::warn!(path = %job_path.display(), %err, "failed to list job directory");
            return Vec::new();
        }
    };
    files.sort();

    // Pair main and rerun files per topology.
    let mut by_topology: HashMap<String, (Option<std::path::PathBuf>, Option<std::path::PathBuf>)> =
        HashMap::new();
    for path in files {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let slot = by_topology
            .entry(extract_topology(&filename))
            .or_default();
        if is_rerun_file(&filename) {
            slot.1 = Some(path);
        } else {
            slot.0 = Some(path);
        }
    }

    let mut topologies: Vec<String> = by_topology.keys().cloned().collect();
    topologies.sort();

    let mut all_results = Vec::new();
    for topology in topologies {
        let (main_file, rerun_file) = by_topology.remove(&topology).unwrap();
        let main_results = main_file
            .map(|p| parse_log_file(&p, 0))
            .unwrap_or_default();
        let rerun_results = rerun_file
            .map(|p| parse_log_file(&p, 0))
            .unwrap_or_default();

        if !main_results.is_empty() || !rerun_results.is_empty() {
            all_results.extend(merge_with_rerun(main_results, rerun_results));
        }
    }

    // Attach failure messages captured in the JUnit reports.
    let junit_dir = job_path.join("junit");
    if junit_dir.is_dir() {
        let failure_messages = parse_junit_directory(&junit_dir);
        for result in &mut all_results {
            if let Some(message) = failure_messages.get(&result.test_key()) {
                result.failure_message = Some(message.clone());
            }
        }
    }

    all_results
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let r = parse_log_line(
            "[10.201.93.11]  PASSED data_plane/tests/routing/bgp_test.py::TestBgp::test_basic",
            "5s",
        )
        .unwrap();
        assert_eq!(r.setup_ip, "10.201.93.11");
        assert_eq!(r.status, TestStatus::Passed);
        assert_eq!(r.file_path, "data_plane/tests/routing/bgp_test.py");
        assert_eq!(r.class_name, "TestBgp");
        assert_eq!(r.test_name, "test_basic");
        assert_eq!(r.topology, "5s");
    }

    #[test]
    fn skips_non_result_lines() {
        assert!(parse_log_line("", "5s").is_none());
        assert!(parse_log_line("collecting tests...", "5s").is_none());
        assert!(parse_log_line("[10.0.0.1] RUNNING a.py::C::t", "5s").is_none());
        // Missing the class segment.
        assert!(parse_log_line("[10.0.0.1] PASSED a.py", "5s").is_none());
    }

    #[test]
    fn accepts_unknown_status_as_error() {
        // ERROR is a first-class token; anything else fails the pattern.
        let r = parse_log_line("[10.0.0.1] ERROR a.py::C::t", "5s").unwrap();
        assert_eq!(r.status, TestStatus::Error);
    }

    #[test]
    fn topology_extraction() {
        assert_eq!(extract_topology("1767888104_bp_5s.order.txt"), "5s");
        assert_eq!(
            extract_topology("re_run_bp_others_routing.order.txt"),
            "others_routing"
        );
        assert_eq!(extract_topology("1700000000_bp_3s_ipv6.order.txt"), "3s_ipv6");
        assert_eq!(extract_topology("re_run_bp.order.txt"), "unknown");
        assert_eq!(extract_topology("bp.order.txt"), "unknown");
    }

    fn test(name: &str, status: TestStatus, order_index: i64) -> ParsedTest {
        ParsedTest {
            setup_ip: "10.0.0.1".to_string(),
            status,
            file_path: "a.py".to_string(),
            class_name: "C".to_string(),
            test_name: name.to_string(),
            topology: "5s".to_string(),
            order_index,
            was_rerun: false,
            rerun_still_failed: false,
            failure_message: None,
        }
    }

    #[test]
    fn merge_overwrites_and_flags() {
        let main = vec![
            test("t1", TestStatus::Failed, 0),
            test("t2", TestStatus::Passed, 1),
        ];
        let rerun = vec![test("t1", TestStatus::Passed, 0)];

        let merged = merge_with_rerun(main, rerun);
        assert_eq!(merged.len(), 2);

        let t1 = merged.iter().find(|r| r.test_name == "t1").unwrap();
        assert_eq!(t1.status, TestStatus::Passed);
        assert!(t1.was_rerun);
        assert!(!t1.rerun_still_failed);
        assert_eq!(t1.order_index, 0);

        let t2 = merged.iter().find(|r| r.test_name == "t2").unwrap();
        assert!(!t2.was_rerun);
    }

    #[test]
    fn merge_marks_rerun_still_failed() {
        let main = vec![test("t1", TestStatus::Failed, 7)];
        let rerun = vec![test("t1", TestStatus::Error, 0)];

        let merged = merge_with_rerun(main, rerun);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].status, TestStatus::Error);
        assert!(merged[0].was_rerun);
        assert!(merged[0].rerun_still_failed);
        // Order index inherited from the main run.
        assert_eq!(merged[0].order_index, 7);
    }

    #[test]
    fn merge_keeps_rerun_only_tests() {
        let merged = merge_with_rerun(vec![], vec![test("t9", TestStatus::Failed, 3)]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].was_rerun);
        assert_eq!(merged[0].order_index, 3);
    }

    #[test]
    fn merge_is_idempotent() {
        let main = vec![
            test("t1", TestStatus::Failed, 0),
            test("t2", TestStatus::Passed, 1),
        ];
        let rerun = vec![test("t1", TestStatus::Passed, 0)];

        let once = merge_with_rerun(main, rerun.clone());
        let twice = merge_with_rerun(once.clone(), rerun);
        assert_eq!(once, twice);
    }
}
