use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use walkdir::WalkDir;

/// Whether a testcase reported a `<failure>` or an `<error>` child.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Failure,
    Error,
}

/// Failure details captured from a JUnit `<testcase>`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
    pub text: String,
}

impl FailureInfo {
    /// Render as the message persisted onto a test result: the `message`
    /// attribute, a blank line, then the element body.
    pub fn render(&self) -> String {
        let text = self.text.trim();
        if text.is_empty() {
            self.message.trim().to_string()
        } else if self.message.is_empty() {
            text.to_string()
        } else {
            format!("{}\n\n{}", self.message, text).trim().to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuiteNode {
    #[serde(rename = "testcase", default)]
    testcases: Vec<CaseNode>,
    // pytest may emit a <testsuites> wrapper around one or more <testsuite>s.
    #[serde(rename = "testsuite", default)]
    suites: Vec<SuiteNode>,
}

#[derive(Debug, Deserialize)]
struct CaseNode {
    #[serde(rename = "@file", default)]
    file: Option<String>,
    #[serde(rename = "@classname", default)]
    classname: Option<String>,
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    failure: Option<OutcomeNode>,
    #[serde(default)]
    error: Option<OutcomeNode>,
}

#[derive(Debug, Deserialize)]
struct OutcomeNode {
    #[serde(rename = "@message", default)]
    message: Option<String>,
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

impl CaseNode {
    /// `data_plane.tests.business_policy.app_steering_test.TestAppSteering`
    /// -> `TestAppSteering`.
    fn class_tail(&self) -> &str {
        let classname = self.classname.as_deref().unwrap_or("");
        classname.rsplit('.').next().unwrap_or("")
    }

    fn test_key(&self) -> String {
        models::test_key(
            self.file.as_deref().unwrap_or(""),
            self.class_tail(),
            &self.name,
        )
    }

    fn failure_info(&self) -> Option<FailureInfo> {
        if let Some(failure) = &self.failure {
            return Some(FailureInfo {
                kind: FailureKind::Failure,
                message: failure.message.clone().unwrap_or_default(),
                text: failure.text.clone().unwrap_or_default(),
            });
        }
        if let Some(error) = &self.error {
            return Some(FailureInfo {
                kind: FailureKind::Error,
                message: error.message.clone().unwrap_or_default(),
                text: error.text.clone().unwrap_or_default(),
            });
        }
        None
    }
}

fn collect_failures(suite: &SuiteNode, failures: &mut HashMap<String, String>) {
    for case in &suite.testcases {
        if let Some(info) = case.failure_info() {
            failures.insert(case.test_key(), info.render());
        }
    }
    for nested in &suite.suites {
        collect_failures(nested, failures);
    }
}

/// Parse one JUnit XML file into a map of test key -> failure message.
/// Testcases without a failure or error are omitted.
pub fn parse_junit_xml(xml: &str) -> Result<HashMap<String, String>, quick_xml::DeError> {
    let root: SuiteNode = quick_xml::de::from_str(xml)?;
    let mut failures = HashMap::new();
    collect_failures(&root, &mut failures);
    Ok(failures)
}

/// Parse every XML file under `junit_dir`, recursively. Files that fail to
/// read or parse are logged and skipped.
pub fn parse_junit_directory(junit_dir: &Path) -> HashMap<String, String> {
    let mut all_failures = HashMap::new();

    for entry in WalkDir::new(junit_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "xml").unwrap_or(false))
    {
        let xml = match std::fs::read_to_string(entry.path()) {
            Ok(xml) => xml,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), %err, "failed to read junit XML");
                continue;
            }
        };
        match parse_junit_xml(&xml) {
            Ok(failures) => all_failures.extend(failures),
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), %err, "failed to parse junit XML");
            }
        }
    }

    all_failures
}

#[cfg(test)]
mod test {
    use super::*;

    const SUITE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuite name="pytest" errors="1" failures="1" tests="3">
  <testcase classname="data_plane.tests.routing.bgp_test.TestBgp"
            file="data_plane/tests/routing/bgp_test.py" name="test_ok" time="1.2"/>
  <testcase classname="data_plane.tests.routing.bgp_test.TestBgp"
            file="data_plane/tests/routing/bgp_test.py" name="test_bad" time="4.5">
    <failure message="AssertionError: route missing"><![CDATA[Traceback (most recent call last):
  assert route in table]]></failure>
  </testcase>
  <testcase classname="data_plane.tests.routing.bgp_test.TestBgp"
            file="data_plane/tests/routing/bgp_test.py" name="test_boom" time="0.1">
    <error message="RuntimeError: setup exploded"/>
  </testcase>
</testsuite>
"#;

    #[test]
    fn extracts_failure_and_error_messages() {
        let failures = parse_junit_xml(SUITE).unwrap();
        assert_eq!(failures.len(), 2);

        let bad = &failures["data_plane/tests/routing/bgp_test.py::TestBgp::test_bad"];
        assert!(bad.starts_with("AssertionError: route missing\n\n"));
        assert!(bad.contains("assert route in table"));

        let boom = &failures["data_plane/tests/routing/bgp_test.py::TestBgp::test_boom"];
        assert_eq!(boom, "RuntimeError: setup exploded");
    }

    #[test]
    fn handles_testsuites_wrapper() {
        let wrapped = format!("<testsuites>{}</testsuites>", SUITE.replace(r#"<?xml version="1.0" encoding="utf-8"?>"#, ""));
        let failures = parse_junit_xml(&wrapped).unwrap();
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn render_trims_and_joins() {
        let info = FailureInfo {
            kind: FailureKind::Failure,
            message: "msg".to_string(),
            text: "  body  \n".to_string(),
        };
        assert_eq!(info.render(), "msg\n\nbody");

        let no_body = FailureInfo {
            kind: FailureKind::Error,
            message: "msg".to_string(),
            text: "   ".to_string(),
        };
        assert_eq!(no_body.render(), "msg");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_junit_xml("<testsuite><testcase").is_err());
    }
}
