use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"VER:\s*(\d+\.\d+\.\d+\.\d+)").unwrap();
}

/// Composite logical identity of a test, shared by the run log, JUnit XML,
/// and trend analysis.
pub fn test_key(file_path: &str, class_name: &str, test_name: &str) -> String {
    format!("{file_path}::{class_name}::{test_name}")
}

/// Strip a parameterization suffix: `test_foo[Hub]` -> `test_foo`.
/// Metadata joins always use the normalized form; persisted results keep the
/// parameterized name.
pub fn normalize_test_name(test_name: &str) -> &str {
    match test_name.find('[') {
        Some(idx) => &test_name[..idx],
        None => test_name,
    }
}

/// Derive the authoritative module of a test from its file path, following
/// `data_plane/tests/<module>/...`. Jenkins job modules are unreliable (a job
/// may execute tests living in another module's tree), so analytics groups by
/// this value.
pub fn extract_module_from_path(file_path: &str) -> Option<&str> {
    let mut parts = file_path.split('/');
    if parts.next() != Some("data_plane") || parts.next() != Some("tests") {
        return None;
    }
    parts.next().filter(|m| !m.is_empty())
}

/// Normalize a build-map job key to a module name:
/// `BUSINESS_POLICY_ESXI` -> `business_policy`.
pub fn normalize_module_name(job_key: &str) -> String {
    let normalized = job_key.to_ascii_lowercase().replace('-', "_");
    for suffix in ["_esxi", "_module_esxi", "_module"] {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    normalized
}

/// Map a four-part build version onto its release line: `6.4.2.0` -> `6.4`.
/// A value already in `X.Y` form maps to itself.
pub fn map_version_to_release(version: &str) -> Option<String> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() >= 2 {
        Some(format!("{}.{}", parts[0], parts[1]))
    } else {
        None
    }
}

/// Extract `X.Y.Z.W` from a build's displayName, e.g.
/// `REL: Release_7.0 | VER: 7.0.0.0 | MOD: FULL-RUN`.
pub fn extract_version_from_title(title: &str) -> Option<String> {
    VERSION_RE
        .captures(title)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(test_key("a.py", "C", "t1"), "a.py::C::t1");
    }

    #[test]
    fn normalization_strips_parameters() {
        assert_eq!(normalize_test_name("test_foo[Hub]"), "test_foo");
        assert_eq!(normalize_test_name("test_foo[a][b]"), "test_foo");
        assert_eq!(normalize_test_name("test_bar"), "test_bar");
    }

    #[test]
    fn module_from_path() {
        assert_eq!(
            extract_module_from_path("data_plane/tests/business_policy/pbnat/test.py"),
            Some("business_policy")
        );
        assert_eq!(
            extract_module_from_path("data_plane/tests/routing/bgp/test.py"),
            Some("routing")
        );
        assert_eq!(extract_module_from_path("tests/unit/test.py"), None);
        assert_eq!(extract_module_from_path(""), None);
    }

    #[test]
    fn module_name_normalization() {
        assert_eq!(normalize_module_name("BUSINESS_POLICY_ESXI"), "business_policy");
        assert_eq!(normalize_module_name("ROUTING_MODULE_ESXI"), "routing");
        assert_eq!(normalize_module_name("QOS_MODULE"), "qos");
        assert_eq!(normalize_module_name("HA-FAILOVER"), "ha_failover");
    }

    #[test]
    fn version_routing() {
        assert_eq!(map_version_to_release("6.4.2.0").as_deref(), Some("6.4"));
        assert_eq!(map_version_to_release("7.0").as_deref(), Some("7.0"));
        assert_eq!(map_version_to_release("   "), None);
        assert_eq!(map_version_to_release("7"), None);
    }

    #[test]
    fn version_from_title() {
        let title = "REL: Release_7.0 | VER: 7.0.0.0 | MOD: FULL-RUN | PRIO: ALL | master";
        assert_eq!(extract_version_from_title(title).as_deref(), Some("7.0.0.0"));
        assert_eq!(extract_version_from_title("no version here"), None);
    }
}
