mod junit;
mod records;
mod runlog;

pub use junit::{parse_junit_directory, parse_junit_xml, FailureInfo, FailureKind};
pub use records::{JobSummary, ParsedTest};
pub use runlog::{
    extract_topology, is_rerun_file, merge_with_rerun, parse_job_directory, parse_log_file,
    parse_log_line,
};
