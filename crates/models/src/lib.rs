mod names;
mod settings;
mod status;

pub use names::{
    extract_module_from_path, extract_version_from_title, map_version_to_release,
    normalize_module_name, normalize_test_name, test_key,
};
pub use settings::{defaults, keys, ALL_MODULES_IDENTIFIER};
pub use status::{priority_rank, Priority, TestStatus, PRIORITY_LEVELS, UNKNOWN_PRIORITY};
