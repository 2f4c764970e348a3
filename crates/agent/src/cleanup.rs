use std::path::Path;

/// Delete a job's downloaded artifact tree once its contents are imported,
/// then prune up to two levels of now-empty parents (module, release).
pub fn cleanup_artifacts(logs_base: &Path, release: &str, module: &str, job_id: &str) -> bool {
    let job_dir = logs_base.join(release).join(module).join(job_id);
    if !job_dir.exists() {
        tracing::warn!(dir = %job_dir.display(), "cleanup: directory does not exist");
        return false;
    }

    if let Err(err) = std::fs::remove_dir_all(&job_dir) {
        tracing::error!(dir = %job_dir.display(), %err, "failed to clean up artifacts");
        return false;
    }
    tracing::info!(release, module, job_id, "cleaned up artifacts");

    let mut dir = job_dir.parent().map(Path::to_path_buf);
    for _ in 0..2 {
        let Some(current) = dir else { break };
        match std::fs::read_dir(&current) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    if std::fs::remove_dir(&current).is_err() {
                        break;
                    }
                    dir = current.parent().map(Path::to_path_buf);
                } else {
                    break;
                }
            }
            _ => break,
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn removes_job_dir_and_empty_parents() {
        let base = tempfile::tempdir().unwrap();
        let job_dir = base.path().join("7.0/routing/101");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join("x.order.txt"), "log").unwrap();

        assert!(cleanup_artifacts(base.path(), "7.0", "routing", "101"));
        assert!(!job_dir.exists());
        // Empty module and release directories go too.
        assert!(!base.path().join("7.0/routing").exists());
        assert!(!base.path().join("7.0").exists());
        assert!(base.path().exists());
    }

    #[test]
    fn keeps_parents_with_other_jobs() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("7.0/routing/101")).unwrap();
        std::fs::create_dir_all(base.path().join("7.0/routing/102")).unwrap();

        assert!(cleanup_artifacts(base.path(), "7.0", "routing", "101"));
        assert!(!base.path().join("7.0/routing/101").exists());
        assert!(base.path().join("7.0/routing/102").exists());
    }

    #[test]
    fn missing_dir_reports_failure() {
        let base = tempfile::tempdir().unwrap();
        assert!(!cleanup_artifacts(base.path(), "7.0", "routing", "999"));
    }
}
