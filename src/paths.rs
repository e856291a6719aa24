//! Filesystem layout (§6), relative to the configured `DataDir`.
//!
//! The core does not use these paths itself (task execution is delegated
//! to `vmagent::VmAgent`); they are the contract the control channel,
//! the restart/cancel operations and any external log viewer agree on.

use std::path::{Path, PathBuf};

pub fn job_dir(data_dir: &Path, job_id: i64) -> PathBuf {
    data_dir.join("jobs").join(job_id.to_string())
}

pub fn step_dir(data_dir: &Path, job_id: i64, step_no: i32) -> PathBuf {
    job_dir(data_dir, job_id).join(step_no.to_string())
}

pub fn task_dir(data_dir: &Path, job_id: i64, step_no: i32, task_no: i32) -> PathBuf {
    step_dir(data_dir, job_id, step_no).join(task_no.to_string())
}

pub fn task_log_path(data_dir: &Path, job_id: i64, step_no: i32, task_no: i32) -> PathBuf {
    task_dir(data_dir, job_id, step_no, task_no).join("log")
}

pub fn task_err_path(data_dir: &Path, job_id: i64, step_no: i32, task_no: i32) -> PathBuf {
    task_dir(data_dir, job_id, step_no, task_no).join("err")
}

pub fn task_screenshot_path(data_dir: &Path, job_id: i64, step_no: i32, task_no: i32) -> PathBuf {
    task_dir(data_dir, job_id, step_no, task_no).join("screenshot.png")
}

pub fn staging_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("staging")
}

pub fn web_patch_path(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join("webpatches").join(id)
}

pub fn latest_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("latest")
}

pub fn latest_testlist_path(data_dir: &Path) -> PathBuf {
    latest_dir(data_dir).join("testlist.txt")
}

/// §4.2 restart: remove the first Step's *task* subdirectories (the Step
/// directory itself carries the patch/exe and is kept), and later Steps'
/// directories wholesale (they are pure outputs).
pub fn remove_restart_artifacts(
    data_dir: &Path,
    job_id: i64,
    first_step_no: i32,
    later_step_nos: &[i32],
) -> std::io::Result<()> {
    let first = step_dir(data_dir, job_id, first_step_no);
    if first.is_dir() {
        for entry in std::fs::read_dir(&first)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            }
        }
    }
    for no in later_step_nos {
        let dir = step_dir(data_dir, job_id, *no);
        if dir.is_dir() {
            std::fs::remove_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_paths_nest_under_job_and_step() {
        let data_dir = Path::new("/var/lib/witbot");
        assert_eq!(
            task_dir(data_dir, 7, 2, 1),
            PathBuf::from("/var/lib/witbot/jobs/7/2/1")
        );
        assert_eq!(
            task_log_path(data_dir, 7, 2, 1),
            PathBuf::from("/var/lib/witbot/jobs/7/2/1/log")
        );
    }

    #[test]
    fn remove_restart_artifacts_keeps_first_step_dir_but_clears_its_children() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path();
        let first_task = task_dir(data_dir, 1, 1, 1);
        std::fs::create_dir_all(&first_task).unwrap();
        std::fs::write(first_task.join("log"), b"x").unwrap();
        let later = step_dir(data_dir, 1, 2);
        std::fs::create_dir_all(&later).unwrap();

        remove_restart_artifacts(data_dir, 1, 1, &[2]).unwrap();

        assert!(step_dir(data_dir, 1, 1).is_dir());
        assert!(!first_task.is_dir());
        assert!(!later.is_dir());
    }
}
