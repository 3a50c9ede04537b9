//! Recovery-actions script (spec.md §6, §4.14). Grounded on
//! `original_source/src/platform/components/exception/recovery.c`: any disgraceful exit
//! path appends a recovery command to a well-known script file; a graceful shutdown removes
//! the file so nothing runs against it on the next boot.

use std::fs::OpenOptions;
use std::io::Write;

pub const RECOVERY_ACTIONS_SCRIPT_PATH: &str = "/tmp/.recovery_actions";

#[derive(thiserror::Error, Debug)]
pub enum RecoveryError {
    #[error("failed to open recovery actions script: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to write recovery action: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to remove recovery actions script: {0}")]
    Remove(#[source] std::io::Error),
}

/// `OnDisgracefulShutdown`: append one recovery command line to the script, creating it if
/// it does not already exist.
pub fn on_disgraceful_shutdown(cmd: &str) -> Result<(), RecoveryError> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(RECOVERY_ACTIONS_SCRIPT_PATH)
        .map_err(RecoveryError::Open)?;
    writeln!(file, "{cmd}").map_err(RecoveryError::Write)
}

/// `DeclareShutdownGraceful`: remove the script. A missing file is not an error — it means
/// no recovery action was ever recorded for this run.
pub fn declare_shutdown_graceful() -> Result<(), RecoveryError> {
    match std::fs::remove_file(RECOVERY_ACTIONS_SCRIPT_PATH) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecoveryError::Remove(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The script path is a fixed filesystem location; serialize tests that touch it.
    static FS_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn append_then_graceful_shutdown_removes_the_file() {
        let _guard = FS_LOCK.lock().unwrap();
        let _ = std::fs::remove_file(RECOVERY_ACTIONS_SCRIPT_PATH);
        on_disgraceful_shutdown("systemctl restart menabrea.service").unwrap();
        let contents = std::fs::read_to_string(RECOVERY_ACTIONS_SCRIPT_PATH).unwrap();
        assert!(contents.contains("systemctl restart menabrea.service"));
        declare_shutdown_graceful().unwrap();
        assert!(!std::path::Path::new(RECOVERY_ACTIONS_SCRIPT_PATH).exists());
    }

    #[test]
    fn graceful_shutdown_on_an_already_absent_file_is_not_an_error() {
        let _guard = FS_LOCK.lock().unwrap();
        let _ = std::fs::remove_file(RECOVERY_ACTIONS_SCRIPT_PATH);
        declare_shutdown_graceful().unwrap();
    }

    #[test]
    fn repeated_disgraceful_shutdowns_append_rather_than_overwrite() {
        let _guard = FS_LOCK.lock().unwrap();
        let _ = std::fs::remove_file(RECOVERY_ACTIONS_SCRIPT_PATH);
        on_disgraceful_shutdown("action one").unwrap();
        on_disgraceful_shutdown("action two").unwrap();
        let contents = std::fs::read_to_string(RECOVERY_ACTIONS_SCRIPT_PATH).unwrap();
        assert_eq!(contents.lines().count(), 2);
        declare_shutdown_graceful().unwrap();
    }
}
