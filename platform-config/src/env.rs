//! Environment overrides (spec.md §6): `MENABREA_APP_LIST` names shared libraries to
//! `dlopen` before fork; `LOG_VERBOSE=1` raises the log level to debug. Grounded on
//! `original_source/src/platform/components/startup/load_applications.c` (the app-list
//! parsing) and `main.c`'s `InitializeLogger`.

const APP_LIST_ENV: &str = "MENABREA_APP_LIST";
const LOG_VERBOSITY_ENV: &str = "LOG_VERBOSE";

/// Colon-separated list of application library paths to `dlopen` before fork. Empty
/// entries (e.g. a trailing `:`) are skipped rather than treated as a malformed path.
pub fn app_list_from_env() -> Vec<String> {
    std::env::var(APP_LIST_ENV)
        .ok()
        .map(|raw| raw.split(':').filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

/// `true` iff `LOG_VERBOSE` is set to exactly `"1"`, matching the original's `strcmp`.
pub fn log_verbose_from_env() -> bool {
    std::env::var(LOG_VERBOSITY_ENV)
        .map(|v| v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn app_list_splits_on_colon_and_skips_empty_entries() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(APP_LIST_ENV, "libfoo.so::libbar.so:");
        assert_eq!(app_list_from_env(), vec!["libfoo.so".to_string(), "libbar.so".to_string()]);
        std::env::remove_var(APP_LIST_ENV);
    }

    #[test]
    fn missing_app_list_is_empty() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(APP_LIST_ENV);
        assert!(app_list_from_env().is_empty());
    }

    #[test]
    fn log_verbose_requires_exact_string_one() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(LOG_VERBOSITY_ENV, "1");
        assert!(log_verbose_from_env());
        std::env::set_var(LOG_VERBOSITY_ENV, "true");
        assert!(!log_verbose_from_env());
        std::env::remove_var(LOG_VERBOSITY_ENV);
        assert!(!log_verbose_from_env());
    }
}
