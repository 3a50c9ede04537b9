//! Application library loading (spec.md §6 `MENABREA_APP_LIST`). Grounded on
//! `original_source/src/platform/components/startup/load_applications.c`'s
//! `LoadApplicationLibraries`/`LoadLibrary`: each colon-separated path (already tokenized by
//! `platform_config::app_list_from_env`) is `dlopen`ed, and four well-known symbols are
//! resolved from it in a fixed order, bailing on the first missing one. Built on
//! `libloading` rather than raw `dlfcn.h` FFI — precedent:
//! `other_examples/manifests/Alb-O-xeno`'s `Cargo.toml` pulls in the same crate for the same
//! purpose (new dependency, noted in DESIGN.md).

use libloading::{Library, Symbol};

const GLOBAL_INIT_SYMBOL: &[u8] = b"ApplicationGlobalInit\0";
const LOCAL_INIT_SYMBOL: &[u8] = b"ApplicationLocalInit\0";
const LOCAL_EXIT_SYMBOL: &[u8] = b"ApplicationLocalExit\0";
const GLOBAL_EXIT_SYMBOL: &[u8] = b"ApplicationGlobalExit\0";

pub type GlobalInitFn = unsafe extern "C" fn();
pub type LocalInitFn = unsafe extern "C" fn(core: i32);
pub type LocalExitFn = unsafe extern "C" fn(core: i32);
pub type GlobalExitFn = unsafe extern "C" fn();

/// A loaded application library. The `Library` handle is kept alive for the process
/// lifetime — mirroring `UnloadApplicationLibraries`, which only ever frees the bookkeeping
/// struct and deliberately never calls `dlclose`, letting the OS reclaim the mapping at
/// process exit.
pub struct AppLib {
    pub name: String,
    library: Library,
    pub global_init: GlobalInitFn,
    pub local_init: LocalInitFn,
    pub local_exit: LocalExitFn,
    pub global_exit: GlobalExitFn,
}

#[derive(thiserror::Error, Debug)]
pub enum AppLibError {
    #[error("failed to open library {0}: {1}")]
    Open(String, #[source] libloading::Error),
    #[error("failed to resolve symbol {symbol} in library {name}: {source}")]
    Symbol {
        name: String,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
}

fn load_library(name: &str) -> Result<AppLib, AppLibError> {
    // SAFETY: `Library::new` invokes `dlopen`, which can run arbitrary library
    // constructors — no more or less safe than the original's own `dlopen` call, and only
    // ever invoked (before any dispatcher thread starts) against operator-supplied paths
    // from `MENABREA_APP_LIST`.
    let library = unsafe { Library::new(name) }.map_err(|e| AppLibError::Open(name.to_string(), e))?;

    // SAFETY: each raw function pointer is copied out of its `Symbol` before the temporary
    // is dropped; `library` itself outlives all four pointers since it is stored alongside
    // them in the returned `AppLib` for the remainder of the process.
    let global_init: GlobalInitFn = unsafe {
        let sym: Symbol<'_, GlobalInitFn> = library.get(GLOBAL_INIT_SYMBOL).map_err(|e| {
            AppLibError::Symbol { name: name.to_string(), symbol: "ApplicationGlobalInit", source: e }
        })?;
        *sym
    };
    let local_init: LocalInitFn = unsafe {
        let sym: Symbol<'_, LocalInitFn> = library.get(LOCAL_INIT_SYMBOL).map_err(|e| {
            AppLibError::Symbol { name: name.to_string(), symbol: "ApplicationLocalInit", source: e }
        })?;
        *sym
    };
    let local_exit: LocalExitFn = unsafe {
        let sym: Symbol<'_, LocalExitFn> = library.get(LOCAL_EXIT_SYMBOL).map_err(|e| {
            AppLibError::Symbol { name: name.to_string(), symbol: "ApplicationLocalExit", source: e }
        })?;
        *sym
    };
    let global_exit: GlobalExitFn = unsafe {
        let sym: Symbol<'_, GlobalExitFn> = library.get(GLOBAL_EXIT_SYMBOL).map_err(|e| {
            AppLibError::Symbol { name: name.to_string(), symbol: "ApplicationGlobalExit", source: e }
        })?;
        *sym
    };

    Ok(AppLib { name: name.to_string(), library, global_init, local_init, local_exit, global_exit })
}

/// `LoadApplicationLibraries`. Libraries that fail to load (missing file, missing symbol)
/// are logged and skipped rather than aborting the whole platform, matching the original's
/// `LoadLibrary` return-code check, which only counts successes into the final total.
pub fn load_application_libraries(names: &[String]) -> Vec<AppLib> {
    let mut loaded = Vec::new();
    for name in names {
        tracing::debug!(name, "trying to load application library");
        match load_library(name) {
            Ok(lib) => loaded.push(lib),
            Err(err) => tracing::error!(%err, "failed to load application library"),
        }
    }
    tracing::info!(count = loaded.len(), "loaded application libraries");
    loaded
}

/// `UnloadApplicationLibraries`. Dropping the `Vec` would normally drop every `Library`
/// handle and `dlclose` it; the original never does this, relying on the OS to unmap at
/// process exit, so each handle is leaked deliberately via `mem::forget` to preserve that.
pub fn unload_application_libraries(libs: Vec<AppLib>) {
    for lib in libs {
        std::mem::forget(lib.library);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_a_nonexistent_library_yields_no_entries() {
        let loaded = load_application_libraries(&["/nonexistent/libdoesnotexist.so".to_string()]);
        assert!(loaded.is_empty());
    }

    #[test]
    fn empty_list_loads_nothing() {
        assert!(load_application_libraries(&[]).is_empty());
    }
}
