//! Core-mask mapper: an immutable, process-wide array indexed by `coreMask - 1` yielding a
//! reusable scheduling-group handle. Grounded on
//! `original_source/src/platform/components/cores/cores.c`'s `MapCoreMaskToQueueGroup`.

use std::sync::OnceLock;

/// Opaque handle to a scheduling/queue group covering some subset of physical cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreGroupHandle(pub(crate) u32);

static CORE_GROUP_MAP: OnceLock<Vec<CoreGroupHandle>> = OnceLock::new();

/// Build the core-group map for `core_count` physical cores. Must be called exactly once,
/// before fork, from the main dispatcher.
pub fn init_core_group_map(core_count: usize) {
    let groups = (0..(1usize << core_count))
        .map(|mask| CoreGroupHandle(mask as u32))
        .collect();
    let _ = CORE_GROUP_MAP.set(groups);
}

/// Map a core mask (1-based bit per physical core) to its scheduling-group handle.
///
/// # Panics
/// Panics if called before [`init_core_group_map`], or if `mask` is zero — a zero mask
/// names no core and is a programming violation in the caller.
pub fn map_core_mask_to_queue_group(mask: u32) -> CoreGroupHandle {
    assert!(mask != 0, "core mask must not be zero");
    let map = CORE_GROUP_MAP
        .get()
        .expect("core group map not initialized");
    map[(mask as usize) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_init() {
        INIT.call_once(|| init_core_group_map(4));
    }

    #[test]
    fn mask_maps_to_stable_handle() {
        ensure_init();
        let a = map_core_mask_to_queue_group(0b1111);
        let b = map_core_mask_to_queue_group(0b1111);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic]
    fn zero_mask_panics() {
        ensure_init();
        map_core_mask_to_queue_group(0);
    }
}
