//! Reference-counted shared memory pools.
//!
//! Three pools back every allocation handed out by the platform: `Local` (process-private,
//! backed by the system allocator), `InitShared` (page-backed, mapped `MAP_ANONYMOUS |
//! MAP_SHARED` before fork so every core's process sees the same pages, never released at
//! runtime), and `RuntimeShared` (refcounted, released back to the pool at refcount zero).
//!
//! No unsafe pointer arithmetic leaks past this module's boundary: callers only ever see a
//! [`MemoryHandle`], never the header or the raw pointer underneath it.

mod pools;

use std::sync::atomic::{AtomicU32, Ordering};

pub use pools::page_align;

/// Magic tag identifying a valid allocation header.
const SHARED_MEMORY_MAGIC: u32 = 0x008E_8041;

/// Which pool a block of memory was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPool {
    /// Process-private, not shared across the fork boundary.
    Local,
    /// Page-backed, shared, allocated before fork. Never released at runtime.
    InitShared,
    /// Refcounted, released back to the platform-wide pool at refcount zero.
    RuntimeShared,
}

#[derive(thiserror::Error, Debug)]
pub enum MemoryError {
    #[error("tried allocating zero bytes")]
    ZeroSizeAllocation,
    #[error("allocation of {0} bytes from pool {1:?} failed")]
    AllocationFailed(u32, MemoryPool),
    #[error("memory header magic mismatch at {0:p} — pointer did not originate from GetMemory")]
    BadMagic(*const ()),
}

/// Header immediately preceding every allocation, 8-byte aligned per the wire-compatible
/// layout shared across processes.
#[repr(C, align(8))]
struct MemoryHeader {
    magic: u32,
    references: AtomicU32,
    pool: MemoryPool,
    /// Pool-specific payload: page count for `InitShared`, unused otherwise.
    private: usize,
}

/// A handle to a shared-memory allocation. Dropping this handle does **not** release the
/// memory — callers must call [`put`] explicitly, mirroring the C API's manual refcounting
/// (the platform never assumes Rust ownership discipline applies across the fork boundary).
#[derive(Debug)]
pub struct MemoryHandle {
    ptr: *mut u8,
    len: u32,
}

unsafe impl Send for MemoryHandle {}

impl MemoryHandle {
    /// Raw pointer to the usable region (just past the header).
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn header(&self) -> &MemoryHeader {
        unsafe { &*(self.ptr as *const MemoryHeader).offset(-1) }
    }
}

/// Allocate `size` bytes from `pool`, with the reference counter initialized to one.
pub fn get_memory(size: u32, pool: MemoryPool) -> Result<MemoryHandle, MemoryError> {
    if size == 0 {
        tracing::warn!("GetMemory: tried allocating zero bytes");
        return Err(MemoryError::ZeroSizeAllocation);
    }

    let hdr = pools::allocate(size, pool)?;
    unsafe {
        (*hdr).magic = SHARED_MEMORY_MAGIC;
        (*hdr).pool = pool;
        (*hdr).references = AtomicU32::new(1);
    }

    let ptr = unsafe { (hdr as *mut u8).add(std::mem::size_of::<MemoryHeader>()) };
    Ok(MemoryHandle { ptr, len: size })
}

/// Increment the reference counter of a shared-memory block. Mirrors `RefMemory`: never
/// resurrects a block whose count has already reached zero (that would be a use-after-free
/// on the caller's part, not something this function can fix).
pub fn ref_memory(handle: &MemoryHandle) -> Result<(), MemoryError> {
    let hdr = handle.header();
    if hdr.magic != SHARED_MEMORY_MAGIC {
        return Err(MemoryError::BadMagic(handle.ptr as *const ()));
    }
    hdr.references.fetch_add(1, Ordering::AcqRel);
    Ok(())
}

/// Decrement the reference counter and free the memory if it reaches zero.
///
/// spec.md §3's shared-memory invariant classes a refcount underflow as framework
/// inconsistency, not resource exhaustion — it means some caller's `Get`/`Ref`/`Put` chain
/// is already broken, an invariant the rest of the platform assumes holds. This crate sits
/// below `platform-kernel` in the workspace's dependency graph (`platform-kernel` depends
/// on it, not the reverse), so it cannot call `platform_kernel::exception::raise_fatal`
/// without a cycle; it reproduces the same banner-then-abort shape locally instead.
pub fn put_memory(handle: MemoryHandle) -> Result<(), MemoryError> {
    let hdr_ptr = unsafe { (handle.ptr as *mut MemoryHeader).offset(-1) };
    let hdr = unsafe { &*hdr_ptr };
    if hdr.magic != SHARED_MEMORY_MAGIC {
        return Err(MemoryError::BadMagic(handle.ptr as *const ()));
    }

    let prev = hdr.references.fetch_sub(1, Ordering::AcqRel);
    if prev == 0 {
        tracing::error!(ptr = ?handle.ptr, "FATAL EXCEPTION RAISED from put_memory: reference count underflow");
        std::process::abort();
    }
    if prev == 1 {
        pools::release(hdr_ptr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_memory_rejects_zero_size() {
        assert!(matches!(
            get_memory(0, MemoryPool::Local),
            Err(MemoryError::ZeroSizeAllocation)
        ));
    }

    #[test]
    fn local_pool_round_trip() {
        let handle = get_memory(64, MemoryPool::Local).unwrap();
        assert_eq!(handle.len(), 64);
        unsafe {
            std::ptr::write_bytes(handle.as_ptr(), 0xAB, 64);
        }
        put_memory(handle).unwrap();
    }

    #[test]
    fn ref_then_double_put_frees_once() {
        let handle = get_memory(32, MemoryPool::Local).unwrap();
        ref_memory(&handle).unwrap();
        // References is now 2. First put should not free; second should.
        let hdr_ptr = handle.ptr as *mut MemoryHeader;
        let refs_before = unsafe { (*hdr_ptr.offset(-1)).references.load(Ordering::Acquire) };
        assert_eq!(refs_before, 2);

        let second = MemoryHandle {
            ptr: handle.ptr,
            len: handle.len,
        };
        put_memory(handle).unwrap();
        put_memory(second).unwrap();
    }

    #[test]
    fn init_shared_pool_allocates_page_aligned() {
        let handle = get_memory(10, MemoryPool::InitShared).unwrap();
        assert_eq!(handle.len(), 10);
        // Never released at runtime in the real platform; we leak intentionally here to
        // match that discipline rather than calling put_memory.
        std::mem::forget(handle);
    }
}
