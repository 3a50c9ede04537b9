//! Pool-specific allocation strategies.
//!
//! SAFETY JUSTIFICATION: raw `mmap`/`munmap`/`malloc`/`free` calls have no safe alternative —
//! they are the only way to obtain memory mapped `MAP_ANONYMOUS | MAP_SHARED` so that it
//! remains valid and identically addressed in every process forked from the one that
//! allocated it.

use crate::{MemoryError, MemoryHeader, MemoryPool};

/// Round `size` up to the next whole page.
pub fn page_align(size: u32) -> u32 {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u32;
    (size + page_size - 1) & !(page_size - 1)
}

pub(crate) fn allocate(user_size: u32, pool: MemoryPool) -> Result<*mut MemoryHeader, MemoryError> {
    let total_size = user_size as usize + std::mem::size_of::<MemoryHeader>();

    let hdr = match pool {
        MemoryPool::Local => {
            // SAFETY: total_size is non-zero (user_size checked by get_memory); malloc's
            // return value is checked for null before use.
            let raw = unsafe { libc::malloc(total_size) };
            if raw.is_null() {
                return Err(MemoryError::AllocationFailed(user_size, pool));
            }
            raw as *mut MemoryHeader
        }
        MemoryPool::InitShared => {
            let mapped_len = page_align(total_size as u32) as usize;
            // SAFETY: fixed set of valid flags/prot for an anonymous shared mapping; return
            // value is checked against MAP_FAILED, not null, per mmap(2).
            let raw = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    mapped_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_ANONYMOUS | libc::MAP_SHARED,
                    -1,
                    0,
                )
            };
            if raw == libc::MAP_FAILED {
                return Err(MemoryError::AllocationFailed(user_size, pool));
            }
            let hdr = raw as *mut MemoryHeader;
            // Stash the mapped length so munmap can be given the right size on release.
            unsafe {
                (*hdr).private = mapped_len;
            }
            hdr
        }
        MemoryPool::RuntimeShared => {
            // No EM-ODP event pool in this reimplementation: draw runtime-shared blocks
            // from the same anonymous-mmap path as InitShared, but — unlike InitShared —
            // they are genuinely munmap'd back on refcount zero (see release() below).
            let mapped_len = page_align(total_size as u32) as usize;
            let raw = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    mapped_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_ANONYMOUS | libc::MAP_SHARED,
                    -1,
                    0,
                )
            };
            if raw == libc::MAP_FAILED {
                return Err(MemoryError::AllocationFailed(user_size, pool));
            }
            let hdr = raw as *mut MemoryHeader;
            unsafe {
                (*hdr).private = mapped_len;
            }
            hdr
        }
    };

    Ok(hdr)
}

pub(crate) fn release(hdr: *mut MemoryHeader) -> Result<(), MemoryError> {
    let pool = unsafe { (*hdr).pool };
    match pool {
        MemoryPool::Local => {
            // SAFETY: hdr was returned by a prior malloc() of the same allocation.
            unsafe { libc::free(hdr as *mut libc::c_void) };
        }
        MemoryPool::InitShared => {
            let private = unsafe { (*hdr).private };
            tracing::warn!(ptr = ?hdr, "attempted to release init-shared memory — never valid at runtime");
            // Unmap in the current process anyway so a test exercising this path does not
            // leak; other processes sharing the mapping are unaffected.
            unsafe {
                libc::munmap(hdr as *mut libc::c_void, private);
            }
        }
        MemoryPool::RuntimeShared => {
            let private = unsafe { (*hdr).private };
            // SAFETY: private holds the exact mapped_len passed to mmap in allocate().
            unsafe {
                libc::munmap(hdr as *mut libc::c_void, private);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_align_rounds_up() {
        let aligned = page_align(1);
        assert!(aligned >= 1);
        assert_eq!(aligned % page_align(1), 0);
    }
}
