//! System V shared memory segments keyed by small integers.
//!
//! The host creates segments with exclusive-create semantics and hands the
//! integer key to the worker process, which attaches by key. Keys travel
//! over the worker's command line and inside control messages, which is why
//! this module uses the keyed System V API rather than name-based POSIX
//! `shm_open`.

use std::io;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::ChannelError;

/// Key counter for fresh segments.
///
/// Keys are never reused within a run; exclusive creation skips keys that
/// some other process (or a leaked segment from an earlier run) still holds.
static NEXT_KEY: AtomicI32 = AtomicI32::new(1);

/// Upper bound on the exclusive-create probe before giving up.
const KEY_SEARCH_LIMIT: u32 = 1 << 14;

/// A mapped System V shared memory segment.
///
/// The creator owns the segment and marks it for deletion on drop; attached
/// peers only detach their mapping. Deletion takes effect once the last
/// attachment is gone, so a worker holding a stale mapping keeps it valid
/// until it detaches.
pub struct SharedSegment {
    key: i32,
    id: i32,
    ptr: NonNull<u8>,
    size: usize,
    owner: bool,
}

impl SharedSegment {
    /// Allocate a fresh segment of exactly `size` bytes under a new key.
    #[allow(unsafe_code)]
    pub fn create(size: usize) -> Result<Self, ChannelError> {
        for _ in 0..KEY_SEARCH_LIMIT {
            let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
            let id = unsafe { libc::shmget(key, size, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
            if id == -1 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EEXIST) {
                    continue;
                }
                return Err(ChannelError::AllocationFailed(err));
            }
            let ptr = map(id).map_err(|source| {
                unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
                ChannelError::AttachFailed { key, source }
            })?;
            return Ok(Self {
                key,
                id,
                ptr,
                size,
                owner: true,
            });
        }
        Err(ChannelError::AllocationFailed(io::Error::from_raw_os_error(
            libc::EEXIST,
        )))
    }

    /// Map an existing segment created by the peer.
    #[allow(unsafe_code)]
    pub fn attach(key: i32) -> Result<Self, ChannelError> {
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            return Err(ChannelError::NotFound {
                key,
                source: io::Error::last_os_error(),
            });
        }

        let mut stat = unsafe { mem::zeroed::<libc::shmid_ds>() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) } == -1 {
            return Err(ChannelError::AttachFailed {
                key,
                source: io::Error::last_os_error(),
            });
        }

        let ptr = map(id).map_err(|source| ChannelError::AttachFailed { key, source })?;
        Ok(Self {
            key,
            id,
            ptr,
            size: stat.shm_segsz as usize,
            owner: false,
        })
    }

    /// The key a peer needs to attach this segment.
    pub fn key(&self) -> i32 {
        self.key
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

#[allow(unsafe_code)]
fn map(id: i32) -> io::Result<NonNull<u8>> {
    let ptr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
    if ptr as isize == -1 {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

impl Drop for SharedSegment {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.ptr.as_ptr().cast());
            if self.owner {
                // Deletion is deferred by the kernel until the last peer
                // detaches.
                libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut());
            }
        }
    }
}

// Segments are explicitly designed to be shared between processes; all
// synchronization happens in the layers above.
#[allow(unsafe_code)]
unsafe impl Send for SharedSegment {}
#[allow(unsafe_code)]
unsafe impl Sync for SharedSegment {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn test_create_attach_roundtrip() {
        let size = 4096;
        let creator = SharedSegment::create(size).expect("create");
        assert_eq!(creator.size(), size);
        assert!(creator.key() > 0);

        unsafe {
            creator.as_ptr().write(42);
            creator.as_ptr().add(100).write(123);
        }

        let reader = SharedSegment::attach(creator.key()).expect("attach");
        assert_eq!(reader.size(), size);
        unsafe {
            assert_eq!(reader.as_ptr().read(), 42);
            assert_eq!(reader.as_ptr().add(100).read(), 123);
        }
    }

    #[test]
    fn test_attach_unknown_key_fails() {
        // Keys from the counter are small positive integers; this one is
        // far outside the range any test run allocates.
        let result = SharedSegment::attach(0x7f00_1234);
        assert!(matches!(result, Err(ChannelError::NotFound { .. })));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = SharedSegment::create(128).expect("create a");
        let b = SharedSegment::create(128).expect("create b");
        assert_ne!(a.key(), b.key());
    }
}
