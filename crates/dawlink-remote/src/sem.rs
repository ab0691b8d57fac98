//! Process-shared counting semaphores stored inside shared memory.

use std::io;
use std::mem;

/// Reserved storage for one semaphore inside a shared header.
///
/// Padded to 32 bytes so the surrounding layout is identical for peers even
/// when their native `sem_t` sizes differ.
#[repr(C)]
pub struct SemCell {
    storage: [u8; 32],
}

const _: () = assert!(mem::size_of::<libc::sem_t>() <= 32);
const _: () = assert!(mem::size_of::<SemCell>() == 32);

/// Handle to a process-shared semaphore living at a fixed shared address.
///
/// The handle is a plain pointer into the shared mapping; it stays valid as
/// long as the segment holding the cell is mapped. The endpoint that
/// initialized the semaphore is responsible for destroying it.
#[derive(Clone, Copy)]
pub struct SharedSemaphore {
    sem: *mut libc::sem_t,
}

impl SharedSemaphore {
    /// Initialize the semaphore in `cell` with `initial` as its count.
    ///
    /// # Safety
    ///
    /// `cell` must point into a mapping shared by both processes, and only
    /// the master endpoint may initialize it, exactly once.
    #[allow(unsafe_code)]
    pub unsafe fn init(cell: *mut SemCell, initial: u32) -> io::Result<Self> {
        let sem = cell.cast::<libc::sem_t>();
        if unsafe { libc::sem_init(sem, 1, initial) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem })
    }

    /// Adopt a semaphore the peer already initialized in `cell`.
    ///
    /// # Safety
    ///
    /// `cell` must point into a shared mapping where the master endpoint has
    /// already run [`init`](Self::init).
    #[allow(unsafe_code)]
    pub unsafe fn from_cell(cell: *mut SemCell) -> Self {
        Self {
            sem: cell.cast::<libc::sem_t>(),
        }
    }

    /// Block while the count is zero, then decrement it.
    #[allow(unsafe_code)]
    pub fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            // Only reachable on a corrupted or destroyed semaphore.
            tracing::error!(error = %err, "sem_wait failed");
            return;
        }
    }

    /// Increment the count, waking one waiter.
    #[allow(unsafe_code)]
    pub fn post(&self) {
        if unsafe { libc::sem_post(self.sem) } == -1 {
            tracing::error!(error = %io::Error::last_os_error(), "sem_post failed");
        }
    }

    /// Current count.
    #[allow(unsafe_code)]
    pub fn value(&self) -> i32 {
        let mut value = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == -1 {
            tracing::error!(error = %io::Error::last_os_error(), "sem_getvalue failed");
            return 0;
        }
        value
    }

    /// Release the semaphore's resources.
    ///
    /// # Safety
    ///
    /// Only the endpoint that ran [`init`](Self::init) may call this, after
    /// the peer can no longer touch the cell.
    #[allow(unsafe_code)]
    pub unsafe fn destroy(&self) {
        unsafe { libc::sem_destroy(self.sem) };
    }
}

// The handle is shared freely; sem_* calls are process- and thread-safe.
#[allow(unsafe_code)]
unsafe impl Send for SharedSemaphore {}
#[allow(unsafe_code)]
unsafe impl Sync for SharedSemaphore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn test_counting_semantics() {
        let mut cell = SemCell { storage: [0; 32] };
        let sem = unsafe { SharedSemaphore::init(&raw mut cell, 2) }.expect("init");
        assert_eq!(sem.value(), 2);

        sem.wait();
        sem.wait();
        assert_eq!(sem.value(), 0);

        sem.post();
        sem.post();
        sem.post();
        assert_eq!(sem.value(), 3);

        unsafe { sem.destroy() };
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_wait_blocks_until_post() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let cell = Box::leak(Box::new(SemCell { storage: [0; 32] }));
        let sem = unsafe { SharedSemaphore::init(&raw mut *cell, 0) }.expect("init");
        let woke = Arc::new(AtomicBool::new(false));

        let waiter = {
            let woke = Arc::clone(&woke);
            std::thread::spawn(move || {
                sem.wait();
                woke.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!woke.load(Ordering::SeqCst));

        sem.post();
        waiter.join().expect("join");
        assert!(woke.load(Ordering::SeqCst));
    }
}
