//! A byte FIFO inside a shared memory segment with semaphore signalling.
//!
//! One FIFO carries framed control messages in one direction between the
//! host and the worker. The segment starts with a small header (two padded
//! semaphore cells and the read/write offsets) followed by the data bytes.
//! `data_sem` guards the header and data; `msg_sem` counts completed
//! messages so a receiver can sleep until traffic arrives.
//!
//! The data lock is recursive per thread: the message framer holds it
//! across an entire message while the codec primitives re-enter it for each
//! field, so no partially assembled message is ever observable.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::ChannelError;
use crate::sem::{SemCell, SharedSemaphore};
use crate::shm::SharedSegment;

/// Capacity of one FIFO. 4000 bytes keeps the header plus data within a
/// single memory page.
pub const FIFO_CAPACITY: usize = 4000;

/// Backoff while the ring is full (writer) or starved (reader). Control
/// traffic is small and rare enough that a short poll beats carrying extra
/// wakeup state in the shared header.
const BACKOFF: Duration = Duration::from_micros(5);

#[repr(C)]
struct FifoHeader {
    data_sem: SemCell,
    msg_sem: SemCell,
    start: i32,
    end: i32,
    data: [u8; FIFO_CAPACITY],
}

/// One directional byte FIFO over shared memory.
///
/// The endpoint that called [`create`](Self::create) is the master: it owns
/// the segment and the semaphores and destroys them on drop. The peer
/// attaches with [`attach`](Self::attach) and only unmaps on drop.
pub struct ShmFifo {
    segment: SharedSegment,
    data_sem: SharedSemaphore,
    msg_sem: SharedSemaphore,
    lock_owner: AtomicU64,
    lock_depth: AtomicU32,
    master: bool,
}

/// Holds the FIFO data lock; released on drop. Re-entrant within a thread.
pub struct FifoLock<'a> {
    fifo: &'a ShmFifo,
}

impl Drop for FifoLock<'_> {
    fn drop(&mut self) {
        self.fifo.release();
    }
}

#[allow(unsafe_code)]
fn current_thread() -> u64 {
    // Never zero on the platforms we run on; zero doubles as "unowned".
    unsafe { libc::pthread_self() as u64 }
}

impl ShmFifo {
    /// Create the underlying segment and both semaphores (master side).
    #[allow(unsafe_code)]
    pub fn create() -> Result<Self, ChannelError> {
        let segment = SharedSegment::create(mem::size_of::<FifoHeader>())?;
        let header = segment.as_ptr().cast::<FifoHeader>();
        // start and end are already zero: fresh segments are zero-filled.
        let data_sem = unsafe { SharedSemaphore::init(&raw mut (*header).data_sem, 1) }
            .map_err(ChannelError::Semaphore)?;
        let msg_sem = unsafe { SharedSemaphore::init(&raw mut (*header).msg_sem, 0) }
            .map_err(ChannelError::Semaphore)?;
        Ok(Self {
            segment,
            data_sem,
            msg_sem,
            lock_owner: AtomicU64::new(0),
            lock_depth: AtomicU32::new(0),
            master: true,
        })
    }

    /// Attach to a FIFO the peer created, by key.
    #[allow(unsafe_code)]
    pub fn attach(key: i32) -> Result<Self, ChannelError> {
        let segment = SharedSegment::attach(key)?;
        if segment.size() < mem::size_of::<FifoHeader>() {
            return Err(ChannelError::Protocol(format!(
                "segment {key} too small for a FIFO header: {} bytes",
                segment.size()
            )));
        }
        let header = segment.as_ptr().cast::<FifoHeader>();
        let data_sem = unsafe { SharedSemaphore::from_cell(&raw mut (*header).data_sem) };
        let msg_sem = unsafe { SharedSemaphore::from_cell(&raw mut (*header).msg_sem) };
        Ok(Self {
            segment,
            data_sem,
            msg_sem,
            lock_owner: AtomicU64::new(0),
            lock_depth: AtomicU32::new(0),
            master: false,
        })
    }

    /// The key a peer needs to attach this FIFO.
    pub fn key(&self) -> i32 {
        self.segment.key()
    }

    /// Whether this endpoint created the FIFO and will destroy it.
    pub fn is_master(&self) -> bool {
        self.master
    }

    /// Take the data lock. Re-entrant: a thread already holding the lock
    /// only deepens it, and the outermost release posts the semaphore.
    pub fn lock(&self) -> FifoLock<'_> {
        self.acquire();
        FifoLock { fifo: self }
    }

    fn acquire(&self) {
        let me = current_thread();
        if self.lock_owner.load(Ordering::Acquire) == me {
            self.lock_depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.data_sem.wait();
        self.lock_owner.store(me, Ordering::Release);
        self.lock_depth.store(1, Ordering::Relaxed);
    }

    fn release(&self) {
        if self.lock_depth.load(Ordering::Relaxed) == 0 {
            return;
        }
        if self.lock_depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.lock_owner.store(0, Ordering::Release);
            self.data_sem.post();
        }
    }

    /// Block until at least one complete message is available.
    pub fn wait_for_message(&self) {
        self.msg_sem.wait();
    }

    /// Signal one complete message. Must be called after the data lock is
    /// released so a woken receiver can take it immediately.
    pub fn mark_message_sent(&self) {
        self.msg_sem.post();
    }

    /// Whether any complete messages are waiting.
    pub fn messages_pending(&self) -> bool {
        self.msg_sem.value() > 0
    }

    fn header(&self) -> *mut FifoHeader {
        self.segment.as_ptr().cast()
    }

    #[allow(unsafe_code)]
    fn start(&self) -> i32 {
        unsafe { ptr::read_volatile(&raw const (*self.header()).start) }
    }

    #[allow(unsafe_code)]
    fn set_start(&self, value: i32) {
        unsafe { ptr::write_volatile(&raw mut (*self.header()).start, value) };
    }

    #[allow(unsafe_code)]
    fn end(&self) -> i32 {
        unsafe { ptr::read_volatile(&raw const (*self.header()).end) }
    }

    #[allow(unsafe_code)]
    fn set_end(&self, value: i32) {
        unsafe { ptr::write_volatile(&raw mut (*self.header()).end, value) };
    }

    #[allow(unsafe_code)]
    fn data(&self) -> *mut u8 {
        unsafe { (&raw mut (*self.header()).data).cast::<u8>() }
    }

    /// Blocking read of exactly `buf.len()` bytes.
    #[allow(unsafe_code)]
    pub(crate) fn read_bytes(&self, buf: &mut [u8]) {
        let wanted = buf.len() as i32;
        self.acquire();
        while self.end() - self.start() < wanted {
            self.release();
            thread::sleep(BACKOFF);
            self.acquire();
        }
        let start = self.start();
        unsafe {
            ptr::copy_nonoverlapping(
                self.data().add(start as usize),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        if start + wanted == self.end() {
            // Fully drained; rewind so the writer gets the whole ring back.
            self.set_start(0);
            self.set_end(0);
        } else {
            self.set_start(start + wanted);
        }
        self.release();
    }

    /// Blocking write of all of `buf`. `buf` must fit the ring; the framer
    /// enforces that before assembly starts.
    #[allow(unsafe_code)]
    pub(crate) fn write_bytes(&self, buf: &[u8]) {
        debug_assert!(buf.len() <= FIFO_CAPACITY);
        let len = buf.len() as i32;
        self.acquire();
        loop {
            let end = self.end();
            if len <= FIFO_CAPACITY as i32 - end {
                break;
            }
            let start = self.start();
            if start > 0 {
                // Slide the unread span to the front and recheck.
                unsafe {
                    ptr::copy(
                        self.data().add(start as usize),
                        self.data(),
                        (end - start) as usize,
                    );
                }
                self.set_end(end - start);
                self.set_start(0);
                continue;
            }
            self.release();
            thread::sleep(BACKOFF);
            self.acquire();
        }
        let end = self.end();
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.data().add(end as usize), buf.len());
        }
        self.set_end(end + len);
        self.release();
    }

    /// Write one integer in host byte order.
    pub fn write_i32(&self, value: i32) {
        self.write_bytes(&value.to_ne_bytes());
    }

    /// Read one integer in host byte order.
    pub fn read_i32(&self) -> i32 {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes);
        i32::from_ne_bytes(bytes)
    }

    /// Write a length-prefixed string; the empty string is just a zero
    /// length with no payload bytes.
    pub fn write_string(&self, value: &str) {
        self.write_i32(value.len() as i32);
        if !value.is_empty() {
            self.write_bytes(value.as_bytes());
        }
    }

    /// Read a length-prefixed string.
    pub fn read_string(&self) -> String {
        let len = self.read_i32();
        if len <= 0 {
            return String::new();
        }
        let mut bytes = vec![0u8; len as usize];
        self.read_bytes(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Drop for ShmFifo {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if self.master {
            unsafe {
                self.data_sem.destroy();
                self.msg_sem.destroy();
            }
        }
        // The segment detaches (and, for the master, unlinks) afterwards.
    }
}

// All header state lives in shared memory behind the data semaphore; the
// local lock bookkeeping is atomic.
#[allow(unsafe_code)]
unsafe impl Send for ShmFifo {}
#[allow(unsafe_code)]
unsafe impl Sync for ShmFifo {}
