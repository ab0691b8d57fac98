//! Symmetric protocol endpoint: message framing, dispatch, reply waiting.
//!
//! Host and worker both sit on an [`Endpoint`] (one incoming and one
//! outgoing FIFO) and implement [`Dispatcher`] for their side of the
//! protocol. Everything else is shared: framing, draining, and waiting for
//! a specific reply while servicing whatever arrives in between.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ChannelError;
use crate::fifo::{FIFO_CAPACITY, ShmFifo};
use crate::message::{Message, MessageId};

/// How long a busy `wait_for_reply` lets the caller service events between
/// polls of the incoming FIFO.
pub const BUSY_SERVICE_INTERVAL: Duration = Duration::from_millis(50);

/// One side of the control channel: an incoming and an outgoing FIFO.
pub struct Endpoint {
    incoming: ShmFifo,
    outgoing: ShmFifo,
    /// Serializes message assembly across threads of this process; the
    /// FIFO's own lock only covers the peer.
    send_lock: Mutex<()>,
}

impl Endpoint {
    pub fn new(incoming: ShmFifo, outgoing: ShmFifo) -> Self {
        Self {
            incoming,
            outgoing,
            send_lock: Mutex::new(()),
        }
    }

    /// Key of the FIFO this endpoint reads.
    pub fn incoming_key(&self) -> i32 {
        self.incoming.key()
    }

    /// Key of the FIFO this endpoint writes.
    pub fn outgoing_key(&self) -> i32 {
        self.outgoing.key()
    }

    /// Frame and send one message.
    pub fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let encoded = message.encoded_len();
        if encoded > FIFO_CAPACITY {
            // Larger messages could never fit even into a drained ring; the
            // retry loop would spin forever holding the assembly lock.
            return Err(ChannelError::MessageTooLarge(encoded));
        }
        let _serialized = self.send_lock.lock();
        {
            let _lock = self.outgoing.lock();
            self.outgoing.write_i32(message.id);
            self.outgoing.write_i32(message.args.len() as i32);
            for arg in &message.args {
                self.outgoing.write_string(arg);
            }
        }
        // The message count must only rise once the data lock is free, so a
        // receiver woken here can take the lock immediately.
        self.outgoing.mark_message_sent();
        Ok(())
    }

    /// Block until a message arrives and decode it.
    pub fn receive(&self) -> Message {
        self.incoming.wait_for_message();
        let _lock = self.incoming.lock();
        let id = self.incoming.read_i32();
        let argc = self.incoming.read_i32().max(0);
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.incoming.read_string());
        }
        Message { id, args }
    }

    /// Whether a complete incoming message is waiting.
    pub fn messages_pending(&self) -> bool {
        self.incoming.messages_pending()
    }
}

/// Endpoint behavior shared by the host and the worker.
///
/// `dispatch` is the per-side hook; it returns `Ok(false)` when the message
/// loop should terminate. The provided methods implement the common
/// receive/dispatch/wait machinery on top of it.
pub trait Dispatcher {
    fn endpoint(&self) -> &Endpoint;

    /// Handle one incoming message. `Ok(false)` requests termination.
    fn dispatch(&mut self, message: &Message) -> Result<bool, ChannelError>;

    /// Called between polls when [`wait_for_reply`](Self::wait_for_reply)
    /// runs in busy mode and nothing is pending. The host overrides this to
    /// pump UI events; the default just paces the poll.
    fn service_events(&mut self) {
        thread::sleep(BUSY_SERVICE_INTERVAL);
    }

    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.endpoint().send(message)
    }

    /// Receive one message, run it through `dispatch`, and hand it back.
    fn fetch_and_dispatch_one(&mut self) -> Result<Message, ChannelError> {
        let message = self.endpoint().receive();
        self.dispatch(&message)?;
        Ok(message)
    }

    /// Dispatch everything currently queued without blocking for more.
    fn drain_pending(&mut self) -> Result<(), ChannelError> {
        while self.endpoint().messages_pending() {
            self.fetch_and_dispatch_one()?;
        }
        Ok(())
    }

    /// Receive and dispatch until a message with id `expected` (or
    /// `GeneralFailure`) arrives, and return it. With `busy` set, idle
    /// gaps are spent in [`service_events`](Self::service_events) instead
    /// of blocked on the FIFO.
    fn wait_for_reply(&mut self, expected: MessageId, busy: bool) -> Result<Message, ChannelError> {
        loop {
            if busy && !self.endpoint().messages_pending() {
                self.service_events();
                continue;
            }
            let message = self.fetch_and_dispatch_one()?;
            if message.is(expected) || message.is(MessageId::GeneralFailure) {
                return Ok(message);
            }
        }
    }
}
