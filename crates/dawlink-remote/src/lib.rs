//! Out-of-process plugin host channel.
//!
//! This crate connects a DAW host process to a plugin worker process. The
//! control plane is a pair of bounded shared-memory byte FIFOs (one per
//! direction) carrying small framed messages; the data plane is a separate
//! flat shared-memory float region the two sides exchange audio blocks
//! through without copies across the process boundary.
//!
//! # Architecture
//!
//! - [`shm`]: keyed shared-memory segments (create/attach/detach/destroy)
//! - [`sem`]: process-shared semaphores stored inside those segments
//! - [`fifo`]: the bounded byte ring with blocking read/write, message
//!   signalling, and a re-entrant data lock
//! - [`message`]: the `(id, args)` control message tuple and its stable
//!   on-wire ids
//! - [`endpoint`]: framing plus the symmetric dispatch/wait machinery both
//!   sides share
//! - [`host`]: the host endpoint: audio region ownership, block
//!   processing, worker supervision
//! - [`client`]: the worker endpoint, dispatching control messages into an
//!   embedded [`dawlink_plugin::Dsp`]
//!
//! # Processing flow
//!
//! For each audio block the host copies inputs into the region, sends
//! `StartProcessing`, blocks until the worker replies `ProcessingDone`, and
//! copies the outputs back out. Ownership of the region flips with those
//! two messages; no lock protects it.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod fifo;
pub mod host;
pub mod message;
pub mod sem;
pub mod shm;

pub use client::{ClientState, RemoteClient};
pub use endpoint::{BUSY_SERVICE_INTERVAL, Dispatcher, Endpoint};
pub use error::ChannelError;
pub use fifo::{FIFO_CAPACITY, ShmFifo};
pub use host::RemoteHost;
pub use message::{Message, MessageId, USER_MESSAGE_BASE};
pub use shm::SharedSegment;
