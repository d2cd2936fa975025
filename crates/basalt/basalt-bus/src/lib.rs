//! Lock-free, multi-writer, multi-reader record bus over a memory-mapped file.
//!
//! Writers append fixed-size slots by `fetch_add` on a shared tail and publish
//! each slot with a single CAS on its status word. Readers walk the slots in
//! allocation order with private cursors, and roll back slots whose writer has
//! stalled past a timeout. The file itself is the only channel between
//! endpoints: no locks, no sockets, no notifications.
//!
//! See [`layout`] for the on-disk format.

mod error;
pub mod layout;
mod message;
mod reader;
mod writer;

pub use basalt_mmap::MemoryRegion;
pub use error::BusError;
pub use layout::{RecordLayout, StatusFlag};
pub use message::BusMessage;
pub use reader::{BusReader, DEFAULT_TIMEOUT, STALL_POLLS_BEFORE_TIMER};
pub use writer::{BusWriter, PendingCommit};
