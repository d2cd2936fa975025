//! Reader side of the bus.
//!
//! Each reader owns a private cursor that walks slots strictly in allocation
//! order. A slot whose writer has not committed yet blocks the cursor; once it
//! has stayed `NotSet` for longer than the reader's timeout, the reader tries
//! to CAS it to `Rollback`. Whoever wins that CAS (the writer's commit or some
//! reader's rollback) decides the slot's fate for every reader.
//!
//! # Stall detection
//!
//! ```text
//! NotSet polls:  1 .. 99      -> count only, no clock reads
//!                100          -> start the timer
//!                101 ..       -> elapsed >= timeout ? CAS NotSet -> Rollback
//! ```

use crate::error::BusError;
use crate::layout::{DATA_OFFSET, RecordLayout, StatusFlag, TAIL_OFFSET};
use crate::message::BusMessage;
use basalt_config::BusConfig;
use basalt_mmap::MemoryRegion;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stall timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Consecutive `NotSet` polls before the stall timer starts. Keeps clock reads
/// off the hot path while a writer is merely mid-encode.
pub const STALL_POLLS_BEFORE_TIMER: u64 = 100;

/// Where the reader stands relative to the slot under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// The cursor slot has not been delivered.
    Idle,
    /// `next()` delivered the cursor slot; nothing read yet.
    Ready,
    /// The metadata word was read.
    TypeRead(i32),
}

/// The reader side of a bus file.
///
/// # Usage
///
/// ```ignore
/// let mut reader = BusReader::open("/tmp/ticks", 1 << 20, 32)?;
/// loop {
///     if reader.next()? {
///         match reader.read_type() {
///             PriceUpdate::TYPE => reader.read_message(&mut price_update),
///             _ => {}
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct BusReader {
    region: MemoryRegion,
    layout: RecordLayout,
    /// Start of the slot under inspection.
    cursor: usize,
    /// Tail snapshot at open time.
    initial_limit: usize,
    timeout: Duration,
    stall_count: u64,
    timer_start: Option<Instant>,
    state: SlotState,
    recovered: bool,
    rollbacks: u64,
}

impl BusReader {
    /// Opens the bus at `path` with the default stall timeout.
    ///
    /// The reader starts at the first slot and replays everything already in
    /// the file before tailing live writes.
    pub fn open<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        record_size: usize,
    ) -> Result<Self, BusError> {
        let layout = RecordLayout::new(capacity, record_size)?;
        let region = MemoryRegion::open(path.as_ref(), capacity).map_err(|source| BusError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        let initial_limit = region.load_volatile_i64(TAIL_OFFSET).max(0) as usize;
        debug!(
            path = %region.path().display(),
            capacity,
            record_size,
            initial_limit,
            "bus reader opened"
        );

        let mut reader = Self {
            region,
            layout,
            cursor: DATA_OFFSET,
            initial_limit,
            timeout: DEFAULT_TIMEOUT,
            stall_count: 0,
            timer_start: None,
            state: SlotState::Idle,
            recovered: false,
            rollbacks: 0,
        };
        reader.recovered = reader.has_recovered();
        Ok(reader)
    }

    pub fn from_config(cfg: &BusConfig) -> Result<Self, BusError> {
        let mut reader = Self::open(&cfg.path, cfg.capacity, cfg.record_size)?;
        reader.set_timeout(cfg.timeout());
        Ok(reader)
    }

    /// Sets how long a slot may stay uncommitted before this reader rolls it
    /// back.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polls for the next record. Never blocks.
    ///
    /// - `Ok(true)`: a committed record is under the cursor; read it with
    ///   [`read_type`](Self::read_type) plus [`read_message`](Self::read_message)
    ///   or [`read_buffer`](Self::read_buffer). Calling `next()` again without
    ///   reading skips it.
    /// - `Ok(false)`: nothing deliverable yet (empty, stalled, or a rolled back
    ///   slot was just skipped). Poll again.
    /// - `Err(EndOfFile)`: no further slot fits in the file. Terminal.
    pub fn next(&mut self) -> Result<bool, BusError> {
        if self.state != SlotState::Idle {
            self.advance();
        }
        if !self.layout.fits(self.cursor) {
            return Err(BusError::EndOfFile {
                offset: self.cursor,
            });
        }

        let tail = self.region.load_volatile_i64(TAIL_OFFSET);
        if tail <= self.cursor as i64 {
            return Ok(false);
        }

        let raw = self
            .region
            .load_volatile_i32(RecordLayout::status_offset(self.cursor));
        match StatusFlag::from_raw(raw) {
            Some(StatusFlag::Rollback) => {
                self.advance();
                Ok(false)
            }
            Some(StatusFlag::Commit) => {
                self.reset_stall();
                self.state = SlotState::Ready;
                Ok(true)
            }
            _ => {
                self.on_stall();
                Ok(false)
            }
        }
    }

    fn on_stall(&mut self) {
        self.stall_count += 1;
        if self.stall_count < STALL_POLLS_BEFORE_TIMER {
            return;
        }
        let Some(start) = self.timer_start else {
            self.timer_start = Some(Instant::now());
            return;
        };
        if start.elapsed() < self.timeout {
            return;
        }

        let rolled_back = self.region.compare_and_swap_i32(
            RecordLayout::status_offset(self.cursor),
            StatusFlag::NotSet.raw(),
            StatusFlag::Rollback.raw(),
        );
        if rolled_back {
            self.rollbacks += 1;
            warn!(
                offset = self.cursor,
                timeout_ms = self.timeout.as_millis() as u64,
                "rolled back stalled slot"
            );
            self.advance();
        } else {
            // The writer committed or another reader rolled back first; the
            // next poll sees the resolved flag.
            self.reset_stall();
        }
    }

    #[inline(always)]
    fn reset_stall(&mut self) {
        self.stall_count = 0;
        self.timer_start = None;
    }

    #[inline(always)]
    fn advance(&mut self) {
        self.cursor += self.layout.entry_size();
        self.state = SlotState::Idle;
        self.reset_stall();
        if !self.recovered && self.has_recovered() {
            self.recovered = true;
            info!(
                position = self.cursor,
                initial_limit = self.initial_limit,
                "bus reader recovered"
            );
        }
    }

    /// Reads the metadata word of the delivered record: the type tag for
    /// messages, the payload length for buffers. Repeated calls return the
    /// same value.
    ///
    /// # Panics
    /// Panics unless the preceding `next()` returned `true`.
    pub fn read_type(&mut self) -> i32 {
        match self.state {
            SlotState::Ready => {
                let tag = self
                    .region
                    .load_i32(RecordLayout::metadata_offset(self.cursor));
                self.state = SlotState::TypeRead(tag);
                tag
            }
            SlotState::TypeRead(tag) => tag,
            SlotState::Idle => panic!("read_type called without a delivered record"),
        }
    }

    /// Decodes the delivered record into `message` and moves past the slot.
    ///
    /// # Panics
    /// Panics unless the preceding `next()` returned `true`.
    pub fn read_message<M: BusMessage + ?Sized>(&mut self, message: &mut M) {
        self.read_type();
        message.decode(
            &self.region,
            RecordLayout::payload_offset(self.cursor),
        );
        self.advance();
    }

    /// Copies the delivered buffer record into `dst[offset..]` and moves past
    /// the slot. Returns the record length.
    ///
    /// On error the cursor stays on the record: retry with a larger buffer, or
    /// call `next()` to skip it.
    ///
    /// # Panics
    /// Panics unless the preceding `next()` returned `true`.
    pub fn read_buffer(&mut self, dst: &mut [u8], offset: usize) -> Result<usize, BusError> {
        let raw_len = self.read_type();
        let len = usize::try_from(raw_len)
            .ok()
            .filter(|len| *len <= self.layout.record_size())
            .ok_or(BusError::InvalidLength {
                offset: self.cursor,
                len: raw_len,
            })?;

        let available = dst.len().saturating_sub(offset);
        let Some(dst) = offset
            .checked_add(len)
            .and_then(|end| dst.get_mut(offset..end))
        else {
            return Err(BusError::BufferTooSmall {
                needed: len,
                available,
            });
        };

        self.region
            .copy_out(RecordLayout::payload_offset(self.cursor), dst);
        self.advance();
        Ok(len)
    }

    /// Whether the backlog present at open time has been drained.
    #[inline]
    pub fn has_recovered(&self) -> bool {
        self.cursor >= self.initial_limit
    }

    /// Offset of the slot under the cursor.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Slots this reader rolled back itself. Slots rolled back by other
    /// readers and merely skipped here are not counted.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    /// Tail snapshot taken when the reader was opened.
    pub fn initial_limit(&self) -> usize {
        self.initial_limit
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Unmaps the file.
    pub fn close(self) {
        self.region.unmap();
    }
}
