//! File-backed shared memory region with byte-addressed access.
//!
//! A [`MemoryRegion`] maps a file read-write with `MAP_SHARED` semantics, so
//! every thread or process mapping the same file sees the same bytes. It
//! offers two families of accessors:
//!
//! - **Plain** (`load_*` / `store_*` / `copy_*`): unordered, unaligned-safe
//!   reads and writes. The caller must make sure nobody else is logically
//!   reading or writing the same bytes at the same time; publication to other
//!   parties happens through a volatile store or a CAS afterwards.
//! - **Volatile / atomic** (`load_volatile_*`, `store_volatile_*`,
//!   `compare_and_swap_*`, `fetch_add_i64`): sequentially consistent native
//!   atomics operating directly on the mapped bytes. These require natural
//!   alignment of the offset (4 for `i32`, 8 for `i64`).
//!
//! Every offset is bounds-checked against the mapped length; an out-of-range
//! access panics instead of touching foreign memory. Multi-byte values use the
//! platform's native byte order.

use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    sync::atomic::{AtomicI32, AtomicI64, Ordering},
};

/// Page size assumed when the OS cannot be asked.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Returns the OS page size.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if ps > 0 {
            return ps as usize;
        }
    }
    DEFAULT_PAGE_SIZE
}

/// Rounds `len` up to a whole number of pages (at least one page).
///
/// ```
/// use basalt_mmap::round_to_page;
/// assert_eq!(round_to_page(1, 4096), 4096);
/// assert_eq!(round_to_page(4096, 4096), 4096);
/// assert_eq!(round_to_page(4097, 4096), 8192);
/// ```
#[inline]
pub fn round_to_page(len: usize, page: usize) -> usize {
    len.max(1).div_ceil(page) * page
}

/// A shared, read-write mapping of a backing file.
#[derive(Debug)]
pub struct MemoryRegion {
    _file: File,
    /// Owns the mapping; `base` points into it and is valid for `len` bytes.
    _mmap: MmapMut,
    base: NonNull<u8>,
    len: usize,
    path: PathBuf,
}

// SAFETY: the mapping is process-wide shared memory. Atomic accessors are
// sound from any thread; plain accessors follow the documented contract that
// concurrent logical access to the same bytes is coordinated by the caller.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    /// Opens (creating if missing) the file at `path` and maps
    /// `round_to_page(len)` bytes of it.
    ///
    /// Existing contents are preserved. The file is extended if it is shorter
    /// than the mapped length and never shrunk.
    pub fn open<P: AsRef<Path>>(path: P, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::map(file, path.as_ref(), len)
    }

    /// Creates the file at `path`, discarding any previous contents, and maps
    /// `round_to_page(len)` zeroed bytes of it.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::map(file, path.as_ref(), len)
    }

    fn map(file: File, path: &Path, len: usize) -> io::Result<Self> {
        let mapped_len = round_to_page(len, page_size());
        if file.metadata()?.len() < mapped_len as u64 {
            file.set_len(mapped_len as u64)?;
        }

        // SAFETY: the mapping is shared with other processes by design; all
        // access goes through the bounds-checked accessors below.
        let mut mmap = unsafe { memmap2::MmapOptions::new().len(mapped_len).map_mut(&file)? };
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| io::Error::other("mmap returned a null pointer"))?;

        Ok(Self {
            _file: file,
            _mmap: mmap,
            base,
            len: mapped_len,
            path: path.to_path_buf(),
        })
    }

    /// Mapped length in bytes (page rounded).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the mapping. Dropping the region has the same effect.
    pub fn unmap(self) {}

    #[inline(always)]
    fn at(&self, offset: usize, size: usize) -> *mut u8 {
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= self.len),
            "access of {size} bytes at offset {offset} outside region of {} bytes",
            self.len
        );
        // SAFETY: bounds checked above.
        unsafe { self.base.as_ptr().add(offset) }
    }

    #[inline(always)]
    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        assert!(offset % 4 == 0, "unaligned i32 atomic at offset {offset}");
        let p = self.at(offset, 4);
        // SAFETY: in bounds, 4-aligned (the mapping base is page aligned) and
        // valid for the lifetime of `self`.
        unsafe { AtomicI32::from_ptr(p.cast()) }
    }

    #[inline(always)]
    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        assert!(offset % 8 == 0, "unaligned i64 atomic at offset {offset}");
        let p = self.at(offset, 8);
        // SAFETY: as for `atomic_i32`, with 8-byte alignment.
        unsafe { AtomicI64::from_ptr(p.cast()) }
    }

    // ─── Plain access ───────────────────────────────────────────────────────

    #[inline]
    pub fn load_u8(&self, offset: usize) -> u8 {
        // SAFETY: bounds checked by `at`.
        unsafe { self.at(offset, 1).read() }
    }

    #[inline]
    pub fn load_i32(&self, offset: usize) -> i32 {
        // SAFETY: bounds checked by `at`; unaligned read.
        unsafe { ptr::read_unaligned(self.at(offset, 4).cast::<i32>()) }
    }

    #[inline]
    pub fn load_i64(&self, offset: usize) -> i64 {
        // SAFETY: bounds checked by `at`; unaligned read.
        unsafe { ptr::read_unaligned(self.at(offset, 8).cast::<i64>()) }
    }

    #[inline]
    pub fn store_u8(&self, offset: usize, value: u8) {
        // SAFETY: bounds checked by `at`.
        unsafe { self.at(offset, 1).write(value) }
    }

    #[inline]
    pub fn store_i32(&self, offset: usize, value: i32) {
        // SAFETY: bounds checked by `at`; unaligned write.
        unsafe { ptr::write_unaligned(self.at(offset, 4).cast::<i32>(), value) }
    }

    #[inline]
    pub fn store_i64(&self, offset: usize, value: i64) {
        // SAFETY: bounds checked by `at`; unaligned write.
        unsafe { ptr::write_unaligned(self.at(offset, 8).cast::<i64>(), value) }
    }

    /// Copies `src` into the region starting at `offset`.
    #[inline]
    pub fn copy_in(&self, offset: usize, src: &[u8]) {
        let dst = self.at(offset, src.len());
        // SAFETY: destination range bounds checked; `src` is a distinct
        // allocation so the ranges cannot overlap.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the region.
    #[inline]
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        let src = self.at(offset, dst.len());
        // SAFETY: source range bounds checked; `dst` is a distinct allocation.
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    // ─── Volatile / atomic access ───────────────────────────────────────────

    #[inline]
    pub fn load_volatile_i32(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::SeqCst)
    }

    #[inline]
    pub fn load_volatile_i64(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::SeqCst)
    }

    #[inline]
    pub fn store_volatile_i32(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::SeqCst)
    }

    #[inline]
    pub fn store_volatile_i64(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::SeqCst)
    }

    /// Atomically replaces the `i32` at `offset` with `new` iff it equals
    /// `expected`. Returns whether the swap happened.
    #[inline]
    pub fn compare_and_swap_i32(&self, offset: usize, expected: i32, new: i32) -> bool {
        self.atomic_i32(offset)
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Atomically replaces the `i64` at `offset` with `new` iff it equals
    /// `expected`. Returns whether the swap happened.
    #[inline]
    pub fn compare_and_swap_i64(&self, offset: usize, expected: i64, new: i64) -> bool {
        self.atomic_i64(offset)
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Atomically adds `delta` to the `i64` at `offset`, returning the
    /// previous value.
    #[inline]
    pub fn fetch_add_i64(&self, offset: usize, delta: i64) -> i64 {
        self.atomic_i64(offset).fetch_add(delta, Ordering::SeqCst)
    }
}
