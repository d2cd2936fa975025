use basalt_mmap::MemoryRegion;

/// A typed record that knows how to lay itself out in a slot payload.
///
/// `offset` is the start of the payload inside the mapped region. `encode`
/// and `decode` touch exactly [`encoded_len`](BusMessage::encoded_len) bytes
/// from there; writers reject messages longer than the bus's `record_size`.
/// Readers call [`type_tag`](BusMessage::type_tag) on their candidates and
/// branch on the tag read from the slot to pick a decoder.
///
/// ```ignore
/// struct Tick { px: i64 }
///
/// impl BusMessage for Tick {
///     fn encode(&self, region: &MemoryRegion, offset: usize) {
///         region.store_i64(offset, self.px);
///     }
///     fn decode(&mut self, region: &MemoryRegion, offset: usize) {
///         self.px = region.load_i64(offset);
///     }
///     fn type_tag(&self) -> i32 {
///         1
///     }
///     fn encoded_len(&self) -> usize {
///         8
///     }
/// }
/// ```
pub trait BusMessage {
    fn encode(&self, region: &MemoryRegion, offset: usize);

    fn decode(&mut self, region: &MemoryRegion, offset: usize);

    fn type_tag(&self) -> i32;

    /// Payload bytes written by `encode`.
    fn encoded_len(&self) -> usize;
}
