#![forbid(unsafe_code)]

use basalt_bus::{BusMessage, MemoryRegion};

// SymbolId is consistent and stable across all processes
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SymbolId(pub u16);

/// Best bid/offer for one symbol, prices in ticks and sizes in lots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TopOfBook {
    pub ts_event_ns: u64,
    pub symbol_id: SymbolId,
    pub bid_px_ticks: i64, // tick -> smallest unit a price can move
    pub bid_qty_lots: i64, // lot -> smallest allowed quantity step
    pub ask_px_ticks: i64,
    pub ask_qty_lots: i64,
}

impl TopOfBook {
    pub const TYPE: i32 = 1;

    /// Payload bytes used on the bus:
    /// ts(8) symbol(4) bid_px(8) bid_qty(8) ask_px(8) ask_qty(8)
    pub const ENCODED_LEN: usize = 44;

    #[inline]
    pub fn mid_ticks(&self) -> i64 {
        (self.bid_px_ticks + self.ask_px_ticks) / 2
    }
}

impl BusMessage for TopOfBook {
    fn encode(&self, region: &MemoryRegion, offset: usize) {
        region.store_i64(offset, self.ts_event_ns as i64);
        region.store_i32(offset + 8, self.symbol_id.0 as i32);
        region.store_i64(offset + 12, self.bid_px_ticks);
        region.store_i64(offset + 20, self.bid_qty_lots);
        region.store_i64(offset + 28, self.ask_px_ticks);
        region.store_i64(offset + 36, self.ask_qty_lots);
    }

    fn decode(&mut self, region: &MemoryRegion, offset: usize) {
        self.ts_event_ns = region.load_i64(offset) as u64;
        self.symbol_id = SymbolId(region.load_i32(offset + 8) as u16);
        self.bid_px_ticks = region.load_i64(offset + 12);
        self.bid_qty_lots = region.load_i64(offset + 20);
        self.ask_px_ticks = region.load_i64(offset + 28);
        self.ask_qty_lots = region.load_i64(offset + 36);
    }

    #[inline]
    fn type_tag(&self) -> i32 {
        Self::TYPE
    }

    fn encoded_len(&self) -> usize {
        Self::ENCODED_LEN
    }
}
