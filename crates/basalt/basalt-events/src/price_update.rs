use basalt_bus::{BusMessage, MemoryRegion};

/// A single price tick from one source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PriceUpdate {
    pub source: i32,
    pub price: i32,
    pub quantity: i32,
}

impl PriceUpdate {
    pub const TYPE: i32 = 0;

    pub const ENCODED_LEN: usize = 12;

    pub fn new(source: i32, price: i32, quantity: i32) -> Self {
        Self {
            source,
            price,
            quantity,
        }
    }
}

impl BusMessage for PriceUpdate {
    fn encode(&self, region: &MemoryRegion, offset: usize) {
        region.store_i32(offset, self.source);
        region.store_i32(offset + 4, self.price);
        region.store_i32(offset + 8, self.quantity);
    }

    fn decode(&mut self, region: &MemoryRegion, offset: usize) {
        self.source = region.load_i32(offset);
        self.price = region.load_i32(offset + 4);
        self.quantity = region.load_i32(offset + 8);
    }

    #[inline]
    fn type_tag(&self) -> i32 {
        Self::TYPE
    }

    fn encoded_len(&self) -> usize {
        Self::ENCODED_LEN
    }
}
