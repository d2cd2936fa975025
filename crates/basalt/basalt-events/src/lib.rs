pub mod price_update;
pub mod top_of_the_book;
pub use price_update::PriceUpdate;
pub use top_of_the_book::{SymbolId, TopOfBook};

use basalt_bus::{BusError, BusReader, BusWriter};

/// Every record kind carried on the market-data bus. The slot's type tag
/// selects the variant; a bus carrying `TopOfBook` needs a record size of at
/// least [`TopOfBook::ENCODED_LEN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    PriceUpdate(PriceUpdate),
    TopOfBook(TopOfBook),
}

impl Event {
    /// Decodes the record delivered by the last successful `reader.next()`.
    ///
    /// Unknown tags yield `None` and leave the record for the next poll to
    /// skip.
    pub fn read_from(reader: &mut BusReader) -> Option<Self> {
        match reader.read_type() {
            PriceUpdate::TYPE => {
                let mut msg = PriceUpdate::default();
                reader.read_message(&mut msg);
                Some(Event::PriceUpdate(msg))
            }
            TopOfBook::TYPE => {
                let mut msg = TopOfBook::default();
                reader.read_message(&mut msg);
                Some(Event::TopOfBook(msg))
            }
            _ => None,
        }
    }

    /// Writes and publishes the event. See [`BusWriter::write`].
    pub fn write_to(&self, writer: &BusWriter) -> Result<bool, BusError> {
        match self {
            Event::PriceUpdate(msg) => writer.write(msg),
            Event::TopOfBook(msg) => writer.write(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_dispatch_on_type_tag() {
        let path = format!("/tmp/basalt_events_{}", std::process::id());
        let writer = BusWriter::create(&path, 4096, 44).unwrap();
        let tob = TopOfBook {
            ts_event_ns: 1,
            symbol_id: SymbolId(3),
            bid_px_ticks: 100,
            bid_qty_lots: 1,
            ask_px_ticks: 101,
            ask_qty_lots: 2,
        };
        let events = [
            Event::PriceUpdate(PriceUpdate::new(0, 1, 2)),
            Event::TopOfBook(tob),
            Event::PriceUpdate(PriceUpdate::new(3, 4, 5)),
        ];
        for ev in &events {
            assert!(ev.write_to(&writer).unwrap());
        }
        // unknown tag in buffer mode: a 7-byte buffer carries tag 7
        writer.write_buffer(&[0; 7]).unwrap();

        let mut reader = BusReader::open(&path, 4096, 44).unwrap();
        let mut seen = Vec::new();
        let mut unknown = 0;
        for _ in 0..=events.len() {
            assert!(reader.next().unwrap());
            match Event::read_from(&mut reader) {
                Some(ev) => seen.push(ev),
                None => unknown += 1,
            }
        }
        // the unknown record was left unread and is skipped here
        assert!(!reader.next().unwrap());
        assert!(reader.has_recovered());
        assert_eq!(seen, events);
        assert_eq!(unknown, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversized_event_is_rejected_without_touching_next_slot() {
        let path = format!("/tmp/basalt_events_oversized_{}", std::process::id());
        let writer = BusWriter::create(&path, 1000, PriceUpdate::ENCODED_LEN).unwrap();
        let tob = Event::TopOfBook(TopOfBook {
            bid_px_ticks: 1,
            ..TopOfBook::default()
        });

        let tail = writer.tail();
        assert!(matches!(
            tob.write_to(&writer),
            Err(BusError::RecordTooLarge {
                len: TopOfBook::ENCODED_LEN,
                record_size: PriceUpdate::ENCODED_LEN
            })
        ));
        assert_eq!(writer.tail(), tail);

        let update = Event::PriceUpdate(PriceUpdate::new(7, 8, 9));
        assert!(update.write_to(&writer).unwrap());

        let mut reader = BusReader::open(&path, 1000, PriceUpdate::ENCODED_LEN).unwrap();
        assert!(reader.next().unwrap());
        assert_eq!(Event::read_from(&mut reader), Some(update));
        assert!(!reader.next().unwrap());
        let _ = std::fs::remove_file(&path);
    }
}
