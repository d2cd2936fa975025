//! Tails a bus file: decodes every record from the first slot onward and logs
//! throughput until the file is full.
//!
//! ```text
//! basalt-tail [config.toml]
//! ```

use anyhow::Context;
use basalt_bus::{BusError, BusReader};
use basalt_config::BusConfig;
use basalt_events::Event;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cfg = match std::env::args().nth(1) {
        Some(path) => BusConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => BusConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut reader = BusReader::from_config(&cfg)
        .with_context(|| format!("opening bus {}", cfg.path))?;
    info!(
        path = %cfg.path,
        capacity = cfg.capacity,
        record_size = cfg.record_size,
        backlog_end = reader.initial_limit(),
        "tailing bus"
    );

    let mut last = Instant::now();
    let mut count: u64 = 0;
    let mut unknown: u64 = 0;
    let mut last_event = None;

    loop {
        match reader.next() {
            Ok(true) => match Event::read_from(&mut reader) {
                Some(event) => {
                    last_event = Some(event);
                    count += 1;
                }
                None => unknown += 1,
            },
            Ok(false) => std::hint::spin_loop(),
            Err(BusError::EndOfFile { offset }) => {
                info!(offset, "bus full, exiting");
                return Ok(());
            }
            Err(e) => return Err(e).context("reading bus"),
        }

        if last.elapsed() >= Duration::from_secs(1) {
            info!(
                rate = count,
                position = reader.position(),
                recovered = reader.has_recovered(),
                rollbacks = reader.rollbacks(),
                last = ?last_event,
                "events/s"
            );
            if unknown > 0 {
                warn!(unknown, "records with unknown type tag skipped");
            }
            count = 0;
            unknown = 0;
            last = Instant::now();
        }
    }
}
