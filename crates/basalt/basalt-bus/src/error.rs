use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Allocation or cursor advancement would pass the declared capacity.
    /// Terminal for the writer or reader that hit it.
    #[error("end of bus file reached at offset {offset}")]
    EndOfFile { offset: usize },

    #[error("failed to open bus file '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record of {len} bytes exceeds record size {record_size}")]
    RecordTooLarge { len: usize, record_size: usize },

    #[error("destination holds {available} bytes, record needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("record at offset {offset} has invalid length {len}")]
    InvalidLength { offset: usize, len: i32 },

    #[error("invalid bus geometry: {0}")]
    InvalidGeometry(&'static str),
}
