use lockstep_types::ProcessorId;
use thiserror::Error;

use crate::CoherenceProtocol;

pub type Result<T> = std::result::Result<T, CoherenceError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoherenceError {
    #[error("coherence protocol {0:?} is not implemented (only MESI is)")]
    ProtocolUnsupported(CoherenceProtocol),

    #[error("no cache connected for requesting processor {0}")]
    UnknownProcessor(ProcessorId),

    #[error("word address {address:#x} out of range for memory of {size} words")]
    AddressOutOfRange { address: u64, size: usize },

    #[error("write-back payload of {got} words does not match line size {line_words}")]
    PayloadSizeMismatch { got: usize, line_words: usize },

    #[error("write-back request requires a data payload")]
    MissingWriteBackPayload,

    #[error("no resident cache line covers word address {address:#x}")]
    LineNotResident { address: u64 },

    #[error(
        "invalid cache geometry: {size_words} words / {line_words} per line / {ways} ways \
         must divide into a whole, non-zero number of sets"
    )]
    InvalidCacheGeometry {
        size_words: usize,
        line_words: usize,
        ways: usize,
    },
}
