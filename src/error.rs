//! Error/log-reason type shared by every component of the decoder.
//!
//! Nothing in this crate panics on malformed input (see `spec.md` §7 / §5):
//! every fallible step returns a `Result<_, DecodeError>` and the caller
//! absorbs the error at the boundary of the unit it would otherwise corrupt
//! (a flowset, a template, or the whole datagram), logging exactly once.

use std::fmt;

/// Reasons a parsing/compilation/execution step can fail.
///
/// Every variant here is non-fatal to the process: `process_packet` always
/// returns, and the exporter/template state is left in a consistent state
/// for the next datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A read would have crossed the caller-supplied `remaining` budget.
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },
    /// A protocol rule was violated (zero-length flowset, zero scope count, …).
    ProtocolViolation { context: &'static str },
    /// A flowset id outside the known ranges and not a reserved id (<256).
    UnknownFlowset { flowset_id: u16 },
    /// The wire-order reorder pass could not find a slot for a field type.
    SequencerReorderFailed { template_id: u16 },
    /// A template, once compiled, had no surviving non-skip fields.
    AllocationAbandoned { context: &'static str },
    /// The sink has no room for the next output record.
    BufferFull,
    /// Defensive: the sink's block grew past its cap after an append.
    BufferOverflow,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated {
                context,
                needed,
                available,
            } => write!(
                f,
                "truncated while reading {context}: needed {needed} bytes, {available} available"
            ),
            DecodeError::ProtocolViolation { context } => {
                write!(f, "protocol violation: {context}")
            }
            DecodeError::UnknownFlowset { flowset_id } => {
                write!(f, "unknown flowset id {flowset_id}")
            }
            DecodeError::SequencerReorderFailed { template_id } => {
                write!(f, "could not reorder sequencer for template {template_id}")
            }
            DecodeError::AllocationAbandoned { context } => {
                write!(f, "abandoned template construction: {context}")
            }
            DecodeError::BufferFull => write!(f, "sink output buffer has no room for a record"),
            DecodeError::BufferOverflow => write!(f, "sink block exceeded its size cap"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;
