//! Per-step outcome value returned by every block, and the taxonomy used by
//! the scheduler to tell a transient stall apart from a terminal failure.

use thiserror::Error;

/// Outcome of one [`Block::procedure`][crate::block::Block::procedure] call.
///
/// The discriminant order is part of the contract: a variant is *terminal*
/// iff its ordinal is strictly greater than [`ErrorKind::TerminateFlowgraph`]'s.
/// [`ErrorKind::is_terminal`] is defined purely in terms of that ordering, so
/// inserting a new variant in the wrong half of the enum silently changes its
/// terminality.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// An input channel did not have enough samples for this step to proceed.
    #[error("not enough samples in an input channel")]
    NotEnoughSamples = 0,
    /// An output channel did not have enough space for this step to proceed.
    #[error("not enough space in an output channel")]
    NotEnoughSpace = 1,
    /// The block refused to run this step for a non-fatal, block-specific reason.
    #[error("procedure declined to run")]
    ProcedureError = 2,
    /// The step observed malformed payload data and skipped processing it.
    #[error("malformed payload data")]
    BadData = 3,

    /// Sentinel boundary. Never itself returned by a block; every variant
    /// ordered after this one is terminal.
    #[error("terminate flowgraph (sentinel, never returned directly)")]
    TerminateFlowgraph = 4,

    /// A runner referenced a channel index that does not exist.
    #[error("invalid channel index")]
    TermInvalidChannelIndex = 5,
    /// A block-specific, unrecoverable procedure failure.
    #[error("unrecoverable procedure error")]
    TermProcedureError = 6,
    /// An I/O failure the block cannot retry past (e.g. a closed device).
    #[error("I/O error")]
    TermIoError = 7,
    /// The block's upstream data source has reached end-of-file.
    #[error("end of file reached")]
    TermEofReached = 8,
}

impl ErrorKind {
    /// `true` iff this kind's ordinal is strictly greater than
    /// [`ErrorKind::TerminateFlowgraph`]'s. The scheduler stops the graph
    /// and fires the crash callback exactly once.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        (self as u8) > (ErrorKind::TerminateFlowgraph as u8)
    }

    /// `true` iff this kind describes a starved input or a full output,
    /// the two kinds the adaptive-sleep backoff reacts to.
    #[inline]
    #[must_use]
    pub const fn is_starvation(self) -> bool {
        matches!(self, ErrorKind::NotEnoughSamples | ErrorKind::NotEnoughSpace)
    }

    /// Recovers the variant with the given ordinal, as stored in
    /// [`BlockExecutionStats::last_error_kind`][crate::scheduler::BlockExecutionStats::last_error_kind]'s
    /// packed `AtomicU8`.
    pub(crate) const fn from_ordinal(v: u8) -> Option<ErrorKind> {
        match v {
            0 => Some(ErrorKind::NotEnoughSamples),
            1 => Some(ErrorKind::NotEnoughSpace),
            2 => Some(ErrorKind::ProcedureError),
            3 => Some(ErrorKind::BadData),
            4 => Some(ErrorKind::TerminateFlowgraph),
            5 => Some(ErrorKind::TermInvalidChannelIndex),
            6 => Some(ErrorKind::TermProcedureError),
            7 => Some(ErrorKind::TermIoError),
            8 => Some(ErrorKind::TermEofReached),
            _ => None,
        }
    }
}

/// Result type returned by a block's step function: `Ok(())` means work was
/// done this step, `Err(kind)` describes why it wasn't.
pub type StepResult = Result<(), ErrorKind>;

/// Context handed to a registered crash callback the first time a terminal
/// error is observed. Carries the offending block's name and error kind; a
/// consumer can always ignore fields it doesn't need.
#[derive(Clone, Debug)]
pub struct CrashInfo {
    /// Name of the block whose step returned the terminal error.
    pub block_name: String,
    /// The terminal error kind observed.
    pub kind: ErrorKind,
}
