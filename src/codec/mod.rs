//! The filter-stage contract and the stages shipped with this crate.

use std::io::{Error, ErrorKind, Result};

use crate::buffer::{ReadBuf, WriteBuf};

mod copy;
mod hex;
mod rle;

pub use self::copy::Copy;
pub use self::hex::{HexDecoder, HexEncoder};
pub use self::rle::{RleDecoder, RleEncoder};

/// Outcome of a single [`Filter::process`] call.
///
/// Hard failures (malformed input, I/O errors from a terminal adapter) are
/// reported as `Err`, never through this enum, so "ended cleanly", "is
/// malformed", and "would need to suspend" stay distinct outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Input is exhausted; more is required before further progress.
    ///
    /// If the stage was called with `last = true` this is equivalent to
    /// [`EndOfData`](Progress::EndOfData). A terminal source returning this
    /// means "nothing available right now, try later".
    NeedInput,
    /// Output space is exhausted; the caller must drain it and call again.
    NeedOutput,
    /// The stage saw its termination marker, or had nothing more to produce
    /// under `last`. It will not be called again.
    EndOfData,
    /// The host must run a caller-supplied procedure (for example to obtain
    /// the next chunk of a procedure data source) before the stage can be
    /// resumed with identical cursor state.
    Callback,
    /// The host must service an asynchronous interruption before resuming.
    Interrupt,
}

/// A filter stage: one codec's processing function plus the margins the
/// pipeline engine needs to schedule it.
///
/// Stages are driven with partial buffers: a call may see any prefix of the
/// logical input and any amount of output space. A stage must consume as
/// much input and produce as much output as it can in one call, advance both
/// cursors to reflect exactly what it did, and report one of the
/// [`Progress`] outcomes. All continuation state needed to resume must live
/// in the stage itself; a stage must never retain references into the
/// cursors' buffers across calls.
///
/// Every stage must look one unit of input ahead before declaring
/// [`NeedOutput`](Progress::NeedOutput), so that an end-of-data marker
/// starting right at a buffer boundary is never missed. The spare margin
/// this requires is declared through [`min_input`](Filter::min_input) /
/// [`min_output`](Filter::min_output), and the progress guarantee is stated
/// in those terms: given at least `min_input` bytes of input and
/// `min_output` bytes of space, a call must consume input, produce output,
/// or terminate.
pub trait Filter {
    /// Smallest input size for which the stage guarantees forward progress.
    fn min_input(&self) -> usize {
        1
    }

    /// Smallest output space for which the stage guarantees forward
    /// progress.
    fn min_output(&self) -> usize {
        1
    }

    /// Processes one buffer. `last` means no input will ever arrive beyond
    /// what is visible in this call.
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress>;

    /// Reinitializes the stage for reuse from a clean state.
    fn reset(&mut self) {}

    /// Releases any resources held by the stage. Called exactly once when
    /// the owning stream closes.
    fn release(&mut self) {}

    /// Repositions a seekable terminal source/sink. Filters and
    /// non-seekable adapters reject this.
    fn seek(&mut self, _pos: u64) -> Result<()> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "stage does not support seeking",
        ))
    }

    /// Flushes a terminal sink's underlying writer, if any.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
