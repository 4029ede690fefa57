use std::io::Result;

use crate::buffer::{move_bytes, ReadBuf, WriteBuf};
use crate::codec::{Filter, Progress};

/// A pass-through stage: moves bytes from input to output unchanged.
///
/// Useful as a buffering adapter between differently sized pipeline nodes,
/// and as the simplest exerciser of the stage contract.
#[derive(Clone, Copy, Debug, Default)]
pub struct Copy;

impl Copy {
    /// Creates the pass-through stage.
    pub fn new() -> Self {
        Self
    }
}

impl Filter for Copy {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        move_bytes(input, output);
        if input.is_empty() {
            if last {
                Ok(Progress::EndOfData)
            } else {
                Ok(Progress::NeedInput)
            }
        } else {
            Ok(Progress::NeedOutput)
        }
    }
}
