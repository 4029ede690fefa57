use std::io::{Error, ErrorKind, Result};

use crate::buffer::{ReadBuf, WriteBuf};
use crate::codec::{Filter, Progress};

/// Control byte marking end of data.
const EOD: u8 = 128;
/// Longest run or literal block representable by one control byte.
const MAX_RUN: usize = 128;

/// Encodes bytes in the PostScript run-length format: a control byte
/// `0..=127` introduces that many plus one literal bytes, `129..=255`
/// repeats the next byte `257 - n` times, and `128` marks end of data.
///
/// Run detection state lives in the encoder, not in the input window, so
/// output is identical however the input is chunked.
#[derive(Debug)]
pub struct RleEncoder {
    run_byte: u8,
    run_len: usize,
    literal: Vec<u8>,
    /// Completed records not yet accepted downstream. Records are staged
    /// whole, then handed over byte by byte, so progress is possible even
    /// when the output offers a single byte of space.
    staged: Vec<u8>,
    staged_pos: usize,
    done: bool,
}

impl RleEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self {
            run_byte: 0,
            run_len: 0,
            literal: Vec::with_capacity(MAX_RUN),
            staged: Vec::with_capacity(MAX_RUN + 2),
            staged_pos: 0,
            done: false,
        }
    }

    /// Stages the pending literal block, if any.
    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.staged.push((self.literal.len() - 1) as u8);
            self.staged.extend_from_slice(&self.literal);
            self.literal.clear();
        }
    }

    /// Settles the pending run into either a repeat record or the literal
    /// buffer.
    fn settle_run(&mut self) {
        match self.run_len {
            0 => {}
            1 => {
                self.literal.push(self.run_byte);
                self.run_len = 0;
                if self.literal.len() == MAX_RUN {
                    self.flush_literal();
                }
            }
            len => {
                // a repeat record is cheaper than growing the literal block
                self.flush_literal();
                self.staged.push((257 - len) as u8);
                self.staged.push(self.run_byte);
                self.run_len = 0;
            }
        }
    }

    /// Moves staged records into the output. False means the output filled
    /// before the staging queue emptied.
    fn drain_staged(&mut self, output: &mut WriteBuf<'_>) -> bool {
        while self.staged_pos < self.staged.len() {
            if output.is_full() {
                return false;
            }
            output.put(self.staged[self.staged_pos]);
            self.staged_pos += 1;
        }
        self.staged.clear();
        self.staged_pos = 0;
        true
    }
}

impl Default for RleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for RleEncoder {
    fn min_output(&self) -> usize {
        // a full literal block plus its control byte, and one spare
        MAX_RUN + 2
    }

    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        loop {
            if !self.drain_staged(output) {
                return Ok(Progress::NeedOutput);
            }
            if self.done {
                return Ok(Progress::EndOfData);
            }
            let byte = match input.peek() {
                Some(byte) => byte,
                None => break,
            };
            if self.run_len > 0 && byte == self.run_byte && self.run_len < MAX_RUN {
                self.run_len += 1;
                input.advance(1);
                continue;
            }
            self.settle_run();
            self.run_byte = byte;
            self.run_len = 1;
            input.advance(1);
        }
        if last {
            self.settle_run();
            self.flush_literal();
            self.staged.push(EOD);
            self.done = true;
            if self.drain_staged(output) {
                Ok(Progress::EndOfData)
            } else {
                Ok(Progress::NeedOutput)
            }
        } else {
            Ok(Progress::NeedInput)
        }
    }

    fn reset(&mut self) {
        self.run_len = 0;
        self.literal.clear();
        self.staged.clear();
        self.staged_pos = 0;
        self.done = false;
    }
}

#[derive(Debug)]
enum DecodeState {
    Control,
    Literal { remaining: usize },
    RepeatCount { count: usize },
    Repeat { byte: u8, remaining: usize },
    Done,
}

/// Decodes the PostScript run-length format. Resumable in the middle of a
/// literal block or a repeat expansion.
#[derive(Debug)]
pub struct RleDecoder {
    state: DecodeState,
}

impl RleDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self {
            state: DecodeState::Control,
        }
    }
}

impl Default for RleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for RleDecoder {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        loop {
            match self.state {
                DecodeState::Done => return Ok(Progress::EndOfData),
                DecodeState::Control => match input.peek() {
                    None => break,
                    Some(EOD) => {
                        input.advance(1);
                        self.state = DecodeState::Done;
                        return Ok(Progress::EndOfData);
                    }
                    Some(control) if control < EOD => {
                        input.advance(1);
                        self.state = DecodeState::Literal {
                            remaining: usize::from(control) + 1,
                        };
                    }
                    Some(control) => {
                        input.advance(1);
                        self.state = DecodeState::RepeatCount {
                            count: 257 - usize::from(control),
                        };
                    }
                },
                DecodeState::Literal { remaining } => {
                    let count = remaining.min(input.available()).min(output.space());
                    output.put_slice(&input.unread()[..count]);
                    input.advance(count);
                    let left = remaining - count;
                    if left == 0 {
                        self.state = DecodeState::Control;
                    } else if input.is_empty() {
                        self.state = DecodeState::Literal { remaining: left };
                        break;
                    } else {
                        self.state = DecodeState::Literal { remaining: left };
                        return Ok(Progress::NeedOutput);
                    }
                }
                DecodeState::RepeatCount { count } => match input.peek() {
                    None => break,
                    Some(byte) => {
                        input.advance(1);
                        self.state = DecodeState::Repeat {
                            byte,
                            remaining: count,
                        };
                    }
                },
                DecodeState::Repeat { byte, remaining } => {
                    let count = remaining.min(output.space());
                    for _ in 0..count {
                        output.put(byte);
                    }
                    let left = remaining - count;
                    if left == 0 {
                        self.state = DecodeState::Control;
                    } else {
                        self.state = DecodeState::Repeat {
                            byte,
                            remaining: left,
                        };
                        return Ok(Progress::NeedOutput);
                    }
                }
            }
        }
        if last {
            return match self.state {
                // end of input without a marker is tolerated at a record
                // boundary
                DecodeState::Control | DecodeState::Done => Ok(Progress::NeedInput),
                _ => Err(Error::new(
                    ErrorKind::InvalidData,
                    "run-length stream truncated mid-record",
                )),
            };
        }
        Ok(Progress::NeedInput)
    }

    fn reset(&mut self) {
        self.state = DecodeState::Control;
    }
}
