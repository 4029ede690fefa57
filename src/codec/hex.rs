use std::io::{Error, ErrorKind, Result};

use memchr::memchr;

use crate::buffer::{ReadBuf, WriteBuf};
use crate::codec::{Filter, Progress};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Input bytes per encoded line.
const LINE_BYTES: usize = 32;

/// Classification value for whitespace.
const WS: u8 = 0x10;
/// Classification value for everything that is neither a digit nor space.
const BAD: u8 = 0x20;

static HEX_VALUES: [u8; 256] = {
    let mut table = [BAD; 256];
    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        table[i] = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ' => WS,
            _ => BAD,
        };
        i += 1;
    }
    table
};

/// Encodes bytes as ASCII hex, two digits per byte, with a line break every
/// 32 input bytes and a `>` terminator on finalization.
#[derive(Debug, Default)]
pub struct HexEncoder {
    column: usize,
    /// Encoded bytes not yet accepted downstream, so progress is possible
    /// even when the output offers a single byte of space.
    pending: [u8; 3],
    pending_len: u8,
    pending_pos: u8,
    done: bool,
}

impl HexEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for HexEncoder {
    fn min_output(&self) -> usize {
        // two digits plus a possible line break
        3
    }

    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        if self.done {
            return Ok(Progress::EndOfData);
        }
        loop {
            while self.pending_pos < self.pending_len {
                if output.is_full() {
                    return Ok(Progress::NeedOutput);
                }
                output.put(self.pending[usize::from(self.pending_pos)]);
                self.pending_pos += 1;
            }
            self.pending_pos = 0;
            self.pending_len = 0;
            let byte = match input.peek() {
                Some(byte) => byte,
                None => break,
            };
            input.advance(1);
            // a full line owes its break to the byte that starts the next
            // one, so the terminator never trails a break no matter how
            // the input arrived
            if self.column == LINE_BYTES {
                self.column = 0;
                self.pending[0] = b'\n';
                self.pending[1] = HEX_DIGITS[usize::from(byte >> 4)];
                self.pending[2] = HEX_DIGITS[usize::from(byte & 0x0f)];
                self.pending_len = 3;
            } else {
                self.pending[0] = HEX_DIGITS[usize::from(byte >> 4)];
                self.pending[1] = HEX_DIGITS[usize::from(byte & 0x0f)];
                self.pending_len = 2;
            }
            self.column += 1;
        }
        if last {
            if output.is_full() {
                return Ok(Progress::NeedOutput);
            }
            output.put(b'>');
            self.done = true;
            return Ok(Progress::EndOfData);
        }
        Ok(Progress::NeedInput)
    }

    fn reset(&mut self) {
        self.column = 0;
        self.pending_len = 0;
        self.pending_pos = 0;
        self.done = false;
    }
}

/// Decodes ASCII hex. Whitespace is ignored, `>` terminates the stream (a
/// pending odd digit becomes the high nibble of a final byte), and any other
/// non-digit byte is an error.
#[derive(Debug, Default)]
pub struct HexDecoder {
    odd: Option<u8>,
    done: bool,
}

impl HexDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_odd(&mut self, output: &mut WriteBuf<'_>) -> Option<Progress> {
        if let Some(hi) = self.odd {
            if output.is_full() {
                return Some(Progress::NeedOutput);
            }
            output.put(hi << 4);
            self.odd = None;
        }
        None
    }
}

impl Filter for HexDecoder {
    fn min_input(&self) -> usize {
        2
    }

    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        if self.done {
            return Ok(Progress::EndOfData);
        }
        loop {
            let window = input.unread();
            if window.is_empty() {
                break;
            }
            // Bound this pass at the end marker so the inner loop only has
            // to classify digits and whitespace.
            let marker = memchr(b'>', window);
            let limit = marker.unwrap_or_else(|| window.len());
            let mut taken = 0;
            while taken < limit {
                let byte = window[taken];
                match HEX_VALUES[usize::from(byte)] {
                    WS => taken += 1,
                    BAD => {
                        input.advance(taken);
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("invalid byte {:#04x} in hex stream", byte),
                        ));
                    }
                    value => match self.odd.take() {
                        None => {
                            self.odd = Some(value);
                            taken += 1;
                        }
                        Some(hi) => {
                            if output.is_full() {
                                self.odd = Some(hi);
                                input.advance(taken);
                                return Ok(Progress::NeedOutput);
                            }
                            output.put((hi << 4) | value);
                            taken += 1;
                        }
                    },
                }
            }
            input.advance(taken);
            if marker.is_some() {
                // The marker may sit right at a buffer boundary; it must be
                // honored now, even with no output space left, so the stream
                // can terminate without another refill.
                if let Some(progress) = self.flush_odd(output) {
                    return Ok(progress);
                }
                input.advance(1);
                self.done = true;
                return Ok(Progress::EndOfData);
            }
        }
        if last {
            // end of input stands in for the marker
            if let Some(progress) = self.flush_odd(output) {
                return Ok(progress);
            }
            self.done = true;
            return Ok(Progress::EndOfData);
        }
        Ok(Progress::NeedInput)
    }

    fn reset(&mut self) {
        self.odd = None;
        self.done = false;
    }
}
