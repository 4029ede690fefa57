//! Pipeline traversal: multi-stage refill (read direction) and drain
//! (write direction).
//!
//! Both directions walk the chain of linked streams iteratively. Descending
//! detaches the next stream from its parent and pushes it on an explicit
//! frame stack; unwinding pops and reattaches. Every exit path reattaches
//! all frames, so the chain is intact whenever control returns to the
//! consumer.

use std::io::Error;

use tracing::trace;

use super::{EndStatus, Stream};
use crate::buffer::{ReadBuf, WriteBuf};
use crate::codec::Progress;

/// How an exceptional stage outcome unwinds the read traversal.
enum Unwind {
    /// Mark the current stream, reattach one frame, and re-run the parent.
    Reprocess(EndStatus),
    /// Mark the current stream and the whole path, reattach everything,
    /// and return to the consumer.
    Bail(EndStatus),
}

/// Refills `s`'s own buffer by running its stage, descending into linked
/// streams whenever a stage needs more input.
pub(super) fn refill(s: &mut Stream) {
    refill_target(s, None);
}

/// Like [`refill`], but the outermost stage writes directly into `target`,
/// bypassing `s`'s buffer. Used for large block reads. Returns the number
/// of bytes produced into `target`.
pub(super) fn refill_into(s: &mut Stream, target: &mut [u8]) -> usize {
    let mut out = WriteBuf::new(target);
    refill_target(s, Some(&mut out));
    out.produced()
}

fn refill_target(s: &mut Stream, mut ext: Option<&mut WriteBuf<'_>>) {
    s.compact(false);
    let mut path: Vec<Box<Stream>> = Vec::new();
    let mut carried: Option<Error> = None;
    'outer: loop {
        let unwind = loop {
            let at_top = path.is_empty();
            let curr: &mut Stream = match path.last_mut() {
                Some(frame) => frame,
                None => &mut *s,
            };
            let target = if at_top { ext.as_deref_mut() } else { None };
            let (outcome, produced) = curr.run_read_stage(target);
            // a filter that reported end of data is closed in place as
            // soon as everything it produced has been consumed; terminal
            // streams stay open until the pipeline itself closes
            if let Some(up) = curr.inner.as_deref_mut() {
                if up.end_status == EndStatus::Eof
                    && up.inner.is_some()
                    && !up.closed
                    && up.rpos == up.wpos
                {
                    trace!("refill: closing drained filter");
                    if let Err(error) = up.shutdown() {
                        carried = Some(error);
                        break Unwind::Reprocess(EndStatus::Error);
                    }
                }
            }
            match outcome {
                Err(error) => {
                    carried = Some(error);
                    break Unwind::Reprocess(EndStatus::Error);
                }
                Ok(Progress::NeedOutput) => break Unwind::Reprocess(EndStatus::Clear),
                Ok(Progress::EndOfData) => break Unwind::Reprocess(EndStatus::Eof),
                Ok(Progress::Callback) => break Unwind::Bail(EndStatus::Callback),
                Ok(Progress::Interrupt) => break Unwind::Bail(EndStatus::Interrupt),
                Ok(Progress::NeedInput) => match curr.inner.as_deref().map(|i| i.end_status) {
                    None => {
                        if produced > 0 {
                            break Unwind::Reprocess(EndStatus::Clear);
                        }
                        // terminal source with nothing to offer
                        break Unwind::Bail(EndStatus::Clear);
                    }
                    Some(EndStatus::Clear) => {
                        if let Some(mut next) = curr.inner.take() {
                            trace!(depth = path.len() + 1, "refill: descend");
                            next.compact(false);
                            path.push(next);
                        }
                    }
                    // a finished or suspended source ends this pass; the
                    // parent decides what the recorded status means
                    Some(status) => break Unwind::Reprocess(status),
                },
            }
        };
        match unwind {
            Unwind::Reprocess(status) => {
                match path.last_mut() {
                    Some(frame) => frame.end_status = status,
                    None => s.end_status = status,
                }
                match path.pop() {
                    Some(frame) => match path.last_mut() {
                        Some(parent) => parent.inner = Some(frame),
                        None => s.inner = Some(frame),
                    },
                    None => break 'outer,
                }
            }
            Unwind::Bail(status) => {
                match path.last_mut() {
                    Some(frame) => frame.end_status = status,
                    None => s.end_status = status,
                }
                while let Some(frame) = path.pop() {
                    match path.last_mut() {
                        Some(parent) => {
                            parent.inner = Some(frame);
                            parent.end_status = status;
                        }
                        None => {
                            s.inner = Some(frame);
                            s.end_status = status;
                        }
                    }
                }
                break 'outer;
            }
        }
    }
    if let Some(error) = carried {
        trace!(%error, "refill: stage error");
        s.last_error = Some(error);
    }
}

/// What the write-direction descend loop decided to do next.
enum Action {
    Break(Broke),
    Descend,
}

enum Broke {
    Status(EndStatus),
    Hard(Error),
}

/// Pushes buffered bytes from `s` down through the chain toward the
/// terminal sink. With `last` set, finalizes `s`'s stage (and any
/// temporary streams directly below it) in the same pass.
pub(super) fn drain(s: &mut Stream, last: bool) -> Result<(), Error> {
    let mut path: Vec<Box<Stream>> = Vec::new();
    // nesting depth counting only non-temporary streams; the final flush
    // applies while it stays at 1
    let mut depth: usize = 1;
    let mut level: usize = 0;
    let mut top_level: usize = 0;
    loop {
        let broke = loop {
            let curr: &mut Stream = match path.last_mut() {
                Some(frame) => frame,
                None => &mut *s,
            };
            if curr.end_status != EndStatus::Clear {
                break Broke::Status(curr.end_status);
            }
            let end = last && depth <= 1 && level == top_level;
            let action = match curr.run_write_stage(end) {
                Err(error) => Action::Break(Broke::Hard(error)),
                Ok(Progress::NeedInput) => {
                    if end {
                        curr.end_status = EndStatus::Eof;
                        if curr.inner.as_deref().map_or(false, |i| i.is_temp) {
                            // carry the final flush down through the
                            // temporary stream in the same pass
                            top_level = level + 1;
                            Action::Descend
                        } else {
                            Action::Break(Broke::Status(EndStatus::Clear))
                        }
                    } else {
                        Action::Break(Broke::Status(EndStatus::Clear))
                    }
                }
                Ok(Progress::NeedOutput) => {
                    if curr.inner.is_some() {
                        Action::Descend
                    } else {
                        Action::Break(Broke::Status(EndStatus::Clear))
                    }
                }
                Ok(Progress::EndOfData) => {
                    curr.end_status = EndStatus::Eof;
                    Action::Break(Broke::Status(EndStatus::Eof))
                }
                Ok(Progress::Callback) => Action::Break(Broke::Status(EndStatus::Callback)),
                Ok(Progress::Interrupt) => Action::Break(Broke::Status(EndStatus::Interrupt)),
            };
            match action {
                Action::Break(broke) => break broke,
                Action::Descend => {
                    let curr: &mut Stream = match path.last_mut() {
                        Some(frame) => frame,
                        None => &mut *s,
                    };
                    match curr.inner.as_deref().map(|i| i.end_status) {
                        Some(EndStatus::Clear) => {
                            if let Some(mut next) = curr.inner.take() {
                                trace!(level = level + 1, finalize = last, "drain: descend");
                                next.compact(false);
                                if !next.is_temp {
                                    depth += 1;
                                }
                                path.push(next);
                                level += 1;
                            }
                        }
                        Some(status) => break Broke::Status(status),
                        None => break Broke::Status(EndStatus::Clear),
                    }
                }
            }
        };
        match broke {
            Broke::Hard(error) => {
                match path.last_mut() {
                    Some(frame) => frame.end_status = EndStatus::Error,
                    None => s.end_status = EndStatus::Error,
                }
                reattach_all(s, &mut path);
                trace!(%error, "drain: stage error");
                return Err(error);
            }
            Broke::Status(EndStatus::Clear) => {
                if level <= top_level || path.is_empty() {
                    reattach_all(s, &mut path);
                    return Ok(());
                }
                if let Some(frame) = path.pop() {
                    if !frame.is_temp {
                        depth -= 1;
                    }
                    match path.last_mut() {
                        Some(parent) => parent.inner = Some(frame),
                        None => s.inner = Some(frame),
                    }
                }
                level -= 1;
            }
            Broke::Status(EndStatus::Eof) => {
                // end of stream propagates to every level above
                match path.last_mut() {
                    Some(frame) => frame.end_status = EndStatus::Eof,
                    None => s.end_status = EndStatus::Eof,
                }
                while let Some(frame) = path.pop() {
                    match path.last_mut() {
                        Some(parent) => {
                            parent.inner = Some(frame);
                            parent.end_status = EndStatus::Eof;
                        }
                        None => {
                            s.inner = Some(frame);
                            s.end_status = EndStatus::Eof;
                        }
                    }
                }
                return Ok(());
            }
            Broke::Status(EndStatus::Error) => {
                reattach_all(s, &mut path);
                return Err(Error::new(
                    std::io::ErrorKind::Other,
                    "downstream stream is in an error state",
                ));
            }
            Broke::Status(status) => {
                // a suspension marks every level on the path
                match path.last_mut() {
                    Some(frame) => frame.end_status = status,
                    None => s.end_status = status,
                }
                while let Some(frame) = path.pop() {
                    match path.last_mut() {
                        Some(parent) => {
                            parent.inner = Some(frame);
                            parent.end_status = status;
                        }
                        None => {
                            s.inner = Some(frame);
                            s.end_status = status;
                        }
                    }
                }
                return Ok(());
            }
        }
    }
}

fn reattach_all(s: &mut Stream, path: &mut Vec<Box<Stream>>) {
    while let Some(frame) = path.pop() {
        match path.last_mut() {
            Some(parent) => parent.inner = Some(frame),
            None => s.inner = Some(frame),
        }
    }
}

impl Stream {
    /// Runs this stream's stage once in the read direction: input is the
    /// linked stream's unread bytes, output is this stream's free space (or
    /// `ext` when the engine is filling a caller's buffer directly).
    fn run_read_stage(&mut self, ext: Option<&mut WriteBuf<'_>>) -> (std::io::Result<Progress>, usize) {
        let last = matches!(
            self.inner.as_deref().map(|i| i.end_status),
            Some(EndStatus::Eof)
        );
        let Stream {
            stage,
            buf,
            wpos,
            inner,
            ..
        } = self;
        let in_slice: &[u8] = match inner.as_deref() {
            Some(up) => &up.buf[up.rpos..up.wpos],
            None => &[],
        };
        let mut input = ReadBuf::new(in_slice);
        let external = ext.is_some();
        let (result, produced) = if let Some(out) = ext {
            let before = out.produced();
            let result = stage.process(&mut input, out, last);
            (result, out.produced() - before)
        } else {
            let mut out = WriteBuf::new(&mut buf[*wpos..]);
            let result = stage.process(&mut input, &mut out, last);
            (result, out.produced())
        };
        let consumed = input.consumed();
        if let Some(up) = inner.as_deref_mut() {
            up.rpos += consumed;
        }
        if !external {
            *wpos += produced;
        }
        trace!(consumed, produced, last, outcome = ?result.as_ref().ok(), "read stage");
        (result, produced)
    }

    /// Runs this stream's stage once in the write direction: input is this
    /// stream's buffered bytes, output is the linked stream's free space.
    /// Terminal sinks get an empty output and consume input directly.
    fn run_write_stage(&mut self, end: bool) -> std::io::Result<Progress> {
        let Stream {
            stage,
            buf,
            rpos,
            wpos,
            inner,
            ..
        } = self;
        let mut input = ReadBuf::new(&buf[*rpos..*wpos]);
        let (result, produced) = if let Some(down) = inner.as_deref_mut() {
            let mut out = WriteBuf::new(&mut down.buf[down.wpos..]);
            let result = stage.process(&mut input, &mut out, end);
            (result, out.produced())
        } else {
            let mut out = WriteBuf::new(&mut []);
            let result = stage.process(&mut input, &mut out, end);
            (result, 0)
        };
        let consumed = input.consumed();
        *rpos += consumed;
        if let Some(down) = inner.as_deref_mut() {
            down.wpos += produced;
        }
        trace!(consumed, produced, end, outcome = ?result.as_ref().ok(), "write stage");
        result
    }
}
