//! The stateful pipeline node and its consumer-facing operations.

use std::fmt;
use std::fs::File;
use std::io::{Error, ErrorKind, Read, Result, Write};

use tracing::trace;

use crate::adapter::{
    CallbackSink, CallbackSource, FileSink, FileSource, ReaderSource, StringRead, StringWrite,
    WriterSink,
};
use crate::codec::Filter;

mod engine;

/// Result of a single-byte read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// The next byte of the stream.
    Byte(u8),
    /// The stream ended cleanly; it has been closed.
    EndOfData,
    /// Nothing is available right now: either a suspension (callback or
    /// interrupt) is pending, or a terminal source had no data to offer.
    Pending,
}

/// Condition observed at the end of a block transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// More data may follow.
    Open,
    /// The stream ended cleanly.
    EndOfData,
    /// The transfer stopped on a pending suspension or an empty source.
    Pending,
}

/// Status recorded at the end of a stream's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EndStatus {
    Clear,
    Eof,
    Error,
    Callback,
    Interrupt,
}

/// A pipeline node: one stage, one owned buffer, and an optional link to the
/// stream it reads from (when reading) or writes to (when writing).
///
/// `buf[..rpos]` has been consumed, `buf[rpos..wpos]` is filled but unread,
/// and `buf[wpos..]` is free space. The same physical buffer serves as the
/// read side and the write side at different times, never concurrently.
pub struct Stream {
    stage: Box<dyn Filter>,
    buf: Vec<u8>,
    rpos: usize,
    wpos: usize,
    end_status: EndStatus,
    last_error: Option<Error>,
    /// Offset of the buffer's start within the logical stream; grows with
    /// every compaction so position queries stay correct.
    base: u64,
    inner: Option<Box<Stream>>,
    is_temp: bool,
    /// The buffer itself is the terminal storage (fixed in-memory streams);
    /// such nodes are never compacted or drained through their stage.
    in_place: bool,
    readable: bool,
    writable: bool,
    seekable: bool,
    closed: bool,
}

impl Stream {
    fn node(stage: Box<dyn Filter>, buf: Vec<u8>) -> Self {
        Self {
            stage,
            buf,
            rpos: 0,
            wpos: 0,
            end_status: EndStatus::Clear,
            last_error: None,
            base: 0,
            inner: None,
            is_temp: false,
            in_place: false,
            readable: false,
            writable: false,
            seekable: false,
            closed: false,
        }
    }

    /// Creates a read stream over a fixed in-memory byte sequence.
    ///
    /// The whole sequence is immediately available; exhausting it is a
    /// permanent end of data.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let buf = data.into();
        let len = buf.len();
        let mut s = Self::node(Box::new(StringRead), buf);
        s.wpos = len;
        s.end_status = EndStatus::Eof;
        s.in_place = true;
        s.readable = true;
        s.seekable = true;
        s
    }

    /// Creates a write stream over a fixed-capacity in-memory buffer.
    ///
    /// Writing more than `capacity` bytes is an error. Retrieve the written
    /// bytes with [`into_bytes`](Stream::into_bytes).
    pub fn write_buffer(capacity: usize) -> Self {
        let mut s = Self::node(Box::new(StringWrite), vec![0; capacity]);
        s.in_place = true;
        s.writable = true;
        s.seekable = true;
        s
    }

    /// Creates a read stream pulling from any [`Read`] implementation.
    pub fn reader(reader: impl Read + 'static, capacity: usize) -> Self {
        let mut s = Self::node(
            Box::new(ReaderSource::new(reader)),
            vec![0; capacity.max(1)],
        );
        s.readable = true;
        s
    }

    /// Creates a write stream pushing into any [`Write`] implementation.
    pub fn writer(writer: impl Write + 'static, capacity: usize) -> Self {
        let mut s = Self::node(
            Box::new(WriterSink::new(writer)),
            vec![0; capacity.max(1)],
        );
        s.writable = true;
        s
    }

    /// Creates a seekable read stream over a file.
    pub fn read_file(file: File, capacity: usize) -> Self {
        let mut s = Self::node(Box::new(FileSource::new(file)), vec![0; capacity.max(1)]);
        s.readable = true;
        s.seekable = true;
        s
    }

    /// Creates a seekable write stream over a file.
    pub fn write_file(file: File, capacity: usize) -> Self {
        let mut s = Self::node(Box::new(FileSink::new(file)), vec![0; capacity.max(1)]);
        s.writable = true;
        s.seekable = true;
        s
    }

    /// Creates a read stream fed by the host through the suspension
    /// protocol: every refill reports [`ReadEvent::Pending`] until the host
    /// calls [`fulfill`](Stream::fulfill).
    pub fn callback_source(capacity: usize) -> Self {
        let mut s = Self::node(Box::new(CallbackSource), vec![0; capacity.max(1)]);
        s.readable = true;
        s
    }

    /// Creates a write stream whose output is handed back to the caller
    /// through the suspension protocol: draining suspends until the host
    /// collects the pending bytes with
    /// [`take_pending`](Stream::take_pending).
    pub fn callback_sink(capacity: usize) -> Self {
        let mut s = Self::node(Box::new(CallbackSink), vec![0; capacity.max(1)]);
        s.writable = true;
        s
    }

    /// Stacks a decoding stage on top of `inner`, forming a read pipeline.
    ///
    /// The buffer capacity is clamped to the stage's declared minimum output
    /// size plus one spare byte for end-marker look-ahead.
    pub fn filter(inner: Stream, stage: impl Filter + 'static, capacity: usize) -> Self {
        let cap = capacity.max(stage.min_output() + 1);
        let mut s = Self::node(Box::new(stage), vec![0; cap]);
        s.inner = Some(Box::new(inner));
        s.readable = true;
        s
    }

    /// Stacks an encoding stage in front of `inner`, forming a write
    /// pipeline that drains toward `inner`.
    pub fn write_filter(inner: Stream, stage: impl Filter + 'static, capacity: usize) -> Self {
        let cap = capacity.max(stage.min_input() + 1);
        let mut s = Self::node(Box::new(stage), vec![0; cap]);
        s.inner = Some(Box::new(inner));
        s.writable = true;
        s
    }

    /// Marks this stream as synthesized: the write-direction engine asserts
    /// the final-flush flag through temporary streams in one pass when the
    /// stream above them finalizes.
    pub fn temporary(mut self) -> Self {
        self.is_temp = true;
        self
    }

    /// The linked stream, if this node is a filter.
    pub fn get_ref(&self) -> Option<&Stream> {
        self.inner.as_deref()
    }

    /// Mutable access to the linked stream.
    pub fn get_mut(&mut self) -> Option<&mut Stream> {
        self.inner.as_deref_mut()
    }

    /// Detaches and returns the linked stream without finalizing anything.
    pub fn into_inner(mut self) -> Option<Stream> {
        self.inner.take().map(|boxed| *boxed)
    }

    /// Whether this stream reads.
    pub fn is_reading(&self) -> bool {
        self.readable
    }

    /// Whether this stream writes.
    pub fn is_writing(&self) -> bool {
        self.writable
    }

    /// Whether [`seek`](Stream::seek) is supported.
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current absolute offset within the logical stream.
    pub fn position(&self) -> u64 {
        if self.writable {
            self.base + self.wpos as u64
        } else {
            self.base + self.rpos as u64
        }
    }

    /// Buffered bytes immediately available for reading, when knowable.
    ///
    /// Only fixed in-memory read streams can answer; filter-backed streams
    /// return `None`.
    pub fn available(&self) -> Option<u64> {
        if self.in_place && self.readable {
            Some((self.wpos - self.rpos) as u64)
        } else {
            None
        }
    }

    /// Minimum bytes that must stay in the buffer to support filter
    /// end-marker look-ahead: one for filters and procedure sources, zero
    /// for plain terminal streams.
    fn min_left(&self) -> usize {
        if self.inner.is_none() && self.end_status != EndStatus::Callback {
            0
        } else {
            1
        }
    }

    /// Shifts unread bytes down to offset 0, reclaiming space and advancing
    /// `base` so position queries stay correct. Skipped while a suspension
    /// or terminal status is recorded, because saved continuation state
    /// references the buffer by relative offset until explicitly resumed.
    fn compact(&mut self, always: bool) {
        if self.in_place {
            return;
        }
        if self.rpos > 0 && (always || self.end_status == EndStatus::Clear) {
            self.buf.copy_within(self.rpos..self.wpos, 0);
            self.base += self.rpos as u64;
            self.wpos -= self.rpos;
            self.rpos = 0;
        }
    }

    fn take_error(&mut self) -> Error {
        self.last_error
            .take()
            .unwrap_or_else(|| Error::new(ErrorKind::Other, "stream is in an error state"))
    }

    /// Reads one byte.
    ///
    /// Refills the pipeline as needed, keeping one byte of look-ahead for
    /// filter-backed streams so an end-of-data marker immediately after the
    /// last data byte closes the stream without another call. A clean end
    /// of data closes the stream automatically.
    pub fn get_byte(&mut self) -> Result<ReadEvent> {
        if self.closed {
            return Ok(ReadEvent::EndOfData);
        }
        if !self.readable {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stream is not readable",
            ));
        }
        let min_left = self.min_left();
        loop {
            let left = self.wpos - self.rpos;
            if left > min_left || self.end_status != EndStatus::Clear {
                break;
            }
            engine::refill(self);
            let after = self.wpos - self.rpos;
            if after == left && self.end_status == EndStatus::Clear {
                // a terminal source with nothing to offer right now
                return Ok(ReadEvent::Pending);
            }
        }
        let left = self.wpos - self.rpos;
        if left > min_left {
            let byte = self.buf[self.rpos];
            self.rpos += 1;
            return Ok(ReadEvent::Byte(byte));
        }
        match self.end_status {
            EndStatus::Eof | EndStatus::Error if left > 0 => {
                // the look-ahead margin is real data once the stream ends
                let byte = self.buf[self.rpos];
                self.rpos += 1;
                Ok(ReadEvent::Byte(byte))
            }
            EndStatus::Eof => {
                self.compact(true);
                self.shutdown()?;
                Ok(ReadEvent::EndOfData)
            }
            EndStatus::Error => Err(self.take_error()),
            EndStatus::Callback | EndStatus::Interrupt => Ok(ReadEvent::Pending),
            EndStatus::Clear => Ok(ReadEvent::Pending),
        }
    }

    /// Pushes back the byte most recently read. The byte must match what
    /// was read; this is a one-byte rewind, not a general unread facility.
    pub fn unget_byte(&mut self, byte: u8) -> Result<()> {
        if !self.readable || self.rpos == 0 || self.buf[self.rpos - 1] != byte {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "push-back does not match the last byte read",
            ));
        }
        self.rpos -= 1;
        Ok(())
    }

    /// Writes one byte, draining the pipeline when the buffer fills.
    pub fn put_byte(&mut self, byte: u8) -> Result<()> {
        if !self.writable {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stream is not writable",
            ));
        }
        loop {
            if self.closed {
                return Err(Error::new(ErrorKind::Other, "stream is closed"));
            }
            match self.end_status {
                EndStatus::Clear => {}
                EndStatus::Eof => {
                    return Err(Error::new(ErrorKind::Other, "stream is finalized"))
                }
                EndStatus::Error => return Err(self.take_error()),
                EndStatus::Callback | EndStatus::Interrupt => {
                    return Err(Error::new(
                        ErrorKind::WouldBlock,
                        "stream is suspended; fulfill or resume it first",
                    ))
                }
            }
            if self.wpos < self.buf.len() {
                self.buf[self.wpos] = byte;
                self.wpos += 1;
                return Ok(());
            }
            engine::drain(self, false)?;
            self.compact(false);
            if self.wpos >= self.buf.len() && self.end_status == EndStatus::Clear {
                return Err(Error::new(
                    ErrorKind::Other,
                    "pipeline made no progress draining a full buffer",
                ));
            }
        }
    }

    /// Reads up to `out.len()` bytes, returning how many were read and the
    /// condition that stopped the transfer.
    ///
    /// If an error interrupts a transfer that already moved bytes, the
    /// moved count is returned and the error is reported by the next
    /// operation.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(usize, ReadStatus)> {
        if !self.readable {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stream is not readable",
            ));
        }
        let mut n = 0;
        let mut status = ReadStatus::Open;
        while n < out.len() {
            let min_left = self.min_left();
            let left = self.wpos - self.rpos;
            if left > min_left {
                // bulk copy, holding back the look-ahead margin
                let take = (left - min_left).min(out.len() - n);
                out[n..n + take].copy_from_slice(&self.buf[self.rpos..self.rpos + take]);
                self.rpos += take;
                n += take;
                continue;
            }
            let wanted = out.len() - n;
            if left == 0
                && !self.closed
                && self.end_status == EndStatus::Clear
                && wanted > min_left
                && wanted >= self.buf.len() / 4
                && wanted >= self.stage.min_output()
            {
                // large request: hand the caller's buffer to the engine
                // directly, reserving the margin
                let produced = engine::refill_into(self, &mut out[n..n + wanted - min_left]);
                self.base += produced as u64;
                n += produced;
                if produced == 0 && self.end_status == EndStatus::Clear {
                    status = ReadStatus::Pending;
                    break;
                }
                continue;
            }
            match self.get_byte() {
                Ok(ReadEvent::Byte(byte)) => {
                    out[n] = byte;
                    n += 1;
                }
                Ok(ReadEvent::EndOfData) => {
                    status = ReadStatus::EndOfData;
                    break;
                }
                Ok(ReadEvent::Pending) => {
                    status = ReadStatus::Pending;
                    break;
                }
                Err(error) => {
                    if n == 0 {
                        return Err(error);
                    }
                    self.end_status = EndStatus::Error;
                    self.last_error = Some(error);
                    break;
                }
            }
        }
        Ok((n, status))
    }

    /// Writes a whole slice, returning how many bytes were accepted.
    ///
    /// Like [`read`](Stream::read), an error after partial progress is
    /// deferred to the next operation.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stream is not writable",
            ));
        }
        let mut written = 0;
        while written < data.len() {
            let space = self.buf.len() - self.wpos;
            if space > 0 {
                let take = space.min(data.len() - written);
                self.buf[self.wpos..self.wpos + take]
                    .copy_from_slice(&data[written..written + take]);
                self.wpos += take;
                written += take;
            } else {
                match self.put_byte(data[written]) {
                    Ok(()) => written += 1,
                    Err(error) => {
                        if written == 0 {
                            return Err(error);
                        }
                        // a suspension is not an error; leave its mark in
                        // place for fulfill/take_pending
                        if error.kind() != ErrorKind::WouldBlock {
                            self.end_status = EndStatus::Error;
                            self.last_error = Some(error);
                        }
                        break;
                    }
                }
            }
        }
        Ok(written)
    }

    /// Discards up to `n` bytes from a read stream, seeking when the stream
    /// supports it. Returns how many bytes were actually skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        if !self.readable {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stream is not readable",
            ));
        }
        if self.seekable {
            let pos = self.position();
            let mut target = pos + n;
            if let Some(left) = self.available() {
                // past the end of a bounded stream, skip what is there
                target = target.min(pos + left);
            }
            self.seek(target)?;
            return Ok(target - pos);
        }
        let mut remaining = n;
        while remaining > 0 {
            let min_left = self.min_left() as u64;
            let left = (self.wpos - self.rpos) as u64;
            if left > min_left && left - min_left >= remaining {
                self.rpos += remaining as usize;
                return Ok(n);
            }
            let take = left.saturating_sub(min_left);
            self.rpos += take as usize;
            remaining -= take;
            match self.get_byte()? {
                ReadEvent::Byte(_) => remaining -= 1,
                ReadEvent::EndOfData | ReadEvent::Pending => break,
            }
        }
        Ok(n - remaining)
    }

    /// Flushes the stream.
    ///
    /// For a write stream this drains all buffered data through the
    /// pipeline (without finalizing any stage) and flushes the terminal
    /// sink. For a read stream it discards input until end of data.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.writable {
            if self.in_place {
                return Ok(());
            }
            match self.end_status {
                EndStatus::Error => return Err(self.take_error()),
                EndStatus::Clear => {}
                _ => return Ok(()),
            }
            engine::drain(self, false)?;
            self.compact(false);
            self.stage.flush()?;
            if let Some(inner) = self.inner.as_deref_mut() {
                inner.flush()?;
            }
            Ok(())
        } else {
            loop {
                self.rpos = self.wpos;
                match self.end_status {
                    EndStatus::Clear => {}
                    EndStatus::Error => return Err(self.take_error()),
                    _ => return Ok(()),
                }
                let before = self.wpos - self.rpos;
                engine::refill(self);
                if self.wpos - self.rpos == before && self.end_status == EndStatus::Clear {
                    // empty source; nothing more to discard right now
                    return Ok(());
                }
            }
        }
    }

    /// Closes the stream: finalizes and drains buffered output if writing,
    /// then releases stage state bottom-up through every owned inner
    /// stream. A pending suspension is force-discarded. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.shutdown()
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        trace!(temporary = self.is_temp, "closing stream");
        let mut result = Ok(());
        if self.writable && !self.in_place && self.end_status == EndStatus::Clear {
            result = engine::drain(self, true);
        }
        if let Some(mut inner) = self.inner.take() {
            let inner_result = inner.shutdown();
            if result.is_ok() {
                result = inner_result;
            }
        }
        self.stage.release();
        self.closed = true;
        self.end_status = EndStatus::Eof;
        if !self.in_place {
            self.buf = Vec::new();
            self.rpos = 0;
            self.wpos = 0;
        }
        result
    }

    /// Repositions a seekable stream.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if !self.seekable || self.closed {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "stream is not seekable",
            ));
        }
        if self.in_place {
            if self.readable {
                if pos > self.wpos as u64 {
                    return Err(Error::new(ErrorKind::InvalidInput, "seek past end"));
                }
                self.rpos = pos as usize;
            } else {
                if pos > self.buf.len() as u64 {
                    return Err(Error::new(ErrorKind::InvalidInput, "seek past end"));
                }
                self.wpos = pos as usize;
            }
            return Ok(());
        }
        if self.writable && self.end_status == EndStatus::Clear {
            engine::drain(self, false)?;
        }
        self.stage.seek(pos)?;
        self.rpos = 0;
        self.wpos = 0;
        self.base = pos;
        if self.end_status == EndStatus::Eof {
            self.end_status = EndStatus::Clear;
        }
        Ok(())
    }

    /// Discards buffered data and resets the stage for reuse. A fixed
    /// in-memory read stream rewinds to its start instead.
    pub fn reset(&mut self) {
        if self.closed {
            return;
        }
        if self.in_place {
            if self.readable {
                self.rpos = 0;
            } else {
                self.rpos = 0;
                self.wpos = 0;
            }
            self.stage.reset();
            return;
        }
        self.rpos = 0;
        self.wpos = 0;
        self.end_status = EndStatus::Clear;
        self.last_error = None;
        self.stage.reset();
    }

    /// Resumes a pending callback suspension by supplying the bytes the
    /// caller-provided procedure produced. An empty slice marks the
    /// procedure source as exhausted.
    ///
    /// At most one suspension is pending per pipeline; calling this without
    /// one is an error. The suspended stream's buffer is re-anchored
    /// (compacted) here, the single point where relative continuation state
    /// is reconciled with the buffer.
    pub fn fulfill(&mut self, data: &[u8]) -> Result<()> {
        if self.end_status != EndStatus::Callback {
            return Err(Error::new(ErrorKind::Other, "no callback is pending"));
        }
        let descend = matches!(
            self.inner.as_deref().map(|inner| inner.end_status),
            Some(EndStatus::Callback)
        );
        self.end_status = EndStatus::Clear;
        if descend {
            if let Some(inner) = self.inner.as_deref_mut() {
                return inner.fulfill(data);
            }
        }
        if data.is_empty() {
            self.end_status = EndStatus::Eof;
            return Ok(());
        }
        self.compact(true);
        if self.buf.len() - self.wpos < data.len() {
            self.buf.resize(self.wpos + data.len(), 0);
        }
        self.buf[self.wpos..self.wpos + data.len()].copy_from_slice(data);
        self.wpos += data.len();
        Ok(())
    }

    /// Collects the bytes a suspended callback sink is waiting to hand
    /// over, clearing the suspension so writing can continue.
    pub fn take_pending(&mut self) -> Result<Vec<u8>> {
        if self.end_status != EndStatus::Callback {
            return Err(Error::new(ErrorKind::Other, "no callback is pending"));
        }
        let descend = matches!(
            self.inner.as_deref().map(|inner| inner.end_status),
            Some(EndStatus::Callback)
        );
        self.end_status = EndStatus::Clear;
        if descend {
            if let Some(inner) = self.inner.as_deref_mut() {
                return inner.take_pending();
            }
        }
        let bytes = self.buf[self.rpos..self.wpos].to_vec();
        self.base += self.wpos as u64;
        self.rpos = 0;
        self.wpos = 0;
        Ok(bytes)
    }

    /// Clears a pending interrupt suspension after the host has serviced
    /// it; the next operation resumes where it left off.
    pub fn resume(&mut self) -> Result<()> {
        if self.end_status != EndStatus::Interrupt {
            return Err(Error::new(ErrorKind::Other, "no interrupt is pending"));
        }
        let descend = matches!(
            self.inner.as_deref().map(|inner| inner.end_status),
            Some(EndStatus::Interrupt)
        );
        self.end_status = EndStatus::Clear;
        if descend {
            if let Some(inner) = self.inner.as_deref_mut() {
                return inner.resume();
            }
        }
        Ok(())
    }

    /// Consumes the pipeline and returns the terminal node's buffered
    /// bytes: for a write pipeline, everything written to its in-memory
    /// sink. Call [`close`](Stream::close) first to finalize.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut node = self;
        while let Some(next) = node.inner.take() {
            node = *next;
        }
        let mut buf = node.buf;
        buf.truncate(node.wpos);
        buf
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("rpos", &self.rpos)
            .field("wpos", &self.wpos)
            .field("capacity", &self.buf.len())
            .field("end_status", &self.end_status)
            .field("base", &self.base)
            .field("is_temp", &self.is_temp)
            .field("closed", &self.closed)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
