//! Terminal stages bridging pipelines to in-memory buffers, [`Read`] and
//! [`Write`] implementations, and caller-driven procedure sources.

use std::fmt;
use std::fs::File;
use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};

use crate::buffer::{ReadBuf, WriteBuf};
use crate::codec::{Filter, Progress};

/// Terminal stage for a fixed in-memory read stream. The node's buffer IS
/// the data, so there is never anything to produce.
#[derive(Debug)]
pub(crate) struct StringRead;

impl Filter for StringRead {
    fn process(
        &mut self,
        _input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        _last: bool,
    ) -> Result<Progress> {
        Ok(Progress::EndOfData)
    }
}

/// Terminal stage for a fixed-capacity in-memory write stream. Draining is
/// only legal at finalization; bytes arriving before that mean the fixed
/// buffer overflowed.
#[derive(Debug)]
pub(crate) struct StringWrite;

impl Filter for StringWrite {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        if last {
            return Ok(Progress::EndOfData);
        }
        if input.is_empty() {
            Ok(Progress::NeedInput)
        } else {
            Err(Error::new(
                ErrorKind::WriteZero,
                "fixed write buffer overflowed",
            ))
        }
    }
}

/// Terminal source pulling from any [`Read`] implementation.
pub(crate) struct ReaderSource<R> {
    reader: R,
}

impl<R> ReaderSource<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> Filter for ReaderSource<R> {
    fn process(
        &mut self,
        _input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        _last: bool,
    ) -> Result<Progress> {
        if output.is_full() {
            return Ok(Progress::NeedOutput);
        }
        match self.reader.read(output.unwritten()) {
            Ok(0) => Ok(Progress::EndOfData),
            Ok(n) => {
                output.advance(n);
                if output.is_full() {
                    Ok(Progress::NeedOutput)
                } else {
                    Ok(Progress::NeedInput)
                }
            }
            Err(error)
                if error.kind() == ErrorKind::Interrupted
                    || error.kind() == ErrorKind::WouldBlock =>
            {
                // nothing available right now; the consumer sees Pending
                Ok(Progress::NeedInput)
            }
            Err(error) => Err(error),
        }
    }
}

impl<R> fmt::Debug for ReaderSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource").finish_non_exhaustive()
    }
}

/// Terminal sink pushing into any [`Write`] implementation.
pub(crate) struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> Filter for WriterSink<W> {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        while !input.is_empty() {
            match self.writer.write(input.unread()) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    ))
                }
                Ok(n) => input.advance(n),
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        if last {
            self.writer.flush()?;
            Ok(Progress::EndOfData)
        } else {
            Ok(Progress::NeedInput)
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }
}

impl<W> fmt::Debug for WriterSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

/// Seekable terminal source over a file.
#[derive(Debug)]
pub(crate) struct FileSource {
    file: File,
}

impl FileSource {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }
}

impl Filter for FileSource {
    fn process(
        &mut self,
        _input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        _last: bool,
    ) -> Result<Progress> {
        if output.is_full() {
            return Ok(Progress::NeedOutput);
        }
        match self.file.read(output.unwritten()) {
            Ok(0) => Ok(Progress::EndOfData),
            Ok(n) => {
                output.advance(n);
                if output.is_full() {
                    Ok(Progress::NeedOutput)
                } else {
                    Ok(Progress::NeedInput)
                }
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => Ok(Progress::NeedInput),
            Err(error) => Err(error),
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}

/// Seekable terminal sink over a file.
#[derive(Debug)]
pub(crate) struct FileSink {
    file: File,
}

impl FileSink {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }
}

impl Filter for FileSink {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        while !input.is_empty() {
            match self.file.write(input.unread()) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::WriteZero,
                        "file accepted no bytes",
                    ))
                }
                Ok(n) => input.advance(n),
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        if last {
            self.file.flush()?;
            Ok(Progress::EndOfData)
        } else {
            Ok(Progress::NeedInput)
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}

/// Terminal sink whose output is collected by the caller through the
/// suspension protocol: buffered input suspends the pipeline until the
/// host takes the pending bytes.
#[derive(Debug)]
pub(crate) struct CallbackSink;

impl Filter for CallbackSink {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        last: bool,
    ) -> Result<Progress> {
        if !input.is_empty() {
            return Ok(Progress::Callback);
        }
        if last {
            Ok(Progress::EndOfData)
        } else {
            Ok(Progress::NeedInput)
        }
    }
}

/// Terminal source whose data arrives from the caller through the
/// suspension protocol: every refill suspends until fulfilled.
#[derive(Debug)]
pub(crate) struct CallbackSource;

impl Filter for CallbackSource {
    fn process(
        &mut self,
        _input: &mut ReadBuf<'_>,
        _output: &mut WriteBuf<'_>,
        _last: bool,
    ) -> Result<Progress> {
        Ok(Progress::Callback)
    }
}
