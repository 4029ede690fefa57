#![allow(dead_code)]

use std::io::Result;

use proptest_derive::Arbitrary;

use pspipe::{Filter, ReadStatus, Stream};

/// Test input split into arbitrary chunks, so tests exercise every way a
/// byte sequence can arrive at a pipeline.
#[derive(Arbitrary, Debug, Clone)]
pub struct InputStream(Vec<Vec<u8>>);

impl InputStream {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self(chunks)
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.iter().flatten().copied().collect()
    }
}

/// Pushes `chunks` through a write pipeline built from `stage`, finalizes
/// it, and returns everything that reached the in-memory sink.
pub fn encode(
    stage: impl Filter + 'static,
    chunks: &[Vec<u8>],
    capacity: usize,
) -> Result<Vec<u8>> {
    let total: usize = chunks.iter().map(Vec::len).sum();
    let sink = Stream::write_buffer(total * 3 + 64);
    let mut stream = Stream::write_filter(sink, stage, capacity);
    for chunk in chunks {
        let mut offset = 0;
        while offset < chunk.len() {
            offset += stream.write(&chunk[offset..])?;
        }
    }
    stream.close()?;
    Ok(stream.into_bytes())
}

/// Pulls `data` through a read pipeline built from `stage`, reading
/// `read_size` bytes at a time until end of data.
pub fn decode(
    stage: impl Filter + 'static,
    data: &[u8],
    capacity: usize,
    read_size: usize,
) -> Result<Vec<u8>> {
    let source = Stream::from_bytes(data);
    let mut stream = Stream::filter(source, stage, capacity);
    let mut out = Vec::new();
    let mut buf = vec![0u8; read_size.max(1)];
    loop {
        let (n, status) = stream.read(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        match status {
            ReadStatus::EndOfData => break,
            ReadStatus::Pending => panic!("pipeline stalled while decoding"),
            ReadStatus::Open => {}
        }
    }
    Ok(out)
}
