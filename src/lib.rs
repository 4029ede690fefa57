//! Generic byte-stream filter pipelines with cooperative suspension.
//!
//! A pipeline is a chain of [`Stream`] nodes. Each node owns a buffer and a
//! [`Filter`] stage; a traversal engine moves bytes along the chain on
//! demand, running stages as their inputs fill and their outputs drain.
//! When a stage needs something only the caller can provide, the pipeline
//! suspends in place and resumes later from exactly where it stopped.
//!
//! # Examples
//!
//! Decoding an ASCII-hex encoded string:
//!
//! ```
//! use pspipe::{codec::HexDecoder, ReadEvent, Stream};
//!
//! # fn main() -> std::io::Result<()> {
//! let source = Stream::from_bytes(&b"48656C6C6F>"[..]);
//! let mut stream = Stream::filter(source, HexDecoder::new(), 256);
//! let mut decoded = Vec::new();
//! while let ReadEvent::Byte(byte) = stream.get_byte()? {
//!     decoded.push(byte);
//! }
//! assert_eq!(decoded, b"Hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod adapter;
mod buffer;
pub mod codec;
mod stream;

pub use crate::buffer::{move_bytes, ReadBuf, WriteBuf};
pub use crate::codec::{Filter, Progress};
pub use crate::stream::{ReadEvent, ReadStatus, Stream};
