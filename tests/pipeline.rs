use std::cell::RefCell;
use std::io::{self, ErrorKind, Write};
use std::rc::Rc;

use ntest::timeout;
use rand::{rngs::StdRng, Rng, SeedableRng};

use pspipe::codec::{self, HexDecoder, HexEncoder, RleDecoder, RleEncoder};
use pspipe::{move_bytes, Filter, Progress, ReadBuf, ReadEvent, ReadStatus, Stream, WriteBuf};

mod utils;
use utils::{decode, encode};

fn read_to_end(stream: &mut Stream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match stream.get_byte()? {
            ReadEvent::Byte(byte) => out.push(byte),
            ReadEvent::EndOfData => return Ok(out),
            ReadEvent::Pending => panic!("pipeline stalled"),
        }
    }
}

#[test]
fn hex_decode_byte_at_a_time() {
    // an output buffer this small forces the decoder to produce one byte
    // per engine pass
    let source = Stream::from_bytes(&b"48656C6C6F>"[..]);
    let mut stream = Stream::filter(source, HexDecoder::new(), 1);
    assert_eq!(read_to_end(&mut stream).unwrap(), b"Hello");
    assert!(stream.is_closed());
    // reading past the end stays at end of data
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::EndOfData);
}

#[test]
fn hex_decode_skips_whitespace_and_case() {
    let decoded = decode(HexDecoder::new(), b" 48 65\n6c6C\t6F >", 16, 4).unwrap();
    assert_eq!(decoded, b"Hello");
}

#[test]
fn hex_decode_odd_digit_before_marker() {
    // a trailing odd digit supplies the high nibble of one final byte
    let decoded = decode(HexDecoder::new(), b"414>", 16, 4).unwrap();
    assert_eq!(decoded, [0x41, 0x40]);
}

#[test]
fn hex_decode_rejects_invalid_character() {
    let err = decode(HexDecoder::new(), b"4G>", 16, 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn hex_encode_writes_terminator() {
    let encoded = encode(HexEncoder::new(), &[b"Hello".to_vec()], 8).unwrap();
    assert_eq!(encoded, b"48656c6c6f>");
}

#[test]
fn hex_encode_line_break_ignores_buffering() {
    // a break belongs between records, so a stream ending exactly on a
    // line boundary terminates without one however the bytes trickle in
    let data = vec![0xab; 32];
    let roomy = encode(HexEncoder::new(), &[data.clone()], 64).unwrap();
    let tight = encode(HexEncoder::new(), &[data], 2).unwrap();
    assert_eq!(roomy, tight);
    assert!(roomy.ends_with(b"ab>"));
    assert!(!roomy.contains(&b'\n'));
    let longer = encode(HexEncoder::new(), &[vec![0xab; 33]], 64).unwrap();
    assert!(longer.ends_with(b"\nab>"));
}

#[test]
fn rle_finalize_without_pending_data_emits_marker_once() {
    let encoded = encode(RleEncoder::new(), &[], 8).unwrap();
    assert_eq!(encoded, [128]);
}

#[test]
fn rle_encode_run_and_marker() {
    let encoded = encode(RleEncoder::new(), &[b"aaaa".to_vec()], 8).unwrap();
    assert_eq!(encoded, [253, b'a', 128]);
}

#[test]
fn rle_round_trip_mixed_runs_and_literals() {
    let mut data = Vec::new();
    data.extend_from_slice(b"abcdef");
    data.extend_from_slice(&[b'x'; 300]);
    data.extend_from_slice(b"tail");
    let encoded = encode(RleEncoder::new(), &[data.clone()], 32).unwrap();
    let decoded = decode(RleDecoder::new(), &encoded, 32, 7).unwrap();
    assert_eq!(decoded, data);
}

#[test]
fn rle_decode_truncated_record_is_an_error() {
    // a literal header promising three bytes, followed by nothing
    let err = decode(RleDecoder::new(), &[2], 16, 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn rle_decode_tolerates_end_at_record_boundary() {
    let decoded = decode(RleDecoder::new(), &[1, b'h', b'i'], 16, 4).unwrap();
    assert_eq!(decoded, b"hi");
}

/// A sink that accepts a single byte per call.
struct TrickleSink(Rc<RefCell<Vec<u8>>>);

impl Write for TrickleSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.0.borrow_mut().push(buf[0]);
        Ok(1)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
#[timeout(10000)]
fn drain_through_one_byte_sink() {
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = Stream::writer(TrickleSink(Rc::clone(&collected)), 1);
    let mut stream = Stream::write_filter(sink, HexEncoder::new(), 1);
    let data: Vec<u8> = (0..=255).collect();
    let mut offset = 0;
    while offset < data.len() {
        offset += stream.write(&data[offset..]).unwrap();
    }
    stream.close().unwrap();
    let encoded = collected.borrow().clone();
    let decoded = decode(HexDecoder::new(), &encoded, 64, 16).unwrap();
    assert_eq!(decoded, data);
}

#[test]
#[timeout(10000)]
fn progress_with_minimal_buffers() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let data: Vec<u8> = (0..500).map(|_| rng.random()).collect();
    let source = Stream::from_bytes(data.clone());
    let copied = Stream::filter(source, codec::Copy::new(), 1);
    let mut stream = Stream::filter(copied, HexEncoder::new(), 1);
    let encoded = read_to_end(&mut stream).unwrap();
    let decoded = decode(HexDecoder::new(), &encoded, 64, 16).unwrap();
    assert_eq!(decoded, data);
}

#[test]
fn large_block_read_bypasses_the_buffer() {
    let mut rng = StdRng::seed_from_u64(0xb10c);
    let data: Vec<u8> = (0..10240).map(|_| rng.random()).collect();
    let source = Stream::from_bytes(data.clone());
    let mut stream = Stream::filter(source, codec::Copy::new(), 1024);
    let mut out = vec![0u8; 16384];
    let (n, status) = stream.read(&mut out).unwrap();
    assert_eq!(&out[..n], &data[..]);
    assert_eq!(status, ReadStatus::EndOfData);
}

#[test]
fn unget_rewinds_exactly_one_byte() {
    let mut stream = Stream::from_bytes(&b"stream"[..]);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b's'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b't'));
    stream.unget_byte(b't').unwrap();
    assert_eq!(stream.position(), 1);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b't'));
    // push-back must match what was read
    assert!(stream.unget_byte(b'x').is_err());
}

#[test]
fn seek_and_position_on_memory_stream() {
    let mut stream = Stream::from_bytes(&b"stream"[..]);
    let mut buf = [0u8; 3];
    let (n, _) = stream.read(&mut buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(stream.position(), 3);
    stream.seek(1).unwrap();
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b't'));
    assert!(stream.seek(100).is_err());
}

#[test]
fn skip_discards_bytes() {
    let source = Stream::from_bytes(&b"0123456789"[..]);
    let mut stream = Stream::filter(source, codec::Copy::new(), 4);
    assert_eq!(stream.skip(4).unwrap(), 4);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'4'));
    // skipping past the end reports how much was really skipped
    assert_eq!(stream.skip(100).unwrap(), 5);
}

#[test]
fn skip_clamps_at_the_end_of_a_seekable_stream() {
    let mut stream = Stream::from_bytes(&b"0123456789"[..]);
    assert_eq!(stream.skip(4).unwrap(), 4);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'4'));
    assert_eq!(stream.skip(100).unwrap(), 5);
    assert_eq!(stream.position(), 10);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::EndOfData);
}

#[test]
fn fixed_write_buffer_overflow_is_an_error() {
    let mut stream = Stream::write_buffer(4);
    assert_eq!(stream.write(b"hello").unwrap(), 4);
    let err = stream.write(b"!").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteZero);
}

#[test]
fn write_buffer_collects_written_bytes() {
    let mut stream = Stream::write_buffer(16);
    stream.write(b"hello").unwrap();
    stream.close().unwrap();
    assert_eq!(stream.into_bytes(), b"hello");
}

#[test]
fn reset_allows_reuse() {
    let mut stream = Stream::write_buffer(16);
    stream.write(b"scratch").unwrap();
    stream.reset();
    stream.write(b"kept").unwrap();
    stream.close().unwrap();
    assert_eq!(stream.into_bytes(), b"kept");
}

#[test]
fn flush_pushes_buffered_output_to_the_sink() {
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = Stream::writer(TrickleSink(Rc::clone(&collected)), 8);
    let mut stream = Stream::write_filter(sink, codec::Copy::new(), 8);
    stream.write(b"abc").unwrap();
    stream.flush().unwrap();
    assert_eq!(&*collected.borrow(), b"abc");
    assert!(!stream.is_closed());
    stream.write(b"def").unwrap();
    stream.close().unwrap();
    assert_eq!(&*collected.borrow(), b"abcdef");
}

#[test]
fn writes_after_close_are_rejected() {
    let mut stream = Stream::write_buffer(16);
    stream.write(b"x").unwrap();
    stream.close().unwrap();
    assert!(stream.put_byte(b'y').is_err());
}

/// Pass-through stage that records when it is released.
struct Recording {
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Filter for Recording {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> io::Result<Progress> {
        move_bytes(input, output);
        if !input.is_empty() {
            Ok(Progress::NeedOutput)
        } else if last {
            Ok(Progress::EndOfData)
        } else {
            Ok(Progress::NeedInput)
        }
    }

    fn release(&mut self) {
        self.log.borrow_mut().push(self.name);
    }
}

#[test]
fn close_cascades_innermost_first_exactly_once() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let source = Stream::from_bytes(&b"payload"[..]);
    let inner = Stream::filter(
        source,
        Recording {
            name: "inner",
            log: Rc::clone(&log),
        },
        8,
    );
    let mut stream = Stream::filter(
        inner,
        Recording {
            name: "outer",
            log: Rc::clone(&log),
        },
        8,
    );
    stream.close().unwrap();
    assert_eq!(&*log.borrow(), &["inner", "outer"]);
    // closing again releases nothing
    stream.close().unwrap();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn reading_to_end_closes_the_pipeline() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let source = Stream::from_bytes(&b"payload"[..]);
    let mut stream = Stream::filter(
        source,
        Recording {
            name: "stage",
            log: Rc::clone(&log),
        },
        8,
    );
    assert_eq!(read_to_end(&mut stream).unwrap(), b"payload");
    assert!(stream.is_closed());
    assert_eq!(&*log.borrow(), &["stage"]);
}

/// Pass-through stage that ends its stream after a fixed byte budget,
/// recording when it is released.
struct Budgeted {
    left: usize,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Filter for Budgeted {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        _last: bool,
    ) -> io::Result<Progress> {
        while self.left > 0 {
            let byte = match input.peek() {
                Some(byte) => byte,
                None => return Ok(Progress::NeedInput),
            };
            if output.is_full() {
                return Ok(Progress::NeedOutput);
            }
            input.advance(1);
            output.put(byte);
            self.left -= 1;
        }
        Ok(Progress::EndOfData)
    }

    fn release(&mut self) {
        self.log.borrow_mut().push("budgeted");
    }
}

#[test]
fn drained_filter_is_closed_in_place() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let source = Stream::from_bytes(&b"abcdef"[..]);
    let limited = Stream::filter(
        source,
        Budgeted {
            left: 3,
            log: Rc::clone(&log),
        },
        8,
    );
    let mut stream = Stream::filter(
        limited,
        Recording {
            name: "outer",
            log: Rc::clone(&log),
        },
        8,
    );
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'a'));
    // the exhausted middle filter is released while this stream is still
    // serving the bytes it produced
    assert_eq!(&*log.borrow(), &["budgeted"]);
    assert!(!stream.is_closed());
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'b'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'c'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::EndOfData);
    assert_eq!(&*log.borrow(), &["budgeted", "outer"]);
}

#[test]
fn callback_source_suspends_and_resumes() {
    let source = Stream::callback_source(16);
    let mut stream = Stream::filter(source, HexDecoder::new(), 16);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Pending);
    // asking again without fulfilling changes nothing
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Pending);
    stream.fulfill(b"4142").unwrap();
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'A'));
    // the second byte stays behind the look-ahead margin until the source
    // settles
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Pending);
    stream.fulfill(b"").unwrap();
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'B'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::EndOfData);
}

#[test]
fn callback_sink_hands_chunks_to_the_host() {
    let mut stream = Stream::callback_sink(4);
    assert_eq!(stream.write(b"abcdefgh").unwrap(), 4);
    assert_eq!(stream.take_pending().unwrap(), b"abcd");
    assert_eq!(stream.write(&b"abcdefgh"[4..]).unwrap(), 4);
    stream.flush().unwrap();
    assert_eq!(stream.take_pending().unwrap(), b"efgh");
    stream.close().unwrap();
    assert!(stream.is_closed());
}

#[test]
fn fulfill_without_pending_callback_is_an_error() {
    let mut stream = Stream::from_bytes(&b"x"[..]);
    assert!(stream.fulfill(b"data").is_err());
}

/// Stage that raises one interrupt before passing data through.
struct InterruptOnce {
    fired: bool,
}

impl Filter for InterruptOnce {
    fn process(
        &mut self,
        input: &mut ReadBuf<'_>,
        output: &mut WriteBuf<'_>,
        last: bool,
    ) -> io::Result<Progress> {
        if !self.fired {
            self.fired = true;
            return Ok(Progress::Interrupt);
        }
        move_bytes(input, output);
        if !input.is_empty() {
            Ok(Progress::NeedOutput)
        } else if last {
            Ok(Progress::EndOfData)
        } else {
            Ok(Progress::NeedInput)
        }
    }
}

#[test]
fn interrupt_suspends_until_resumed() {
    let source = Stream::from_bytes(&b"go"[..]);
    let mut stream = Stream::filter(source, InterruptOnce { fired: false }, 8);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Pending);
    stream.resume().unwrap();
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'g'));
    assert!(stream.resume().is_err());
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'o'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::EndOfData);
}

#[test]
fn buffered_bytes_are_served_before_a_deferred_error() {
    // valid pairs decode and are readable before the bad digit surfaces
    let source = Stream::from_bytes(&b"4142G>"[..]);
    let mut stream = Stream::filter(source, HexDecoder::new(), 64);
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'A'));
    assert_eq!(stream.get_byte().unwrap(), ReadEvent::Byte(b'B'));
    assert!(stream.get_byte().is_err());
}
