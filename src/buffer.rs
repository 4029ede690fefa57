//! Cursors over borrowed byte slices, used on both sides of every
//! [`Filter::process`](crate::Filter::process) call.
//!
//! A cursor is a position over a fixed window; it can only move forward, and
//! it can never move past the end of the window. Overrunning the window is
//! unrepresentable: all access goes through slice indexing.

/// A cursor over available input bytes.
///
/// The stage consumes bytes by calling [`advance`](ReadBuf::advance); the
/// caller observes how far it got via [`consumed`](ReadBuf::consumed).
#[derive(Debug)]
pub struct ReadBuf<'a> {
    buffer: &'a [u8],
    index: usize,
}

impl<'a> ReadBuf<'a> {
    /// Creates a cursor over `buffer`, positioned at its start.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, index: 0 }
    }

    /// The bytes not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.index..]
    }

    /// The next unconsumed byte, if any, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buffer.get(self.index).copied()
    }

    /// Number of bytes still available.
    pub fn available(&self) -> usize {
        self.buffer.len() - self.index
    }

    /// True if all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.index == self.buffer.len()
    }

    /// Number of bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.index
    }

    /// Marks `amount` bytes as consumed.
    ///
    /// # Panics
    ///
    /// Panics if `amount` exceeds the available input.
    pub fn advance(&mut self, amount: usize) {
        assert!(
            amount <= self.available(),
            "cursor advanced past its limit"
        );
        self.index += amount;
    }
}

/// A cursor over available output space.
#[derive(Debug)]
pub struct WriteBuf<'a> {
    buffer: &'a mut [u8],
    index: usize,
}

impl<'a> WriteBuf<'a> {
    /// Creates a cursor over `buffer`, positioned at its start.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, index: 0 }
    }

    /// The space not yet written.
    pub fn unwritten(&mut self) -> &mut [u8] {
        &mut self.buffer[self.index..]
    }

    /// Number of bytes of space remaining.
    pub fn space(&self) -> usize {
        self.buffer.len() - self.index
    }

    /// True if no space remains.
    pub fn is_full(&self) -> bool {
        self.index == self.buffer.len()
    }

    /// Number of bytes produced so far.
    pub fn produced(&self) -> usize {
        self.index
    }

    /// Appends one byte.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is full; stages must check
    /// [`space`](WriteBuf::space) first and report `NeedOutput` instead.
    pub fn put(&mut self, byte: u8) {
        self.buffer[self.index] = byte;
        self.index += 1;
    }

    /// Appends a whole slice.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` does not fit in the remaining space.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buffer[self.index..self.index + bytes.len()].copy_from_slice(bytes);
        self.index += bytes.len();
    }

    /// Marks `amount` bytes as written (after filling
    /// [`unwritten`](WriteBuf::unwritten) directly).
    ///
    /// # Panics
    ///
    /// Panics if `amount` exceeds the remaining space.
    pub fn advance(&mut self, amount: usize) {
        assert!(amount <= self.space(), "cursor advanced past its limit");
        self.index += amount;
    }
}

/// Moves as many bytes as possible from `input` to `output`, returning how
/// many were moved. Afterwards either the input is empty or the output is
/// full.
pub fn move_bytes(input: &mut ReadBuf<'_>, output: &mut WriteBuf<'_>) -> usize {
    let count = input.available().min(output.space());
    output.put_slice(&input.unread()[..count]);
    input.advance(count);
    count
}
