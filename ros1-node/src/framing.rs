//! Component A: the TCPROS length-delimited framing codec.
//!
//! Every frame on the wire, in either direction, is `u32le(length) ||
//! length bytes of payload` This module turns an
//! arbitrarily-chunked byte stream into the sequence of complete payloads
//! it contains, and the dual: wraps a payload with its length prefix.

/// A length declared by a peer larger than this poisons the stream -- the
/// connection must be closed rather than trusted to ever resynchronize.
pub const MAX_FRAME_LEN: u32 = 1_000_000_000;

#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    #[error("declared frame length {0} exceeds the maximum of {MAX_FRAME_LEN}")]
    FrameTooLarge(u32),
    #[error("framing stream is poisoned after a previous error")]
    Poisoned,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    Body(u32),
}

/// Stateful decoder: call `feed` with each chunk read off the socket, in
/// order. Returns every complete frame payload the chunk completes
/// (length prefix discarded), possibly more than one, possibly zero.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    buf: Vec<u8>,
    poisoned: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            buf: Vec::with_capacity(4),
            poisoned: false,
        }
    }

    /// Feeds a chunk of arbitrary size. A chunk containing N complete
    /// frames plus a partial tail yields exactly N frames, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        if self.poisoned {
            return Err(FramingError::Poisoned);
        }
        let mut frames = Vec::new();
        let mut cursor = 0;
        while cursor < chunk.len() {
            match self.state {
                State::Header => {
                    let need = 4 - self.buf.len();
                    let take = need.min(chunk.len() - cursor);
                    self.buf.extend_from_slice(&chunk[cursor..cursor + take]);
                    cursor += take;
                    if self.buf.len() == 4 {
                        let len = u32::from_le_bytes(self.buf[0..4].try_into().unwrap());
                        self.buf.clear();
                        if len > MAX_FRAME_LEN {
                            self.poisoned = true;
                            return Err(FramingError::FrameTooLarge(len));
                        }
                        if len == 0 {
                            frames.push(Vec::new());
                            // Stay in State::Header for the next frame.
                        } else {
                            self.state = State::Body(len);
                        }
                    }
                }
                State::Body(len) => {
                    let need = len as usize - self.buf.len();
                    let take = need.min(chunk.len() - cursor);
                    self.buf.extend_from_slice(&chunk[cursor..cursor + take]);
                    cursor += take;
                    if self.buf.len() == len as usize {
                        frames.push(std::mem::take(&mut self.buf));
                        self.state = State::Header;
                    }
                }
            }
        }
        Ok(frames)
    }
}

/// `encode(payload) = u32le(len(payload)) || payload`
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}
