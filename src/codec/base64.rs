//! Incremental Base64 coder (RFC 4648).
//!
//! One [`Base64`] value drives either an encode or a decode stream in
//! chunk-sized steps: each call consumes what it can from the source and
//! reports `(written, consumed)`, so callers can feed arbitrary splits of
//! the input. The decoder skips blanks between atoms and turns sticky on
//! the first malformed atom.

use crate::codec::is_blank;
use crate::error::{MemoryError, Result};

/// Encoded atom size, chars.
const ENCODED_ATOM: usize = 4;
/// Decoded atom size, bytes.
const DECODED_ATOM: usize = 3;

/// Standard alphabet (RFC 4648 §4).
const STD_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// URL- and filename-safe alphabet (RFC 4648 §5).
const URL_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const STD_DECODE: [i8; 123] = [
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, 62, -1, -1, -1, 63, //
    52, 53, 54, 55, 56, 57, 58, 59, 60, 61, -1, -1, -1, -1, -1, -1, //
    -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, //
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, -1, -1, -1, -1, -1, //
    -1, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, //
    41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51,
];

const URL_DECODE: [i8; 123] = [
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, 62, -1, -1, //
    52, 53, 54, 55, 56, 57, 58, 59, 60, 61, -1, -1, -1, -1, -1, -1, //
    -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, //
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, -1, -1, -1, -1, 63, //
    -1, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, //
    41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51,
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Encode,
    Decode,
    Eof,
    Error,
}

/// Streaming Base64 encoder/decoder state.
pub struct Base64 {
    state: State,
    /// Atoms per folded line; 0 disables folding.
    line_atoms: usize,
    /// Atoms emitted on the current line.
    atoms: usize,
    url_safe: bool,
}

impl Base64 {
    /// Creates an encoder. A non-zero `line_width` folds the output with
    /// CRLF and must leave room for at least one atom plus the fold.
    pub fn encoder(line_width: usize, url_safe: bool) -> Result<Self> {
        let line_atoms = if line_width == 0 {
            0
        } else {
            if line_width < ENCODED_ATOM + 2 {
                return Err(MemoryError::bad_param("line width below one atom"));
            }
            (line_width - 2) / ENCODED_ATOM
        };
        Ok(Self {
            state: State::Encode,
            line_atoms,
            atoms: 0,
            url_safe,
        })
    }

    /// Creates a decoder.
    #[must_use]
    pub fn decoder(url_safe: bool) -> Self {
        Self {
            state: State::Decode,
            line_atoms: 0,
            atoms: 0,
            url_safe,
        }
    }

    /// True once the stream has seen its final atom.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Eof
    }

    /// Encodes as much of `src` into `dst` as fits, returning
    /// `(written, consumed)`. Without `final_`, a trailing partial group
    /// is left unconsumed for the next call; with it, the tail is padded
    /// out and the coder finishes.
    pub fn encode(&mut self, dst: &mut [u8], src: &[u8], final_: bool) -> Result<(usize, usize)> {
        if self.state != State::Encode {
            return Err(MemoryError::UnexpectedCall);
        }
        if dst.len() < ENCODED_ATOM {
            return Err(MemoryError::BufferTooSmall);
        }
        let alphabet = if self.url_safe {
            URL_ALPHABET
        } else {
            STD_ALPHABET
        };

        let mut di = 0;
        let mut si = 0;
        while si < src.len() && dst.len() - di >= ENCODED_ATOM {
            if !final_ && src.len() - si < DECODED_ATOM {
                break;
            }
            if self.line_atoms != 0 && self.atoms >= self.line_atoms {
                if dst.len() - di < 2 {
                    break;
                }
                dst[di] = b'\r';
                dst[di + 1] = b'\n';
                di += 2;
                self.atoms = 0;
                continue;
            }
            si += encode_atom(&mut dst[di..di + ENCODED_ATOM], &src[si..], alphabet);
            di += ENCODED_ATOM;
            self.atoms += 1;
        }

        if final_ && si == src.len() {
            self.state = State::Eof;
        }
        Ok((di, si))
    }

    /// Decodes whole atoms of `src` into `dst`, returning
    /// `(written, consumed)`. Blanks between atoms are skipped; a partial
    /// atom at the end of `src` is left unconsumed. A malformed atom
    /// poisons the coder: the call reports the progress made so far (or
    /// fails when there was none) and every later call fails.
    pub fn decode(&mut self, dst: &mut [u8], src: &[u8], final_: bool) -> Result<(usize, usize)> {
        if self.state != State::Decode {
            return Err(MemoryError::UnexpectedCall);
        }
        if dst.len() < ENCODED_ATOM {
            return Err(MemoryError::BufferTooSmall);
        }
        let table = if self.url_safe {
            &URL_DECODE
        } else {
            &STD_DECODE
        };

        let mut di = 0;
        let mut si = 0;
        while self.state == State::Decode && di < dst.len() {
            // Gather one atom, skipping blanks. `probe` runs ahead; `si`
            // only advances past fully consumed atoms.
            let mut atom = [0u8; ENCODED_ATOM];
            let mut have = 0;
            let mut probe = si;
            while probe < src.len() && have < ENCODED_ATOM {
                let t = src[probe];
                probe += 1;
                if is_blank(t) {
                    if have == 0 {
                        si = probe;
                    }
                    continue;
                }
                atom[have] = t;
                have += 1;
            }
            if have < ENCODED_ATOM {
                break;
            }

            let need = decode_atom(None, &atom, table);
            if need != 0 && dst.len() - di < need {
                break;
            }
            let len = decode_atom(Some(&mut dst[di..]), &atom, table);
            if len == 0 {
                self.state = State::Error;
                if si != 0 || di != 0 {
                    return Ok((di, si));
                }
                return Err(MemoryError::bad_param("malformed atom"));
            }

            si = probe;
            di += len;
            if len < DECODED_ATOM {
                self.state = State::Eof;
            }
        }

        if final_ && si == src.len() && self.state == State::Decode {
            self.state = State::Eof;
        }
        Ok((di, si))
    }
}

/// Encodes up to three bytes of `src` as one atom, returning the number
/// of source bytes taken.
fn encode_atom(dst: &mut [u8], src: &[u8], alphabet: &[u8; 64]) -> usize {
    let len = src.len().min(DECODED_ATOM);
    let byte = |i: usize| -> u32 { src.get(i).copied().map_or(0, u32::from) };
    let reg = (byte(0) << 16) | (byte(1) << 8) | byte(2);

    dst[0] = alphabet[(reg >> 18) as usize & 0x3F];
    dst[1] = alphabet[(reg >> 12) as usize & 0x3F];
    dst[2] = if len > 1 {
        alphabet[(reg >> 6) as usize & 0x3F]
    } else {
        b'='
    };
    dst[3] = if len > 2 {
        alphabet[reg as usize & 0x3F]
    } else {
        b'='
    };
    len
}

/// Decodes one atom. Returns the decoded byte count, or 0 for a
/// malformed atom. With `dst == None` only measures.
fn decode_atom(dst: Option<&mut [u8]>, atom: &[u8; ENCODED_ATOM], table: &[i8; 123]) -> usize {
    let mut chars = ENCODED_ATOM;
    if atom[3] == b'=' {
        chars -= 1;
    }
    if atom[2] == b'=' {
        chars -= 1;
    }

    let mut a = [0u32; ENCODED_ATOM];
    for i in 0..chars {
        let t = atom[i] as usize;
        if t >= table.len() || table[t] < 0 {
            return 0;
        }
        a[i] = table[t] as u32;
    }
    let len = chars - 1;

    if let Some(dst) = dst {
        let reg = (a[0] << 18) | (a[1] << 12) | (a[2] << 6) | a[3];
        dst[0] = (reg >> 16) as u8;
        if len > 1 {
            dst[1] = (reg >> 8) as u8;
        }
        if len > 2 {
            dst[2] = reg as u8;
        }
    }
    len
}
