//! Incremental Base32 coder (RFC 4648).
//!
//! Same streaming shape as [`Base64`](crate::codec::Base64): chunk-wise
//! `(written, consumed)` calls, blank skipping and a sticky decode error
//! state. Decoding optionally accepts lowercase input.
//!
//! An atom carries 2, 4, 5, 7 or 8 significant characters (1 to 5 bytes);
//! RFC 4648 has no padding shape with 3 or 6, so such atoms are rejected.

use crate::codec::is_blank;
use crate::error::{MemoryError, Result};

/// Encoded atom size, chars.
const ENCODED_ATOM: usize = 8;
/// Decoded atom size, bytes.
const DECODED_ATOM: usize = 5;

/// Standard alphabet (RFC 4648 §6).
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Decode table covering `0-9A-Za-z`; lowercase rows mirror uppercase so
/// case-insensitive decoding is one bounds change.
const DECODE: [i8; 123] = [
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, 26, 27, 28, 29, 30, 31, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, //
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, -1, -1, -1, -1, -1, //
    -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, //
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Encode,
    Decode,
    Eof,
    Error,
}

/// Streaming Base32 encoder/decoder state.
pub struct Base32 {
    state: State,
    line_atoms: usize,
    atoms: usize,
    /// Decode accepts lowercase characters too.
    ignore_case: bool,
}

impl Base32 {
    /// Creates an encoder; non-zero `line_width` folds output with CRLF.
    pub fn encoder(line_width: usize) -> Result<Self> {
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
            ignore_case: false,
        })
    }

    /// Creates a decoder.
    #[must_use]
    pub fn decoder(ignore_case: bool) -> Self {
        Self {
            state: State::Decode,
            line_atoms: 0,
            atoms: 0,
            ignore_case,
        }
    }

    /// True once the stream has seen its final atom.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Eof
    }

    /// Encodes as much of `src` into `dst` as fits, returning
    /// `(written, consumed)`; a trailing partial group waits for `final_`.
    pub fn encode(&mut self, dst: &mut [u8], src: &[u8], final_: bool) -> Result<(usize, usize)> {
        if self.state != State::Encode {
            return Err(MemoryError::UnexpectedCall);
        }
        if dst.len() < ENCODED_ATOM {
            return Err(MemoryError::BufferTooSmall);
        }

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
            si += encode_atom(&mut dst[di..di + ENCODED_ATOM], &src[si..]);
            di += ENCODED_ATOM;
            self.atoms += 1;
        }

        if final_ && si == src.len() {
            self.state = State::Eof;
        }
        Ok((di, si))
    }

    /// Decodes whole atoms of `src` into `dst`, returning
    /// `(written, consumed)`; same contract as the Base64 decoder.
    pub fn decode(&mut self, dst: &mut [u8], src: &[u8], final_: bool) -> Result<(usize, usize)> {
        if self.state != State::Decode {
            return Err(MemoryError::UnexpectedCall);
        }
        if dst.len() < ENCODED_ATOM {
            return Err(MemoryError::BufferTooSmall);
        }

        let mut di = 0;
        let mut si = 0;
        while self.state == State::Decode && di < dst.len() {
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

            let need = decode_atom(None, &atom, self.ignore_case);
            if need != 0 && dst.len() - di < need {
                break;
            }
            let len = decode_atom(Some(&mut dst[di..]), &atom, self.ignore_case);
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

/// Encodes up to five bytes of `src` as one atom, returning the number of
/// source bytes taken.
fn encode_atom(dst: &mut [u8], src: &[u8]) -> usize {
    let len = src.len().min(DECODED_ATOM);
    let mut reg: u64 = 0;
    for i in 0..DECODED_ATOM {
        reg = (reg << 8) | src.get(i).copied().map_or(0, u64::from);
    }

    // Significant characters per decoded length, the rest is padding.
    let chars = match len {
        1 => 2,
        2 => 4,
        3 => 5,
        4 => 7,
        _ => 8,
    };
    for (k, slot) in dst.iter_mut().take(ENCODED_ATOM).enumerate() {
        *slot = if k < chars {
            ALPHABET[(reg >> (35 - 5 * k)) as usize & 0x1F]
        } else {
            b'='
        };
    }
    len
}

/// Decodes one atom. Returns the decoded byte count, or 0 for a
/// malformed atom (bad character, bad padding shape, or a 3/6-character
/// atom, which no RFC 4648 input length produces).
fn decode_atom(dst: Option<&mut [u8]>, atom: &[u8; ENCODED_ATOM], ignore_case: bool) -> usize {
    let max = if ignore_case { b'z' } else { b'Z' };

    let mut a = [0u64; ENCODED_ATOM];
    let mut have = 0;
    while have < ENCODED_ATOM {
        let t = atom[have];
        if t == b'=' {
            break;
        }
        if t > max || DECODE[t as usize] < 0 {
            return 0;
        }
        a[have] = DECODE[t as usize] as u64;
        have += 1;
    }
    for &pad in &atom[have..] {
        if pad != b'=' {
            return 0;
        }
    }

    let len = match have {
        8 => 5,
        7 => 4,
        5 => 3,
        4 => 2,
        2 => 1,
        _ => return 0,
    };

    if let Some(dst) = dst {
        let mut reg: u64 = 0;
        for &v in &a {
            reg = (reg << 5) | v;
        }
        for (k, slot) in dst.iter_mut().take(len).enumerate() {
            *slot = (reg >> (32 - 8 * k)) as u8;
        }
    }
    len
}
