//! Integration tests for the stream codecs as buffer consumers.

use ember_memory::codec::{self, Base32, Base64};
use ember_memory::{BufOptions, Buffer, Heap, HeapFlags};

fn heap() -> Heap {
    Heap::with_capacity(16 * 1024, HeapFlags::new().with_no_trace()).unwrap()
}

#[test]
fn utf8_round_trip() {
    let heap = heap();

    let mut utf8: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    codec::utf8::encode_units(&mut utf8, &[0x0041, 0x00E9, 0x4E2D]).unwrap();
    assert_eq!(utf8.as_slice(), &[0x41, 0xC3, 0xA9, 0xE4, 0xB8, 0xAD]);
    assert_eq!(utf8.len(), 6);

    let mut units: Buffer<'_, u16> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    assert!(codec::utf8::decode_units(&mut units, utf8.as_slice()).unwrap());
    assert_eq!(units.as_slice(), &[0x0041, 0x00E9, 0x4E2D]);
}

#[test]
fn utf8_invalid_input_is_reported_politely() {
    let heap = heap();
    let mut units: Buffer<'_, u16> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    units.append(&[0x1234]).unwrap();

    // Truncated sequence: no error, no change to the destination.
    assert!(!codec::utf8::decode_units(&mut units, &[0x41, 0xE4, 0xB8]).unwrap());
    assert_eq!(units.as_slice(), &[0x1234]);
}

#[test]
fn utf8_full_unit_range_round_trips() {
    let heap = heap();
    let mut utf8: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    let mut units: Buffer<'_, u16> = Buffer::new(0, BufOptions::new(), &heap).unwrap();

    let samples: Vec<u16> = vec![0x0000, 0x007F, 0x0080, 0x07FF, 0x0800, 0xABCD, 0xFFFF];
    codec::utf8::encode_units(&mut utf8, &samples).unwrap();
    assert!(codec::utf8::decode_units(&mut units, utf8.as_slice()).unwrap());
    assert_eq!(units.as_slice(), samples.as_slice());
}

#[test]
fn base64_streams_across_chunked_input() {
    let payload: Vec<u8> = (0..257u32).map(|i| (i * 7 % 256) as u8).collect();

    // Encode feeding 40-byte slices.
    let mut enc = Base64::encoder(0, false).unwrap();
    let mut encoded = Vec::new();
    let mut fed = 0;
    while fed < payload.len() {
        let end = (fed + 40).min(payload.len());
        let final_ = end == payload.len();
        let mut out = [0u8; 128];
        let (written, consumed) = enc
            .encode(&mut out, &payload[fed..end], final_)
            .unwrap();
        encoded.extend_from_slice(&out[..written]);
        fed += consumed;
    }
    assert!(enc.is_finished());

    // Decode feeding 13-char slices.
    let mut dec = Base64::decoder(false);
    let mut decoded = Vec::new();
    let mut fed = 0;
    let mut pending = Vec::new();
    while fed < encoded.len() {
        let end = (fed + 13).min(encoded.len());
        pending.extend_from_slice(&encoded[fed..end]);
        fed = end;
        let final_ = fed == encoded.len();
        let mut out = [0u8; 64];
        let (written, consumed) = dec.decode(&mut out, &pending, final_).unwrap();
        decoded.extend_from_slice(&out[..written]);
        pending.drain(..consumed);
    }
    assert_eq!(decoded, payload);
}

#[test]
fn base64_line_folding() {
    // Width 10 leaves room for two atoms per line.
    let mut enc = Base64::encoder(10, false).unwrap();
    let mut out = [0u8; 64];
    let (written, consumed) = enc.encode(&mut out, &[0u8; 9], true).unwrap();
    assert_eq!(consumed, 9);
    assert_eq!(&out[..written], b"AAAAAAAA\r\nAAAA");
}

#[test]
fn base32_round_trip_with_folding() {
    let payload = b"The quick brown fox jumps over the lazy dog";

    let mut enc = Base32::encoder(42).unwrap();
    let mut out = [0u8; 256];
    let (written, consumed) = enc.encode(&mut out, payload, true).unwrap();
    assert_eq!(consumed, payload.len());
    assert!(out[..written].windows(2).any(|w| w == b"\r\n"));

    let mut dec = Base32::decoder(false);
    let mut plain = [0u8; 128];
    let (got, _) = dec.decode(&mut plain, &out[..written], true).unwrap();
    assert_eq!(&plain[..got], payload);
}

#[test]
fn codecs_feed_from_chunk_streams() {
    use ember_memory::ByteList;

    let heap = heap();
    let mut stream = ByteList::new(&heap).unwrap();
    stream.push(b"foob", false).unwrap();
    stream.push(b"ar", false).unwrap();

    // Drain the stream into a buffer, encode the buffer.
    let mut plain: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    stream.take_into_buffer(&mut plain, false, false).unwrap();

    let mut enc = Base64::encoder(0, false).unwrap();
    let mut out = [0u8; 16];
    let (written, _) = enc.encode(&mut out, plain.as_slice(), true).unwrap();
    assert_eq!(&out[..written], b"Zm9vYmFy");
}
