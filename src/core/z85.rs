//! Z85 text encoding of binary data ([ZeroMQ RFC 32](https://rfc.zeromq.org/spec/32/)).
//!
//! Disk contents are persisted through this encoding. Unlike the strict RFC,
//! input lengths that are not a multiple of four are accepted and zero padded.

const ENCODER: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

/// Maps `byte - 32` to the digit value; entries for unused characters hold 0xff.
const DECODER: [u8; 96] = {
    let mut table = [0xff; 96];
    let mut i = 0;
    while i < ENCODER.len() {
        table[(ENCODER[i] - 32) as usize] = i as u8;
        i += 1;
    }
    table
};

/// Encode `src`, zero padding the last group to four bytes.
pub fn encode(src: &[u8]) -> String {
    let mut encoded = String::with_capacity(src.len().div_ceil(4) * 5);

    for chunk in src.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(group);

        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = ENCODER[(value % 85) as usize];
            value /= 85;
        }
        // every digit comes from the ASCII alphabet
        encoded.extend(digits.iter().map(|&d| d as char));
    }

    encoded
}

fn decode_char(c: u8) -> Option<u8> {
    let idx = c.checked_sub(32)? as usize;
    DECODER.get(idx).copied().filter(|&v| v != 0xff)
}

/// Decode `text` into `dest` and return the number of bytes written.
///
/// Decoding stops at the first character outside the alphabet or once `dest`
/// is full. Text whose length is not a multiple of five decodes to nothing.
pub fn decode(text: &str, dest: &mut [u8]) -> usize {
    let text = text.as_bytes();
    if text.len() % 5 != 0 {
        return 0;
    }

    let mut written = 0;
    for group in text.chunks(5) {
        let mut value: u64 = 0;
        for &c in group {
            match decode_char(c) {
                Some(digit) => value = value * 85 + digit as u64,
                None => return written,
            }
        }

        for byte in (value as u32).to_be_bytes() {
            if written >= dest.len() {
                return written;
            }
            dest[written] = byte;
            written += 1;
        }
    }

    written
}
