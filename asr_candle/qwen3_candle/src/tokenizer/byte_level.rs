//! The reversible byte<->unicode mapping used by byte-level BPE: every one of the 256 possible bytes gets a printable Unicode
//! scalar, so arbitrary binary text can be represented, trained on, and
//! merged as if it were ordinary text.
//!
//! Ranges, per the standard GPT-2 scheme: the "nice" printable ASCII/Latin-1
//! ranges (`!..~`, `0xA1..0xAC`, `0xAE..0xFF`) map to themselves; every other
//! byte value is shifted into the Unicode private-ish tail starting at
//! `0x100`.

use std::collections::HashMap;

pub struct ByteUnicodeMap {
    byte_to_char: [char; 256],
    char_to_byte: HashMap<char, u8>,
}

impl ByteUnicodeMap {
    pub fn new() -> Self {
        let mut bs: Vec<u32> = Vec::new();
        bs.extend(b'!' as u32..=b'~' as u32);
        bs.extend(0xA1u32..=0xACu32);
        bs.extend(0xAEu32..=0xFFu32);

        let mut byte_to_char = ['\0'; 256];
        let mut char_to_byte = HashMap::with_capacity(256);

        let mut n = 0u32;
        for b in 0u32..=255 {
            let ch = if bs.contains(&b) {
                char::from_u32(b).expect("byte in printable range is valid scalar")
            } else {
                let shifted = char::from_u32(256 + n).expect("shifted tail is valid scalar");
                n += 1;
                shifted
            };
            byte_to_char[b as usize] = ch;
            char_to_byte.insert(ch, b as u8);
        }

        Self {
            byte_to_char,
            char_to_byte,
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| self.byte_to_char[b as usize]).collect()
    }

    /// Maps a single unicode scalar back to the byte it represents, if it
    /// is one produced by [`Self::encode`].
    pub fn decode_char(&self, ch: char) -> Option<u8> {
        self.char_to_byte.get(&ch).copied()
    }
}

impl Default for ByteUnicodeMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_byte() {
        let map = ByteUnicodeMap::new();
        for b in 0u8..=255 {
            let encoded = map.encode(&[b]);
            let ch = encoded.chars().next().unwrap();
            assert_eq!(map.decode_char(ch), Some(b));
        }
    }

    #[test]
    fn printable_ascii_maps_to_itself() {
        let map = ByteUnicodeMap::new();
        assert_eq!(map.encode(b"A"), "A");
        assert_eq!(map.encode(b"~"), "~");
    }
}
