use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

// Microsoft's QuickXorHash: a 160-bit shift-XOR accumulator with the input
// length folded into the final 8 bytes. OneDrive/SharePoint report it as
// base64 under file.hashes.quickXorHash.
const WIDTH_IN_BITS: usize = 160;
const SHIFT: usize = 11;
const NUM_CELLS: usize = (WIDTH_IN_BITS - 1) / 64 + 1;
const BITS_IN_LAST_CELL: usize = WIDTH_IN_BITS % 64;
const HASH_SIZE: usize = WIDTH_IN_BITS / 8;

pub struct QuickXorHash {
    data: [u64; NUM_CELLS],
    length_so_far: u64,
    shift_so_far: usize,
}

impl QuickXorHash {
    pub fn new() -> Self {
        QuickXorHash {
            data: [0; NUM_CELLS],
            length_so_far: 0,
            shift_so_far: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut current_shift = self.shift_so_far;

        for &byte in bytes {
            let index = current_shift / 64;
            let offset = current_shift % 64;

            self.data[index] ^= (byte as u64).wrapping_shl(offset as u32);

            // The last cell is only 32 bits wide, so its spill threshold is
            // 24, not 56 like the full-width cells.
            let bits_in_cell = if index == NUM_CELLS - 1 {
                BITS_IN_LAST_CELL
            } else {
                64
            };
            if offset > bits_in_cell - 8 {
                self.data[(index + 1) % NUM_CELLS] ^= (byte as u64) >> (bits_in_cell - offset);
            }

            current_shift = (current_shift + SHIFT) % WIDTH_IN_BITS;
        }

        self.shift_so_far = current_shift;
        self.length_so_far += bytes.len() as u64;
    }

    pub fn finalize(self) -> [u8; HASH_SIZE] {
        let mut result = [0u8; HASH_SIZE];

        result[0..8].copy_from_slice(&self.data[0].to_le_bytes());
        result[8..16].copy_from_slice(&self.data[1].to_le_bytes());
        result[16..20].copy_from_slice(&(self.data[2] as u32).to_le_bytes());

        // XOR the total length (LE) into the last 8 bytes
        let length_bytes = self.length_so_far.to_le_bytes();
        let offset = HASH_SIZE - length_bytes.len();
        for (i, b) in length_bytes.iter().enumerate() {
            result[offset + i] ^= b;
        }

        result
    }

    /// Base64 digest, matching the Graph API wire format.
    pub fn base64(self) -> String {
        STANDARD.encode(self.finalize())
    }
}

impl Default for QuickXorHash {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience for in-memory data.
pub fn quickxorhash(data: &[u8]) -> String {
    let mut hasher = QuickXorHash::new();
    hasher.update(data);
    hasher.base64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn test_empty_input() {
        // All cells zero, length zero: 20 zero bytes.
        assert_eq!(quickxorhash(b""), "AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
    }

    #[test]
    fn test_single_byte() {
        // 0x01 lands in bit 0 of cell 0; the length (1) is XORed into
        // byte 12, so the digest is 0x01 at offsets 0 and 12.
        let mut expected = [0u8; 20];
        expected[0] = 1;
        expected[12] = 1;

        let mut hasher = QuickXorHash::new();
        hasher.update(&[0x01]);
        assert_eq!(hasher.finalize(), expected);
        assert_eq!(quickxorhash(&[0x01]), STANDARD.encode(expected));
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

        let one_shot = quickxorhash(&data);

        let mut streamed = QuickXorHash::new();
        for chunk in data.chunks(77) {
            streamed.update(chunk);
        }
        assert_eq!(streamed.base64(), one_shot);
    }

    #[test]
    fn test_length_affects_digest() {
        // Same XOR state, different lengths: trailing zero bytes only move
        // the shift register and the length, but the length fold must
        // change the digest.
        let a = quickxorhash(&[0u8; 1]);
        let b = quickxorhash(&[0u8; 2]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_is_20_bytes() {
        let mut hasher = QuickXorHash::new();
        hasher.update(b"hello world");
        let digest = hasher.finalize();
        assert_eq!(digest.len(), 20);

        // base64 of 20 bytes is 28 chars with one pad
        let encoded = quickxorhash(b"hello world");
        assert_eq!(encoded.len(), 28);
        assert!(encoded.ends_with('='));
    }

    #[test]
    fn test_order_sensitive() {
        assert_ne!(quickxorhash(b"ab"), quickxorhash(b"ba"));
    }
}
