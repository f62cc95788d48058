//! Cyclic-polynomial (buzhash) rolling hash.
//!
//! The hash of a window `b[0..n]` is `XOR rotl(T[b[i]], n - 1 - i)`. Sliding
//! the window by one byte is O(1): rotate, mix the incoming byte in, and
//! cancel the outgoing byte whose contribution has been rotated `n` times.

/// Byte substitution table, generated at compile time from splitmix64.
const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state: u64 = 0x5EED_CA1B_0000_0001;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        table[i] = (z >> 32) as u32;
        i += 1;
    }
    table
}

/// Rolling hash over a fixed-width window of the most recent bytes.
#[derive(Debug, Clone)]
pub struct RollingHash {
    hash: u32,
    window: usize,
    out_rotation: u32,
}

impl RollingHash {
    /// Create a hash over a window of `window` bytes.
    pub fn new(window: usize) -> Self {
        Self {
            hash: 0,
            window,
            out_rotation: (window % 32) as u32,
        }
    }

    /// Window width in bytes.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Forget every byte seen so far.
    pub fn reset(&mut self) {
        self.hash = 0;
    }

    /// Mix in the next byte while the window is still filling.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.hash = self.hash.rotate_left(1) ^ TABLE[byte as usize];
    }

    /// Mix in `incoming` and drop `outgoing`, the byte `window` positions back.
    #[inline]
    pub fn roll(&mut self, incoming: u8, outgoing: u8) {
        self.push(incoming);
        self.hash ^= TABLE[outgoing as usize].rotate_left(self.out_rotation);
    }

    /// Current hash value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.hash
    }
}
