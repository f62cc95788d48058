//! Content-defined chunker driven by a rolling hash.
//!
//! The hash runs over the last `min_size` bytes of the chunk being built and
//! restarts at every cut, so a boundary depends only on the bytes since the
//! previous boundary. This makes the output independent of how the stream is
//! split across [`Chunker::next_chunk`] calls.

use bytes::{Bytes, BytesMut};
use cairn_types::ChunkingOptions;

use crate::error::CasError;
use crate::rolling::RollingHash;

/// Incremental content-defined chunker.
///
/// Holds at most one in-flight chunk (`max_size` bytes).
pub struct Chunker {
    opts: ChunkingOptions,
    threshold: u64,
    hash: RollingHash,
    buf: BytesMut,
}

impl Chunker {
    /// Create a chunker, rejecting inconsistent options.
    pub fn new(opts: ChunkingOptions) -> Result<Self, CasError> {
        opts.validate().map_err(CasError::InvalidOptions)?;
        Ok(Self {
            opts,
            threshold: opts.leaf_threshold(),
            hash: RollingHash::new(opts.min_size as usize),
            buf: BytesMut::with_capacity(opts.max_size as usize),
        })
    }

    /// An empty chunker with the same options.
    pub(crate) fn fresh(&self) -> Self {
        Self {
            opts: self.opts,
            threshold: self.threshold,
            hash: RollingHash::new(self.opts.min_size as usize),
            buf: BytesMut::with_capacity(self.opts.max_size as usize),
        }
    }

    /// The options this chunker cuts with.
    pub fn options(&self) -> &ChunkingOptions {
        &self.opts
    }

    /// Bytes buffered for the chunk currently being built.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Consume bytes from `input` until a boundary is found.
    ///
    /// Returns the completed chunk and advances `input` past the consumed
    /// bytes. Returns `None` once `input` is exhausted without a boundary; the
    /// partial chunk stays buffered for the next call or [`Chunker::finish`].
    pub fn next_chunk(&mut self, input: &mut &[u8]) -> Option<Bytes> {
        let cut = if self.opts.is_fixed() {
            self.scan_fixed(input)
        } else {
            self.scan_rolling(input)
        };

        match cut {
            Some(n) => {
                self.buf.extend_from_slice(&input[..n]);
                *input = &input[n..];
                self.hash.reset();
                Some(self.buf.split().freeze())
            }
            None => {
                self.buf.extend_from_slice(input);
                *input = &[];
                None
            }
        }
    }

    /// Flush the trailing partial chunk, if any, and reset.
    ///
    /// The final chunk of a stream may be shorter than `min_size`.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.hash.reset();
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.split().freeze())
    }

    /// Chunk a complete in-memory buffer.
    pub fn split(opts: ChunkingOptions, data: &[u8]) -> Result<Vec<Bytes>, CasError> {
        let mut chunker = Self::new(opts)?;
        let mut input = data;
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.next_chunk(&mut input) {
            chunks.push(chunk);
        }
        chunks.extend(chunker.finish());
        Ok(chunks)
    }

    /// Number of input bytes that complete a fixed-size chunk, if enough are present.
    fn scan_fixed(&self, input: &[u8]) -> Option<usize> {
        let missing = self.opts.max_size as usize - self.buf.len();
        (input.len() >= missing).then_some(missing)
    }

    /// Number of input bytes up to and including the next boundary, if any.
    fn scan_rolling(&mut self, input: &[u8]) -> Option<usize> {
        let min = self.opts.min_size as usize;
        let max = self.opts.max_size as usize;
        let window = self.hash.window();
        let buffered = self.buf.len();

        for (i, &byte) in input.iter().enumerate() {
            let pos = buffered + i;
            if pos < window {
                self.hash.push(byte);
            } else {
                let out = pos - window;
                let outgoing = if out < buffered {
                    self.buf[out]
                } else {
                    input[out - buffered]
                };
                self.hash.roll(byte, outgoing);
            }

            let len = pos + 1;
            if len >= max || (len >= min && u64::from(self.hash.value()) < self.threshold) {
                return Some(i + 1);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_opts() -> ChunkingOptions {
        ChunkingOptions {
            min_size: 64,
            target_size: 256,
            max_size: 1024,
            ..ChunkingOptions::default()
        }
    }

    fn test_data(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0xDEAD_BEEF;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    fn chunk_in_pieces(opts: ChunkingOptions, data: &[u8], piece: usize) -> Vec<Bytes> {
        let mut chunker = Chunker::new(opts).unwrap();
        let mut chunks = Vec::new();
        for mut slice in data.chunks(piece) {
            while let Some(chunk) = chunker.next_chunk(&mut slice) {
                chunks.push(chunk);
            }
            assert!(slice.is_empty());
        }
        chunks.extend(chunker.finish());
        chunks
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let chunks = Chunker::split(small_opts(), b"").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_input_single_chunk() {
        let chunks = Chunker::split(small_opts(), b"tiny").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref(), b"tiny");
    }

    #[test]
    fn test_chunk_sizes_within_bounds() {
        let opts = small_opts();
        let data = test_data(200_000);
        let chunks = Chunker::split(opts, &data).unwrap();
        assert!(chunks.len() > 10, "expected many chunks, got {}", chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.len() as u32;
            if i < chunks.len() - 1 {
                assert!(len >= opts.min_size, "chunk {i} size {len} < min");
            }
            assert!(len <= opts.max_size, "chunk {i} size {len} > max");
        }

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_average_size_near_target() {
        let opts = small_opts();
        let data = test_data(1_000_000);
        let chunks = Chunker::split(opts, &data).unwrap();
        let avg = data.len() / chunks.len();
        assert!(
            (opts.min_size as usize..opts.max_size as usize).contains(&avg),
            "average chunk size {avg} out of range"
        );
    }

    #[test]
    fn test_call_boundary_independence() {
        let opts = small_opts();
        let data = test_data(50_000);
        let whole = Chunker::split(opts, &data).unwrap();

        for piece in [1usize, 3, 63, 64, 65, 1000, 4096] {
            let pieces = chunk_in_pieces(opts, &data, piece);
            assert_eq!(whole, pieces, "split into {piece}-byte pieces diverged");
        }
    }

    #[test]
    fn test_local_edit_keeps_later_boundaries() {
        let opts = small_opts();
        let data = test_data(100_000);
        let mut edited = data.clone();
        edited[10] ^= 0xff;

        let a = Chunker::split(opts, &data).unwrap();
        let b = Chunker::split(opts, &edited).unwrap();
        let tail_a: Vec<_> = a.iter().rev().take(a.len() / 2).collect();
        let tail_b: Vec<_> = b.iter().rev().take(a.len() / 2).collect();
        assert_eq!(tail_a, tail_b, "an edit near the start must not move later cuts");
        assert_ne!(a[0], b[0]);
    }

    #[test]
    fn test_fixed_size_mode() {
        let chunks = Chunker::split(ChunkingOptions::fixed(100), &[0xFFu8; 350]).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100, 100, 50]);

        let pieces = chunk_in_pieces(ChunkingOptions::fixed(100), &[0xFFu8; 350], 33);
        assert_eq!(chunks, pieces);
    }

    #[test]
    fn test_constant_input_cuts_at_min() {
        let opts = small_opts();
        let chunks = Chunker::split(opts, &vec![0u8; 4096]).unwrap();
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.len() >= opts.min_size as usize);
        }
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 4096);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = ChunkingOptions {
            min_size: 512,
            target_size: 128,
            max_size: 1024,
            ..ChunkingOptions::default()
        };
        assert!(matches!(
            Chunker::new(opts),
            Err(CasError::InvalidOptions(_))
        ));
    }
}
