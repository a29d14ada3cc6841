use bytes::{Bytes, BytesMut};

/// Bytes left over at the end of a chunk that did not form a complete unit.
///
/// Demuxers join the remainder with the next chunk, walk the result with an
/// offset cursor and hand back whatever trails the last complete unit.
#[derive(Debug, Default)]
pub struct ChunkCache {
    remainder: BytesMut,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the retained bytes followed by `data`, emptying the cache.
    pub fn join(&mut self, data: Bytes) -> Bytes {
        if self.remainder.is_empty() {
            return data;
        }
        self.remainder.extend_from_slice(&data);
        self.remainder.split().freeze()
    }

    /// Appends bytes that could not be consumed yet.
    pub fn push(&mut self, rest: &[u8]) {
        self.remainder.extend_from_slice(rest);
    }

    /// Takes the retained bytes.
    pub fn flush(&mut self) -> Bytes {
        self.remainder.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.remainder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remainder.is_empty()
    }

    pub fn reset(&mut self) {
        self.remainder.clear();
    }
}
