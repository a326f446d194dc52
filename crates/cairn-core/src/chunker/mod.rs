use std::io::{self, Read};

use fastcdc::v2020::{Error as CdcError, StreamCDC};
use serde::{Deserialize, Serialize};

/// Content-defined chunking parameters. Part of the repository config so
/// that every snapshot into one repository chunks identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerParams {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            min_size: 512 * 1024,      // 512 KiB
            avg_size: 1024 * 1024,     // 1 MiB
            max_size: 8 * 1024 * 1024, // 8 MiB
        }
    }
}

/// One content-defined chunk of a byte stream.
#[derive(Debug)]
pub struct Chunk {
    pub data: Vec<u8>,
}

/// Streaming chunker over any reader. Yields chunks in offset order; an
/// empty stream yields no chunks.
pub struct ChunkStream<R: Read> {
    inner: StreamCDC<R>,
}

impl<R: Read> ChunkStream<R> {
    pub fn new(reader: R, params: &ChunkerParams) -> Self {
        Self {
            inner: StreamCDC::new(reader, params.min_size, params.avg_size, params.max_size),
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(chunk) => Some(Ok(Chunk { data: chunk.data })),
            Err(CdcError::IoError(err)) => Some(Err(err)),
            Err(other) => Some(Err(io::Error::other(format!("chunker: {other}")))),
        }
    }
}

/// Estimate the number of chunks a file will produce, for pre-sizing Vecs.
pub(crate) fn estimate_chunk_count(data_len: u64, avg_chunk_size: u32) -> usize {
    if avg_chunk_size == 0 {
        return 1;
    }
    let est = (data_len / avg_chunk_size as u64).saturating_add(1);
    est.min(4096) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> ChunkerParams {
        ChunkerParams {
            min_size: 256,
            avg_size: 512,
            max_size: 1024,
        }
    }

    #[test]
    fn small_input_single_chunk() {
        let data = b"hi".to_vec();
        let chunks: Vec<Chunk> = ChunkStream::new(data.as_slice(), &test_params())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, b"hi");
    }

    #[test]
    fn empty_input_no_chunks() {
        let chunks: Vec<Chunk> = ChunkStream::new(&b""[..], &test_params())
            .collect::<io::Result<_>>()
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn concatenation_reproduces_input() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let chunks: Vec<Chunk> = ChunkStream::new(data.as_slice(), &test_params())
            .collect::<io::Result<_>>()
            .unwrap();
        assert!(chunks.len() > 1, "expected multiple chunks");
        for chunk in &chunks {
            assert!(chunk.data.len() <= 1024);
        }
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn chunking_is_deterministic() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        let split = |d: &[u8]| -> Vec<usize> {
            ChunkStream::new(d, &test_params())
                .map(|c| c.unwrap().data.len())
                .collect()
        };
        assert_eq!(split(&data), split(&data));
    }

    #[test]
    fn estimate_chunk_count_bounds() {
        assert_eq!(estimate_chunk_count(0, 512), 1);
        assert_eq!(estimate_chunk_count(1024, 512), 3);
        assert_eq!(estimate_chunk_count(u64::MAX, 1), 4096);
        assert_eq!(estimate_chunk_count(100, 0), 1);
    }
}
