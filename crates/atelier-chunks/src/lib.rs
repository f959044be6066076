#![warn(missing_docs)]

//! Atelier chunk subsystem: content-defined chunking (FastCDC), SHA-256 addressing, Zstd payloads
//!
//! Encode path:  File → Chunk (FastCDC) → Hash (SHA-256) → Dedupe → Compress → Store
//! Rebuild path: Sequence → Missing check → Batch payloads → Stream-decompress → Rename into place

pub mod codec;
pub mod compression;
pub mod error;
pub mod fingerprint;
pub mod rebuild;
pub mod remote;
pub mod sequence;
pub mod store;
pub mod sweep;

pub use codec::{ChunkCodec, ChunkerConfig, EncodeStats, SeenChunks};
pub use error::ChunkError;
pub use fingerprint::{checksum_bytes, checksum_file, sha256_hash, ChunkHash, Checksum};
pub use rebuild::{EmptyChunkPolicy, RebuildOutcome, Reconstructor, DEFAULT_BUFFER_LIMIT};
pub use remote::{ensure_chunks, RemoteChunkSource};
pub use sequence::ChunkSequence;
pub use store::{ChunkStore, MemoryChunkStore, StoredChunk};
pub use sweep::{ChunkSweeper, SweepStats};
