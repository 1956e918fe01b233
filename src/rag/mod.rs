//! Retrieval pipeline: page chunking, corpus embedding, and similarity search.

pub mod cache;
pub mod chunker;
pub mod embedding;
pub mod index;
pub mod retriever;

pub use cache::CorpusCache;
pub use chunker::{Chunk, Chunker, ChunkerConfig, PageImageLink, PageText};
pub use embedding::{CohereEmbedder, EmbeddingProvider, InputType};
pub use index::{Corpus, CorpusFiles, VectorIndex};
pub use retriever::{Retriever, ScoredChunk};
