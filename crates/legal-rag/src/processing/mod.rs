pub mod chunker;
pub mod loader;

pub use chunker::{ChunkResult, TextChunker};
pub use loader::DocumentLoader;
