//! Question answering over the indexed documents.

pub mod chain;
pub mod prompt;
pub mod retriever;

pub use chain::RagChain;
pub use prompt::{PromptTemplate, LEGAL_QA_TEMPLATE};
pub use retriever::Retriever;
