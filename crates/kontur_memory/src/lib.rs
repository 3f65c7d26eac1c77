//! Memory for KONTUR organs.
//!
//! [`MemoryStore`] keeps episodes, facts and heuristics in three partitions
//! with exact-duplicate removal and bounded retention of heuristics.
//! [`SimilarityStore`] is the vector index the task orchestrator plans from.

pub mod organ;
pub mod similarity;
pub mod store;

pub use organ::{MemoryOrgan, RecallRequest};
pub use similarity::{
    cosine_similarity, hashed_embedding, Embedding, InMemorySimilarity, SimilarityHit,
    SimilarityStore, EMBEDDING_DIM,
};
pub use store::{
    MemoryEntry, MemoryKind, MemoryStats, MemoryStore, OptimizeStats, RecallResult, StoreReceipt,
};
