pub mod dual;
pub mod memory;
pub mod opensearch;
pub mod qdrant;

pub use dual::DualIndexStore;
pub use memory::MemoryIndexStore;
pub use opensearch::OpenSearchStore;
pub use qdrant::QdrantStore;
