pub mod embedder;
pub mod openai_compat;
pub mod schema;
pub mod similarity;
pub mod structured;
pub mod traits;
pub mod util;

// Re-exports for convenience.
pub use embedder::{create_embedder, Embedder, HashEmbedder, ProviderEmbedder};
pub use openai_compat::OpenAiCompatProvider;
pub use schema::SchemaSpec;
pub use structured::{Generated, Structured, StructuredClient};
pub use traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider, ResponseFormat,
};
