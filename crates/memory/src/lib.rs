//! The conversational memory core: a bounded window that compacts into
//! structured summaries, durable state that survives restarts, and
//! retrieval of past summaries into each new query's context.

pub mod augment;
pub mod compaction;
pub mod engine;
pub mod prompts;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod truncation;
pub mod window;

pub use augment::{AugmentedContext, ClarifyingQuestion, QueryAnalysis, QueryAugmenter, QuestionKind};
pub use compaction::Compactor;
pub use engine::MemoryEngine;
pub use reconcile::StateReconciler;
pub use registry::SessionRegistry;
pub use session::{ChatSession, CompactionStatus, SessionStatus, TurnOutcome};
pub use window::ContextWindow;
