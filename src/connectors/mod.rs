// Execution contexts
pub mod context_trait;
pub mod sqlite_context;
pub mod postgres_context;
pub mod recording_context;

pub use context_trait::*;
pub use sqlite_context::*;
pub use postgres_context::*;
pub use recording_context::*;
