pub mod engine;
pub mod connectors;
pub mod expr;
pub mod metadata;
pub mod demo;
pub mod cli;
pub mod utils;

pub use engine::*;
pub use connectors::*;
pub use expr::*;
pub use metadata::*;
pub use cli::*;
pub use utils::*;
