// Core engine components
pub mod dialect;
pub mod query_spec;
pub mod query_compiler;
pub mod result_mapper;
pub mod query_executor;
pub mod query_builder;
pub mod session;

pub use dialect::*;
pub use query_spec::*;
pub use query_compiler::*;
pub use result_mapper::*;
pub use query_executor::*;
pub use query_builder::*;
pub use session::*;
