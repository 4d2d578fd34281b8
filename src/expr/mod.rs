pub mod kinds;
pub mod expression;
pub mod path;
pub mod case_builder;
pub mod order;
pub mod projection;

pub use kinds::*;
pub use expression::*;
pub use path::*;
pub use case_builder::*;
pub use order::*;
pub use projection::*;
