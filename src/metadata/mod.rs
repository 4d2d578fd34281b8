pub mod entity;
pub mod record;
pub mod registry;

pub use entity::*;
pub use record::*;
pub use registry::*;
