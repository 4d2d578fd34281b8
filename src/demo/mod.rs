// Member/team demo model and scenarios
pub mod model;
pub mod scenarios;

pub use model::*;
pub use scenarios::*;
