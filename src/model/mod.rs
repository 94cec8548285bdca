pub mod application;
pub mod common;
pub mod entity;
pub mod record;
pub mod relationship;
pub mod resolution_context;
pub mod template;

pub use application::*;
pub use common::*;
pub use entity::*;
pub use record::*;
pub use relationship::*;
pub use resolution_context::*;
pub use template::*;
