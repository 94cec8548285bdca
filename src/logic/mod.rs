pub mod apply;
pub mod normalize;
pub mod resolve;
pub mod substitute;
pub mod validate;

pub use apply::*;
pub use normalize::*;
pub use resolve::*;
pub use substitute::*;
pub use validate::*;
