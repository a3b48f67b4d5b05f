pub mod body;
pub mod path;

pub use body::*;
pub use path::*;
