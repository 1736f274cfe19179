pub mod catalog;
pub mod datasets;
pub mod recognizer;

pub use catalog::*;
pub use datasets::*;
pub use recognizer::*;
