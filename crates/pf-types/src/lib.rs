pub mod algorithm;
pub mod errors;
pub mod market;
pub mod metrics;
pub mod version;

pub use algorithm::*;
pub use errors::*;
pub use market::*;
pub use metrics::*;
pub use version::*;
