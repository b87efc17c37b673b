pub mod aggregators;
pub mod normalizer;
pub mod report;

pub use aggregators::*;
pub use normalizer::*;
pub use report::*;
