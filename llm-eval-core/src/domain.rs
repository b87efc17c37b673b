pub mod ids;
pub mod task;
pub mod subtask;
pub mod evaluator;
pub mod model;
pub mod test_case;
pub mod dimension;
pub mod execution;

pub use ids::*;
pub use task::*;
pub use subtask::*;
pub use evaluator::*;
pub use model::*;
pub use test_case::*;
pub use dimension::*;
pub use execution::*;
