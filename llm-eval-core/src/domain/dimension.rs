use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ids::{DimensionId, EvaluatorId};

/// A scored aspect of a response, bound to one evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Dimension {
    pub id: DimensionId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub criteria: Option<String>,
    pub evaluator_id: EvaluatorId,
    /// Lower runs sooner.
    #[serde(default)]
    pub priority: i32,
    /// Dimensions whose sibling SubTasks must complete first.
    #[serde(default)]
    pub depends_on: Vec<DimensionId>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, evaluator_id: EvaluatorId) -> Self {
        Self {
            id: DimensionId::new(),
            name: name.into(),
            criteria: None,
            evaluator_id,
            priority: 0,
            depends_on: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depending_on(mut self, dimensions: Vec<DimensionId>) -> Self {
        self.depends_on = dimensions;
        self
    }
}
