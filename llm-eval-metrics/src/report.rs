use std::collections::BTreeMap;

use llm_eval_core::{DimensionId, ModelId, SubTask, SubTaskStatus};
use serde::{Deserialize, Serialize};

use crate::aggregators::{AggregatedMetrics, MetricAggregator};
use crate::normalizer::{overall_across_runs, round_dp, weighted_percentage_exact, ScoreSample};

/// Weighted score of one repetition of a (model, dimension) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunScore {
    pub repetition_index: u32,
    pub weighted_percentage: f64,
    pub test_cases: usize,
    pub total_raw: f64,
    pub total_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub model_id: ModelId,
    pub dimension_id: DimensionId,
    pub runs: Vec<RunScore>,
    /// Mean of the runs' weighted percentages.
    pub overall_percentage: Option<f64>,
    pub spread: AggregatedMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub dimensions: Vec<DimensionScore>,
    /// SubTasks that carry no score: unfinished, cancelled, or failed
    /// before a score was recorded.
    pub excluded: usize,
}

/// SubTasks of one repetition of a (model, dimension) pair.
struct RunSamples {
    samples: Vec<ScoreSample>,
    settled: bool,
}

impl ScoreReport {
    /// Builds the report from a task's SubTasks. Completed SubTasks and
    /// failures that recorded a score (the zero of an unanswered run) both
    /// contribute. A repetition counts as a run only once every one of its
    /// SubTasks is terminal.
    pub fn from_subtasks<'a>(subtasks: impl IntoIterator<Item = &'a SubTask>) -> Self {
        let mut groups: BTreeMap<(ModelId, DimensionId), BTreeMap<u32, RunSamples>> =
            BTreeMap::new();
        let mut excluded = 0;

        for subtask in subtasks {
            let run = groups
                .entry((subtask.model_id, subtask.dimension_id))
                .or_default()
                .entry(subtask.repetition_index)
                .or_insert_with(|| RunSamples {
                    samples: Vec::new(),
                    settled: true,
                });
            run.settled &= subtask.is_terminal();

            match (subtask.status, subtask.raw_score) {
                (SubTaskStatus::Completed | SubTaskStatus::Failed, Some(raw)) => {
                    run.samples.push(ScoreSample::new(raw, subtask.max_score));
                }
                _ => excluded += 1,
            }
        }

        let dimensions = groups
            .into_iter()
            .map(|((model_id, dimension_id), runs)| {
                let runs: Vec<RunScore> = runs
                    .into_iter()
                    .filter(|(_, run)| run.settled)
                    .filter_map(|(repetition_index, run)| {
                        let samples = run.samples;
                        let exact = weighted_percentage_exact(&samples)?;
                        Some(RunScore {
                            repetition_index,
                            weighted_percentage: round_dp(exact, 1),
                            test_cases: samples.len(),
                            total_raw: samples.iter().map(|s| s.raw_score).sum(),
                            total_max: samples.iter().map(|s| s.max_score).sum(),
                        })
                    })
                    .collect();

                let percentages: Vec<f64> = runs.iter().map(|r| r.weighted_percentage).collect();
                DimensionScore {
                    model_id,
                    dimension_id,
                    overall_percentage: overall_across_runs(&percentages),
                    spread: MetricAggregator::aggregate(&percentages),
                    runs,
                }
            })
            .collect();

        Self { dimensions, excluded }
    }

    pub fn find(&self, model_id: ModelId, dimension_id: DimensionId) -> Option<&DimensionScore> {
        self.dimensions
            .iter()
            .find(|d| d.model_id == model_id && d.dimension_id == dimension_id)
    }
}
