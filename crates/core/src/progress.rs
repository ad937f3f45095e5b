//! Backend-neutral progress events and their normalization into a single
//! monotonic fraction.
//!
//! Progress is `completed_steps / total_steps` where every graph node
//! contributes its step weight. Node weights come from the compiled graph;
//! nodes the backend reports that the graph does not know (backend-internal
//! expansions) are added on first sight. The reported fraction is clamped so
//! it never decreases, whatever order events arrive in.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowGraph;

/// What any backend reports while a job executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    ExecutionStarted,
    NodeStarted {
        node_id: String,
    },
    /// Nodes whose results were served from cache without running.
    NodesCached {
        node_ids: Vec<String>,
    },
    StepProgress {
        node_id: Option<String>,
        value: u32,
        max: u32,
    },
    NodeFinished {
        node_id: String,
    },
    ExecutionError {
        node_id: Option<String>,
        message: String,
        exception_type: Option<String>,
    },
    ExecutionComplete,
    Interrupted,
}

impl BackendEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackendEvent::ExecutionComplete
                | BackendEvent::ExecutionError { .. }
                | BackendEvent::Interrupted
        )
    }
}

/// Folds backend events into `progress ∈ [0, 1]`.
#[derive(Debug, Clone)]
pub struct ProgressNormalizer {
    weights: HashMap<String, u32>,
    done: HashMap<String, u32>,
    finished: HashSet<String>,
    current: Option<String>,
    reported: f64,
}

impl ProgressNormalizer {
    pub fn new(weights: HashMap<String, u32>) -> Self {
        Self {
            weights,
            done: HashMap::new(),
            finished: HashSet::new(),
            current: None,
            reported: 0.0,
        }
    }

    pub fn for_graph(graph: &WorkflowGraph) -> Self {
        Self::new(graph.step_weights())
    }

    /// Highest fraction reported so far.
    pub fn fraction(&self) -> f64 {
        self.reported
    }

    /// Node currently executing, if known.
    pub fn current_node(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Apply one event and return the (non-decreasing) fraction.
    pub fn apply(&mut self, event: &BackendEvent) -> f64 {
        match event {
            BackendEvent::ExecutionStarted | BackendEvent::Interrupted => {}
            BackendEvent::NodeStarted { node_id } => {
                // Nodes run one at a time; a new start finishes the last one.
                if let Some(previous) = self.current.take() {
                    if previous != *node_id {
                        self.finish(&previous);
                    }
                }
                self.weights.entry(node_id.clone()).or_insert(1);
                self.current = Some(node_id.clone());
            }
            BackendEvent::NodesCached { node_ids } => {
                for id in node_ids {
                    self.finish(id);
                }
            }
            BackendEvent::StepProgress {
                node_id,
                value,
                max,
            } => {
                let Some(id) = node_id.clone().or_else(|| self.current.clone()) else {
                    return self.reported;
                };
                let max = (*max).max(1);
                let weight = self.weights.entry(id.clone()).or_insert(max);
                if *weight < max {
                    *weight = max;
                }
                let scaled = ((*value).min(max) as u64 * *weight as u64 / max as u64) as u32;
                let done = self.done.entry(id).or_insert(0);
                *done = (*done).max(scaled);
            }
            BackendEvent::NodeFinished { node_id } => self.finish(node_id),
            BackendEvent::ExecutionComplete => {
                self.reported = 1.0;
                return 1.0;
            }
            BackendEvent::ExecutionError { .. } => {}
        }
        self.recompute()
    }

    // ---- private helpers ----

    fn finish(&mut self, node_id: &str) {
        let weight = *self.weights.entry(node_id.to_string()).or_insert(1);
        self.done.insert(node_id.to_string(), weight);
        self.finished.insert(node_id.to_string());
    }

    fn recompute(&mut self) -> f64 {
        let total: u64 = self.weights.values().map(|w| *w as u64).sum();
        if total == 0 {
            return self.reported;
        }
        let completed: u64 = self
            .done
            .iter()
            .map(|(id, d)| (*d).min(self.weights.get(id).copied().unwrap_or(*d)) as u64)
            .sum();
        // Completion is only ever declared by ExecutionComplete.
        let fraction = (completed as f64 / total as f64).min(0.99);
        if fraction > self.reported {
            self.reported = fraction;
        }
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn started(id: &str) -> BackendEvent {
        BackendEvent::NodeStarted {
            node_id: id.to_string(),
        }
    }

    fn step(value: u32, max: u32) -> BackendEvent {
        BackendEvent::StepProgress {
            node_id: None,
            value,
            max,
        }
    }

    #[test]
    fn sampler_steps_dominate_progress() {
        let mut n = ProgressNormalizer::new(weights(&[("1", 1), ("2", 8), ("3", 1)]));
        n.apply(&started("1"));
        n.apply(&started("2"));
        assert_eq!(n.fraction(), 0.1);
        n.apply(&step(4, 8));
        assert_eq!(n.fraction(), 0.5);
        n.apply(&started("3"));
        assert_eq!(n.fraction(), 0.9);
        assert_eq!(n.apply(&BackendEvent::ExecutionComplete), 1.0);
    }

    #[test]
    fn out_of_order_events_never_decrease_progress() {
        let mut n = ProgressNormalizer::new(weights(&[("1", 10)]));
        n.apply(&started("1"));
        n.apply(&step(7, 10));
        let high = n.fraction();
        n.apply(&step(3, 10));
        assert_eq!(n.fraction(), high);
        // A late start for an unknown node grows the total but not backwards.
        n.apply(&started("99"));
        assert!(n.fraction() >= high);
    }

    #[test]
    fn cached_nodes_count_as_done() {
        let mut n = ProgressNormalizer::new(weights(&[("1", 1), ("2", 1), ("3", 2)]));
        n.apply(&BackendEvent::NodesCached {
            node_ids: vec!["1".into(), "2".into()],
        });
        assert_eq!(n.fraction(), 0.5);
    }

    #[test]
    fn progress_for_unknown_node_enlarges_weight() {
        let mut n = ProgressNormalizer::new(weights(&[("1", 1)]));
        n.apply(&BackendEvent::StepProgress {
            node_id: Some("7".into()),
            value: 1,
            max: 3,
        });
        assert_eq!(n.fraction(), 0.25);
    }

    #[test]
    fn errors_do_not_complete() {
        let mut n = ProgressNormalizer::new(weights(&[("1", 2)]));
        n.apply(&started("1"));
        n.apply(&step(1, 2));
        let f = n.apply(&BackendEvent::ExecutionError {
            node_id: Some("1".into()),
            message: "oom".into(),
            exception_type: None,
        });
        assert_eq!(f, 0.5);
    }

    #[test]
    fn step_without_any_node_is_ignored() {
        let mut n = ProgressNormalizer::new(HashMap::new());
        assert_eq!(n.apply(&step(5, 10)), 0.0);
    }
}
