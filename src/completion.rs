use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

/// One sub-unit of a multi-step session. Readings that were not taken are
/// `None`.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub index: i32,
    pub fields: BTreeMap<String, Option<f64>>,
}

impl StepRecord {
    pub fn new(index: i32) -> Self {
        Self {
            index,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Option<f64>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// A step counts once any meaningful reading holds a positive number.
    pub fn has_measurement(&self, meaningful_fields: &[&str]) -> bool {
        meaningful_fields.iter().any(|name| {
            matches!(self.fields.get(*name), Some(Some(value)) if value.is_finite() && *value > 0.0)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionState {
    pub completed_steps: i32,
    pub is_complete: bool,
}

/// Counts measured steps for an existing session.
///
/// The count never drops below 1: a session with nothing measured is still on
/// step 1. Completion needs the count to equal `total_expected_steps`.
pub fn compute_completion(
    steps: &[StepRecord],
    total_expected_steps: i32,
    meaningful_fields: &[&str],
) -> CompletionState {
    let mut measured = 0usize;
    for step in steps {
        if step.has_measurement(meaningful_fields) {
            measured += 1;
        } else {
            debug!(step = step.index, "step has no meaningful reading");
        }
    }
    let completed_steps = i32::try_from(measured).unwrap_or(i32::MAX).max(1);

    CompletionState {
        completed_steps,
        is_complete: completed_steps == total_expected_steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMP: &[&str] = &["temp"];

    #[test]
    fn zero_and_missing_readings_do_not_count() {
        let steps = vec![
            StepRecord::new(1).with("temp", Some(45.0)),
            StepRecord::new(2).with("temp", Some(0.0)),
            StepRecord::new(3).with("temp", None),
        ];

        let state = compute_completion(&steps, 3, TEMP);
        assert_eq!(state.completed_steps, 1);
        assert!(!state.is_complete);
    }

    #[test]
    fn all_steps_measured_is_complete() {
        let steps: Vec<StepRecord> = (1..=3)
            .map(|i| StepRecord::new(i).with("temp", Some(40.0 + i as f64)))
            .collect();

        let state = compute_completion(&steps, 3, TEMP);
        assert_eq!(state, CompletionState { completed_steps: 3, is_complete: true });
    }

    #[test]
    fn empty_session_reports_first_step() {
        let state = compute_completion(&[], 4, TEMP);
        assert_eq!(state, CompletionState { completed_steps: 1, is_complete: false });
    }

    #[test]
    fn empty_single_step_session_counts_as_complete() {
        let state = compute_completion(&[], 1, TEMP);
        assert_eq!(state, CompletionState { completed_steps: 1, is_complete: true });
    }

    #[test]
    fn status_fields_never_count() {
        let steps = vec![
            StepRecord::new(1).with("relay_status", Some(1.0)),
            StepRecord::new(2).with("relay_status", Some(1.0)),
        ];

        let state = compute_completion(&steps, 2, TEMP);
        assert_eq!(state.completed_steps, 1);
        assert!(!state.is_complete);
    }

    #[test]
    fn any_one_meaningful_field_is_enough() {
        let fields = &["kv", "ma"];
        let steps = vec![
            StepRecord::new(1).with("kv", None).with("ma", Some(350.0)),
            StepRecord::new(2).with("kv", Some(-3.0)).with("ma", Some(f64::NAN)),
        ];

        assert_eq!(compute_completion(&steps, 2, fields).completed_steps, 1);
    }
}
