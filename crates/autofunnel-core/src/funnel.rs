//! Sequential funnel arithmetic over a journey's steps.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::journey::JourneyStep;

/// One actor (user id, or session id for anonymous visitors) having reached
/// one step of a journey.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepReach {
    pub actor_id: String,
    pub step_order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
    pub step_order: u32,
    pub step_name: String,
    pub count: u64,
    /// Share of the first stage, 0–100.
    pub percentage: f64,
    /// Share of the previous stage, 0–100.
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Count actors per step, where an actor only counts for step k if it was
/// also counted for step k-1.
pub fn compute_journey_funnel(steps: &[JourneyStep], reach: &[StepReach]) -> Vec<FunnelStage> {
    let mut by_step: BTreeMap<u32, HashSet<&str>> = BTreeMap::new();
    for r in reach {
        by_step
            .entry(r.step_order)
            .or_default()
            .insert(r.actor_id.as_str());
    }

    let mut ordered: Vec<&JourneyStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_order);

    let mut previous: Option<HashSet<&str>> = None;
    let mut counts = Vec::with_capacity(ordered.len());
    for step in &ordered {
        let reached = by_step.get(&step.step_order).cloned().unwrap_or_default();
        let qualified: HashSet<&str> = match &previous {
            Some(prev) => reached.intersection(prev).copied().collect(),
            None => reached,
        };
        counts.push(qualified.len() as u64);
        previous = Some(qualified);
    }

    let first = counts.first().copied().unwrap_or(0);
    ordered
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            let count = counts[idx];
            let prev_count = if idx > 0 { counts[idx - 1] } else { count };
            let conversion = if prev_count > 0 {
                count as f64 / prev_count as f64 * 100.0
            } else {
                0.0
            };
            let overall = if first > 0 {
                count as f64 / first as f64 * 100.0
            } else {
                0.0
            };
            FunnelStage {
                step_order: step.step_order,
                step_name: step.step_name.clone(),
                count,
                percentage: round1(overall),
                conversion_rate: round1(conversion),
                drop_off_rate: round1(100.0 - conversion),
            }
        })
        .collect()
}
