use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::protocol::SummaryPayload;

/// Distinct visited cells per unit of fuel; zero when no fuel was consumed.
pub fn efficiency(distinct_cells: usize, fuel: f64) -> f64 {
    if fuel > 0.0 {
        distinct_cells as f64 / fuel
    } else {
        0.0
    }
}

/// Canonical end-of-episode result, as published by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub reward: f64,
    pub coverage: f64,
    pub bandits: usize,
    pub fuel_consumed: f64,
    pub fuel_efficiency: f64,
    pub unique_blocks: usize,
}

impl EpisodeSummary {
    /// Builds the published summary from the server payload.
    ///
    /// `local_unique_blocks` only fills in `unique_blocks` when the server left it out.
    pub fn from_payload(payload: &SummaryPayload, local_unique_blocks: usize) -> Self {
        let unique_blocks = payload.unique_blocks.unwrap_or(local_unique_blocks);
        let fuel_efficiency = if payload.fuel_consumed == 0.0 {
            0.0
        } else {
            payload
                .fuel_efficiency
                .unwrap_or_else(|| efficiency(unique_blocks, payload.fuel_consumed))
        };
        EpisodeSummary {
            reward: payload.reward,
            coverage: payload.coverage,
            bandits: payload.bandits,
            fuel_consumed: payload.fuel_consumed,
            fuel_efficiency,
            unique_blocks,
        }
    }
}

/// Running per-episode aggregates fed by the step stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeStats {
    pub step_index: u64,
    pub coverage: f64,
    pub total_reward: f64,
    pub total_fuel: f64,
    pub distinct_cells: usize,
    pub threats: usize,
    pub steps_applied: u64,
    summary: Option<EpisodeSummary>,
}

impl EpisodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locally derived efficiency ratio, always `>= 0`.
    pub fn efficiency(&self) -> f64 {
        efficiency(self.distinct_cells, self.total_fuel)
    }

    /// Overwrites the snapshot fields of a step and adds its deltas.
    pub fn record_step(&mut self, step_index: u64, coverage: f64, reward: f64, fuel: f64) {
        self.step_index = step_index;
        self.coverage = coverage;
        self.total_reward += reward;
        self.total_fuel += fuel;
        self.steps_applied += 1;
    }

    pub fn sync_overlay(&mut self, distinct_cells: usize, threats: usize) {
        self.distinct_cells = distinct_cells;
        self.threats = threats;
    }

    /// Publishes the server's summary; only the first one for an episode is kept.
    ///
    /// Returns `false` when a summary had already been published.
    pub fn finalize(&mut self, payload: &SummaryPayload) -> bool {
        if self.summary.is_some() {
            warn!("Ignoring repeated terminal summary for finished episode");
            return false;
        }
        let summary = EpisodeSummary::from_payload(payload, self.distinct_cells);
        info!(
            reward = summary.reward,
            coverage = summary.coverage,
            bandits = summary.bandits,
            fuel = summary.fuel_consumed,
            efficiency = summary.fuel_efficiency,
            unique_blocks = summary.unique_blocks,
            "Episode finished"
        );
        self.summary = Some(summary);
        true
    }

    pub fn summary(&self) -> Option<&EpisodeSummary> {
        self.summary.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    /// Figures to display: the server summary once published, local totals before.
    pub fn display(&self) -> EpisodeSummary {
        match &self.summary {
            Some(summary) => summary.clone(),
            None => EpisodeSummary {
                reward: self.total_reward,
                coverage: self.coverage,
                bandits: self.threats,
                fuel_consumed: self.total_fuel,
                fuel_efficiency: self.efficiency(),
                unique_blocks: self.distinct_cells,
            },
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
