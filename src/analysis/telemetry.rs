use crate::cluster::MiningReport;
use crate::graph::DependencyGroup;
use crate::store::types::ClusterId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleReport {
    pub groups: usize,
    pub states: usize,
    /// States emitted inside a cluster group.
    pub clustered_states: usize,
    /// `clustered_states / states`, 0 for an empty schedule.
    pub clustered_share: f64,
    /// Times a cluster resumed after some other group was emitted in between.
    /// Lower is better; each break splits one shared routine call.
    pub contiguity_breaks: usize,
    pub largest_group: usize,
    pub mining: Option<MiningReport>,
}

impl ScheduleReport {
    pub fn analyze(groups: &[DependencyGroup]) -> Self {
        let mut states = 0;
        let mut clustered_states = 0;
        let mut largest_group = 0;
        let mut contiguity_breaks = 0;
        // Position of the last group each cluster appeared in.
        let mut last_seen: HashMap<ClusterId, usize> = HashMap::new();

        for (i, group) in groups.iter().enumerate() {
            states += group.states.len();
            largest_group = largest_group.max(group.states.len());

            if let Some(cluster) = group.cluster {
                clustered_states += group.states.len();
                if let Some(prev) = last_seen.insert(cluster, i) {
                    if prev + 1 != i {
                        contiguity_breaks += 1;
                    }
                }
            }
        }

        Self {
            groups: groups.len(),
            states,
            clustered_states,
            clustered_share: if states > 0 { clustered_states as f64 / states as f64 } else { 0.0 },
            contiguity_breaks,
            largest_group,
            mining: None,
        }
    }

    pub fn with_mining(mut self, report: MiningReport) -> Self {
        self.mining = Some(report);
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ScheduleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SCHEDULE: {} states in {} groups", self.states, self.groups)?;
        writeln!(
            f,
            "  clustered: {} ({:.1}%), breaks: {}, largest group: {}",
            self.clustered_states,
            self.clustered_share * 100.0,
            self.contiguity_breaks,
            self.largest_group
        )?;
        if let Some(m) = &self.mining {
            writeln!(
                f,
                "  mining: {} candidates, {} too small, {} conflicting, {} selected (cost {})",
                m.candidates, m.discarded_small, m.dropped_conflicts, m.selected, m.selection_cost
            )?;
        }
        Ok(())
    }
}
