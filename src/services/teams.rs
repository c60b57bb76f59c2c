use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::models::{Event, Participant};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStanding {
    pub team_id: String,
    pub members: usize,
    pub progress: f64,
}

/// Per-team totals for a team event, best team first.
///
/// The API reports a `team_progress` on each member row, which can lag behind
/// the members' own numbers; the larger of the reported value and the summed
/// individual progress wins. Participants without a team are left out.
pub fn team_standings(event: &Event) -> Vec<TeamStanding> {
    let mut teams: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();

    for p in &event.participants {
        let Some(team_id) = p.team_id.as_deref() else {
            continue;
        };
        let entry = teams.entry(team_id).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += p.individual_progress.max(0.0);
        entry.2 = entry.2.max(p.team_progress);
    }

    let mut standings: Vec<TeamStanding> = teams
        .into_iter()
        .map(|(team_id, (members, summed, reported))| TeamStanding {
            team_id: team_id.to_string(),
            members,
            progress: summed.max(reported),
        })
        .collect();

    standings.sort_by(|a, b| {
        b.progress
            .total_cmp(&a.progress)
            .then_with(|| a.team_id.cmp(&b.team_id))
    });
    standings
}

pub fn participant_count(event: &Event) -> usize {
    event.participants.len()
}

/// Sum of individual progress, ignoring negative entries.
pub fn aggregate_progress(participants: &[Participant]) -> f64 {
    participants
        .iter()
        .map(|p| p.individual_progress.max(0.0))
        .sum()
}
