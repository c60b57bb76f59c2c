use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Identity of an event. Events created while the remote was unreachable carry a
/// `Local` id until a reconcile pass swaps it for the server-assigned one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventId {
    Local(u64),
    Remote(String),
}

const LOCAL_ID_PREFIX: &str = "local-";

impl EventId {
    pub fn is_local(&self) -> bool {
        matches!(self, EventId::Local(_))
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            EventId::Remote(id) => Some(id.as_str()),
            EventId::Local(_) => None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Local(n) => write!(f, "{}{}", LOCAL_ID_PREFIX, n),
            EventId::Remote(id) => f.write_str(id),
        }
    }
}

impl FromStr for EventId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = s
            .strip_prefix(LOCAL_ID_PREFIX)
            .and_then(|rest| rest.parse::<u64>().ok())
        {
            return Ok(EventId::Local(n));
        }
        Ok(EventId::Remote(s.to_string()))
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Upcoming,
    Active,
    Past,
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upcoming" => Ok(LifecycleState::Upcoming),
            "active" => Ok(LifecycleState::Active),
            "past" => Ok(LifecycleState::Past),
            other => Err(format!("unknown lifecycle state '{}'", other)),
        }
    }
}

// ============================================================================
// Event Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Team,
    Individual,
}

/// Team layout or participant cap, depending on the kind of event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    Team {
        team_count: u32,
        members_per_team: u32,
    },
    Individual {
        total_participants: u32,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Team { .. } => EventType::Team,
            EventKind::Individual { .. } => EventType::Individual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub individual_progress: f64,
    #[serde(default)]
    pub team_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    /// Unit of progress, e.g. "steps" or "km".
    pub activity_kind: String,
    pub goal_value: f64,
    pub current_value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Derived from (now, start, end); recomputed whenever the event is loaded.
    #[serde(default)]
    pub lifecycle_state: LifecycleState,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Set when an edit of a server-known event could not be delivered.
    #[serde(default)]
    pub pending_update: bool,
}

impl Event {
    pub fn is_local_only(&self) -> bool {
        self.id.is_local()
    }

    pub fn is_team_event(&self) -> bool {
        matches!(self.kind, EventKind::Team { .. })
    }
}

/// User input for a new event. Required fields are optional here so that
/// validation can report what is missing instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub activity_kind: String,
    #[serde(default)]
    pub goal_value: f64,
    pub start: Option<String>,
    pub end: Option<String>,
    pub event_type: Option<EventType>,
    pub team_count: Option<u32>,
    pub members_per_team: Option<u32>,
    pub total_participants: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_id_display_round_trips_through_parse() {
        assert_eq!(EventId::Local(7).to_string(), "local-7");
        assert_eq!("local-7".parse::<EventId>().unwrap(), EventId::Local(7));
        assert_eq!(
            "42".parse::<EventId>().unwrap(),
            EventId::Remote("42".to_string())
        );
        // Not a counter value, so it is treated as an opaque server id.
        assert_eq!(
            "local-abc".parse::<EventId>().unwrap(),
            EventId::Remote("local-abc".to_string())
        );
    }

    #[test]
    fn event_serializes_kind_inline() {
        let event = Event {
            id: EventId::Remote("9".to_string()),
            title: "Relay".to_string(),
            description: String::new(),
            location: String::new(),
            activity_kind: "km".to_string(),
            goal_value: 100.0,
            current_value: 12.5,
            start: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
            lifecycle_state: LifecycleState::Active,
            kind: EventKind::Team {
                team_count: 2,
                members_per_team: 3,
            },
            participants: vec![],
            pending_update: false,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "team");
        assert_eq!(json["team_count"], 2);
        assert_eq!(json["id"]["remote"], "9");
        assert_eq!(json["lifecycle_state"], "active");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert!(back.is_team_event());
        assert!(!back.is_local_only());
    }
}
