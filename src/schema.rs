use serde::{Deserialize, Serialize};

/// Record families the persistence gateway knows about.
///
/// Each kind carries its own allowed-field set: the gateway projects
/// incoming data onto that set before construction, so unrecognized
/// attributes are dropped instead of causing failure. The sets are
/// declared once, right here, with no runtime introspection anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Event,
    Team,
    League,
    Incident,
}

impl RecordKind {
    pub fn allowed_fields(self) -> &'static [&'static str] {
        match self {
            RecordKind::Event => EVENT_FIELDS,
            RecordKind::Team => TEAM_FIELDS,
            RecordKind::League => LEAGUE_FIELDS,
            RecordKind::Incident => INCIDENT_FIELDS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Event => "event",
            RecordKind::Team => "team",
            RecordKind::League => "league",
            RecordKind::Incident => "incident",
        }
    }
}

/// Stable external identifier every record is keyed by.
pub const KEY_FIELD: &str = "sofascore_id";

pub const EVENT_FIELDS: &[&str] = &[
    "sofascore_id",
    "sport",
    "slug",
    "start_timestamp",
    "status",
    "status_type",
    "home_team_id",
    "home_team",
    "away_team_id",
    "away_team",
    "home_score",
    "away_score",
    "league_id",
    "league",
];

pub const TEAM_FIELDS: &[&str] = &[
    "sofascore_id",
    "name",
    "slug",
    "short_name",
    "name_code",
    "national",
    "sport",
];

pub const LEAGUE_FIELDS: &[&str] = &[
    "sofascore_id",
    "name",
    "slug",
    "category_name",
    "country",
    "sport",
];

pub const INCIDENT_FIELDS: &[&str] = &[
    "sofascore_id",
    "event_id",
    "incident_type",
    "time",
    "player_name",
    "is_home",
];

// ------------------------------------------------------------
// Normalized match/event record
// ------------------------------------------------------------
//
// Produced by the HTTP response parsers from scheduled/live event
// summaries. Optional fields stay unserialized when absent so a
// partial record merges into an existing row without nulling out
// columns another interception already filled.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventRecord {
    /// Stable external identifier
    pub sofascore_id: i64,

    /// Sport key this event belongs to ("football", "tennis", …)
    pub sport: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    /// Scheduled kickoff, Unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<i64>,

    /// Human-readable status ("1st half", "Ended")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Coarse status class ("inprogress", "finished", "notstarted")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_team_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_team: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_team_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_team: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_score: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_score: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub league_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub league: Option<String>,
}

// ------------------------------------------------------------
// Team record
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TeamRecord {
    pub sofascore_id: i64,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub national: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,
}

// ------------------------------------------------------------
// League / tournament record
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeagueRecord {
    pub sofascore_id: i64,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,
}

// ------------------------------------------------------------
// Match incident (goal, card, substitution, …)
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IncidentRecord {
    pub sofascore_id: i64,

    /// Event this incident belongs to
    pub event_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,

    /// Match minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_home: Option<bool>,
}

// ------------------------------------------------------------
// Real-time score update (WebSocket)
// ------------------------------------------------------------
//
// Never persisted as its own row: it is applied as a partial update
// onto the event it belongs to, relying on the gateway's merge
// semantics.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScoreUpdate {
    pub event_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_score: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_score: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_type: Option<String>,
}
