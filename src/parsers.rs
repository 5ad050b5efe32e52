//! Pure payload parsers.
//!
//! Every function here takes a decoded JSON value and produces
//! normalized records, nothing else: no I/O, no locking, no metrics.
//! Unknown fields are ignored and malformed entries are skipped so a
//! partially broken payload still yields the records it does contain.

use serde_json::Value;

use crate::schema::{EventRecord, IncidentRecord, LeagueRecord, ScoreUpdate, TeamRecord};

/// Everything extractable from one event-summary payload.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub events: Vec<EventRecord>,
    pub teams: Vec<TeamRecord>,
    pub leagues: Vec<LeagueRecord>,
    /// Entries that had no usable identifier.
    pub skipped: usize,
}

/// Parse a scheduled/live/featured event-summary body.
///
/// The body carries an `events` array; each entry describes one match
/// with its teams and tournament inlined. `sport_hint` (usually the
/// first capture group of the matched URL pattern) wins over the
/// per-entry tournament sport when both are present, since the URL is
/// the more reliable of the two.
pub fn parse_event_summaries(body: &Value, sport_hint: Option<&str>) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let Some(entries) = body.get("events").and_then(Value::as_array) else {
        return batch;
    };

    for entry in entries {
        let Some(id) = entry.get("id").and_then(Value::as_i64) else {
            batch.skipped += 1;
            continue;
        };

        let tournament = entry.get("tournament");
        let sport = sport_hint
            .map(str::to_string)
            .or_else(|| {
                tournament
                    .and_then(|t| t.pointer("/category/sport/slug"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(team) = entry.get("homeTeam").and_then(|t| parse_team(t, &sport)) {
            batch.teams.push(team);
        }
        if let Some(team) = entry.get("awayTeam").and_then(|t| parse_team(t, &sport)) {
            batch.teams.push(team);
        }
        if let Some(league) = tournament.and_then(|t| parse_league(t, &sport)) {
            batch.leagues.push(league);
        }

        batch.events.push(EventRecord {
            sofascore_id: id,
            sport,
            slug: str_field(entry, "slug"),
            start_timestamp: entry.get("startTimestamp").and_then(Value::as_i64),
            status: entry.pointer("/status/description").and_then(Value::as_str).map(str::to_string),
            status_type: entry.pointer("/status/type").and_then(Value::as_str).map(str::to_string),
            home_team_id: entry.pointer("/homeTeam/id").and_then(Value::as_i64),
            home_team: entry.pointer("/homeTeam/name").and_then(Value::as_str).map(str::to_string),
            away_team_id: entry.pointer("/awayTeam/id").and_then(Value::as_i64),
            away_team: entry.pointer("/awayTeam/name").and_then(Value::as_str).map(str::to_string),
            home_score: entry.pointer("/homeScore/current").and_then(Value::as_i64),
            away_score: entry.pointer("/awayScore/current").and_then(Value::as_i64),
            league_id: tournament.and_then(|t| t.get("id")).and_then(Value::as_i64),
            league: tournament
                .and_then(|t| t.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    batch
}

fn parse_team(team: &Value, sport: &str) -> Option<TeamRecord> {
    Some(TeamRecord {
        sofascore_id: team.get("id").and_then(Value::as_i64)?,
        name: str_field(team, "name")?,
        slug: str_field(team, "slug"),
        short_name: str_field(team, "shortName"),
        name_code: str_field(team, "nameCode"),
        national: team.get("national").and_then(Value::as_bool),
        sport: Some(sport.to_string()),
    })
}

fn parse_league(tournament: &Value, sport: &str) -> Option<LeagueRecord> {
    Some(LeagueRecord {
        sofascore_id: tournament.get("id").and_then(Value::as_i64)?,
        name: str_field(tournament, "name")?,
        slug: str_field(tournament, "slug"),
        category_name: tournament
            .pointer("/category/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        country: tournament
            .pointer("/category/alpha2")
            .and_then(Value::as_str)
            .map(str::to_string),
        sport: Some(sport.to_string()),
    })
}

/// Parse a score-change frame.
///
/// Frames look like
/// `{"type":"score","data":{"eventId":…,"homeScore":{"current":…},…}}`.
/// A frame without an event id is unusable and yields `None`.
pub fn parse_score_update(frame: &Value) -> Option<ScoreUpdate> {
    let data = frame.get("data")?;
    Some(ScoreUpdate {
        event_id: data.get("eventId").and_then(Value::as_i64)?,
        home_score: data.pointer("/homeScore/current").and_then(Value::as_i64),
        away_score: data.pointer("/awayScore/current").and_then(Value::as_i64),
        status_type: data.pointer("/status/type").and_then(Value::as_str).map(str::to_string),
    })
}

/// Parse an incident frame (goal, card, substitution, …).
///
/// Requires both the incident id and the owning event id; anything
/// less has no stable key to upsert under.
pub fn parse_incident(frame: &Value) -> Option<IncidentRecord> {
    let data = frame.get("data")?;
    Some(IncidentRecord {
        sofascore_id: data.get("id").and_then(Value::as_i64)?,
        event_id: data.get("eventId").and_then(Value::as_i64)?,
        incident_type: str_field(data, "incidentType"),
        time: data.get("time").and_then(Value::as_i64),
        player_name: str_field(data, "playerName"),
        is_home: data.get("isHome").and_then(Value::as_bool),
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary_body() -> Value {
        json!({
            "events": [
                {
                    "id": 9001,
                    "slug": "arsenal-chelsea",
                    "startTimestamp": 1724500000,
                    "status": {"description": "1st half", "type": "inprogress"},
                    "homeTeam": {"id": 42, "name": "Arsenal", "shortName": "ARS", "nameCode": "ARS", "national": false},
                    "awayTeam": {"id": 38, "name": "Chelsea", "shortName": "CHE"},
                    "homeScore": {"current": 2},
                    "awayScore": {"current": 1},
                    "tournament": {
                        "id": 17,
                        "name": "Premier League",
                        "slug": "premier-league",
                        "category": {"name": "England", "alpha2": "EN", "sport": {"slug": "football"}}
                    },
                    "somethingTheApiAddedLastWeek": {"nested": true}
                },
                {"slug": "no-id-here"}
            ]
        })
    }

    #[test]
    fn summaries_yield_events_teams_and_leagues() {
        let batch = parse_event_summaries(&summary_body(), Some("football"));

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.teams.len(), 2);
        assert_eq!(batch.leagues.len(), 1);
        assert_eq!(batch.skipped, 1);

        let event = &batch.events[0];
        assert_eq!(event.sofascore_id, 9001);
        assert_eq!(event.sport, "football");
        assert_eq!(event.home_score, Some(2));
        assert_eq!(event.status_type.as_deref(), Some("inprogress"));
        assert_eq!(event.league_id, Some(17));

        assert_eq!(batch.teams[0].name, "Arsenal");
        assert_eq!(batch.teams[1].name_code, None);
        assert_eq!(batch.leagues[0].country.as_deref(), Some("EN"));
    }

    #[test]
    fn sport_falls_back_to_tournament_when_no_hint() {
        let batch = parse_event_summaries(&summary_body(), None);
        assert_eq!(batch.events[0].sport, "football");
    }

    #[test]
    fn missing_events_array_is_empty_not_an_error() {
        let batch = parse_event_summaries(&json!({"featured": []}), Some("tennis"));
        assert!(batch.events.is_empty());
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn score_update_needs_an_event_id() {
        let frame = json!({
            "type": "score",
            "data": {"eventId": 9001, "homeScore": {"current": 3}, "status": {"type": "inprogress"}}
        });
        let update = parse_score_update(&frame).unwrap();
        assert_eq!(update.event_id, 9001);
        assert_eq!(update.home_score, Some(3));
        assert_eq!(update.away_score, None);

        assert!(parse_score_update(&json!({"type": "score", "data": {}})).is_none());
        assert!(parse_score_update(&json!({"type": "score"})).is_none());
    }

    #[test]
    fn incident_needs_both_ids() {
        let frame = json!({
            "type": "incident",
            "data": {"id": 501, "eventId": 9001, "incidentType": "goal", "time": 37, "playerName": "Saka", "isHome": true}
        });
        let incident = parse_incident(&frame).unwrap();
        assert_eq!(incident.sofascore_id, 501);
        assert_eq!(incident.event_id, 9001);
        assert_eq!(incident.incident_type.as_deref(), Some("goal"));

        assert!(parse_incident(&json!({"data": {"id": 501}})).is_none());
        assert!(parse_incident(&json!({"data": {"eventId": 9001}})).is_none());
    }
}
