//! 📦 Common data structures — the building blocks of parsr
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — 3:47 AM
//!
//! A match ends. Ten players log off. One of them queues a parse request and goes
//! to bed. Somewhere, a `Job` is born: a match id, a handful of players, and a
//! replay URL that doesn't exist yet. This module holds the structs that ferry that
//! job through the worker, and the shapes it comes out as on the other side.
//!
//! 🧠 Knowledge graph:
//! - `Job` — what the queue hands us. Owned by exactly one slot while it runs.
//! - `ParseAggregate` — the reducer's one-object summary of the event stream.
//! - `MergedMatchRecord` — aggregate overlaid with job fields (job wins). See `merger`.
//! - `PersistOptions` — how the store should treat the record. Computed per job.
//! - `NotificationMessage` — one per eligible player. Ephemeral.
//!
//! 🦆

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📄 The reducer's output: an arbitrary JSON object. We don't read it. We just carry it.
pub type ParseAggregate = Map<String, Value>;

/// 🏷️ Where a job came from.
///
/// Only `scanner` means anything to the worker (it gates scenario sampling).
/// Everything else is kept verbatim so it round-trips into the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    Scanner,
    #[default]
    Unknown,
    Other(String),
}

impl Origin {
    pub fn is_scanner(&self) -> bool {
        matches!(self, Origin::Scanner)
    }

    fn is_unknown(&self) -> bool {
        matches!(self, Origin::Unknown)
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        match value.as_str() {
            "scanner" => Origin::Scanner,
            "" => Origin::Unknown,
            _ => Origin::Other(value),
        }
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        Origin::from(value.to_string())
    }
}

impl From<Origin> for String {
    fn from(value: Origin) -> Self {
        match value {
            Origin::Scanner => "scanner".to_string(),
            Origin::Unknown => String::new(),
            Origin::Other(other) => other,
        }
    }
}

/// 🎮 One participant of a match, as listed in the job's `pgroup`.
///
/// The entry goes back into the stored record exactly as the producer wrote it: absent
/// keys stay absent, an explicit `null` stays `null`, and unmodelled keys ride in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Player {
    /// 🪪 `None` = no key at all. `Some(None)` = the producer wrote `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub account_id: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_slot: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<u64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(Some)
}

impl Player {
    pub fn new(account_id: Option<u64>, hero_id: u32, player_slot: u8) -> Self {
        Self {
            account_id: account_id.map(Some),
            hero_id: Some(hero_id),
            player_slot: Some(player_slot),
            extra: Map::new(),
        }
    }

    pub fn account_id(&self) -> Option<u64> {
        self.account_id.flatten()
    }

    /// 🔔 A player we can notify: the account is known and not the zero placeholder.
    pub fn notifiable_account(&self) -> Option<u64> {
        self.account_id().filter(|id| *id != 0)
    }
}

/// 📬 A unit of replay-parsing work, straight off the queue.
///
/// Field names match the producer's wire format (`doLogParse` included) because the
/// serialized job is merged into the stored record as-is. Anything the producer put
/// on the job that we don't model lands in `extra` and rides along untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Job {
    pub match_id: u64,
    /// 🔗 Filled in by the resolver. `None` until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Origin::is_unknown")]
    pub origin: Origin,
    #[serde(default, rename = "doLogParse")]
    pub do_log_parse: bool,
    /// 🎯 slot key → player, in the order the producer wrote them.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub pgroup: IndexMap<String, Player>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn new(match_id: u64) -> Self {
        Self {
            match_id,
            ..Default::default()
        }
    }
}

/// 📦 What the store receives: aggregate fields, with job fields stamped on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedMatchRecord(pub Map<String, Value>);

impl MergedMatchRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn match_id(&self) -> Option<u64> {
        self.0.get("match_id").and_then(Value::as_u64)
    }
}

/// 🔧 How the store should treat a parsed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOptions {
    #[serde(rename = "type")]
    pub kind: PersistKind,
    /// ⚠️ always true here: the record IS the parse, don't queue another one
    #[serde(rename = "skipParse")]
    pub skip_parse: bool,
    #[serde(rename = "doLogParse")]
    pub do_log_parse: bool,
    #[serde(rename = "doScenarios")]
    pub do_scenarios: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistKind {
    Parsed,
}

/// 🔔 The push payload for one player. Values are strings because push payloads
/// only carry strings, and the producer side has always sent them that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub match_id: String,
    pub start_time: String,
    pub hero_id: String,
    pub player_slot: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub payload: NotificationPayload,
    pub title: String,
    pub body: String,
}

impl NotificationMessage {
    /// 📝 The one template we have. "Parsed 42" / "Check out your performance in match 42."
    pub fn parsed(job: &Job, player: &Player) -> Self {
        let start_time = job.start_time.map(|t| t.to_string()).unwrap_or_default();
        Self {
            payload: NotificationPayload {
                match_id: job.match_id.to_string(),
                start_time,
                hero_id: player.hero_id.map(|h| h.to_string()).unwrap_or_default(),
                player_slot: player.player_slot.map(|s| s.to_string()).unwrap_or_default(),
            },
            title: format!("Parsed {}", job.match_id),
            body: format!("Check out your performance in match {}.", job.match_id),
        }
    }
}

/// 🎫 A job plus the queue's handle on this particular delivery of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    /// 🔑 backend-specific receipt (row id, lease id)
    pub receipt: i64,
    /// 🔁 attempts left after this one. Zero means this delivery is the last.
    pub attempts_remaining: i32,
    pub job: Job,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_the_producer_payload_survives_the_trip() -> anyhow::Result<()> {
        let raw = json!({
            "match_id": 42,
            "origin": "scanner",
            "doLogParse": true,
            "start_time": 1700000000,
            "pgroup": {
                "0": {"account_id": 7, "hero_id": 1, "player_slot": 0},
                "128": {"hero_id": 2, "player_slot": 128}
            },
            "game_mode": 22
        });

        let job: Job = serde_json::from_value(raw.clone())?;
        assert_eq!(job.match_id, 42);
        assert!(job.origin.is_scanner());
        assert!(job.do_log_parse);
        assert_eq!(job.pgroup.len(), 2);
        assert_eq!(job.extra.get("game_mode"), Some(&json!(22)));

        // 🔄 Unknown fields and wire names come back exactly as they went in.
        assert_eq!(serde_json::to_value(&job)?, raw);
        Ok(())
    }

    #[test]
    fn the_one_where_players_come_back_exactly_as_they_left() -> anyhow::Result<()> {
        let raw = json!({
            "match_id": 7,
            "pgroup": {
                "0": {"account_id": null, "hero_id": 2, "player_slot": 0, "personaname": "anon"},
                "1": {"account_id": 4294967295u64, "leaver_status": 0},
                "2": {}
            }
        });

        let job: Job = serde_json::from_value(raw.clone())?;
        assert_eq!(job.pgroup["0"].account_id, Some(None));
        assert_eq!(job.pgroup["0"].notifiable_account(), None);
        assert_eq!(job.pgroup["1"].notifiable_account(), Some(4294967295));
        assert_eq!(job.pgroup["2"], Player::default());

        assert_eq!(serde_json::to_value(&job)?, raw);
        Ok(())
    }

    #[test]
    fn the_one_where_pgroup_keeps_its_seating_chart() -> anyhow::Result<()> {
        let job: Job = serde_json::from_str(
            r#"{"match_id":1,"pgroup":{"5":{"hero_id":1},"0":{"hero_id":2},"130":{"hero_id":3}}}"#,
        )?;
        let keys: Vec<&str> = job.pgroup.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["5", "0", "130"]);
        Ok(())
    }

    #[test]
    fn the_one_where_zero_accounts_are_not_people() {
        let anon = Player::new(Some(0), 1, 0);
        let missing = Player::default();
        let real = Player::new(Some(7), 1, 0);
        assert_eq!(anon.notifiable_account(), None);
        assert_eq!(missing.notifiable_account(), None);
        assert_eq!(real.notifiable_account(), Some(7));
    }

    #[test]
    fn the_one_where_origins_other_than_scanner_keep_their_names() {
        assert_eq!(Origin::from("scanner"), Origin::Scanner);
        assert_eq!(Origin::from("api"), Origin::Other("api".to_string()));
        assert_eq!(String::from(Origin::Other("api".into())), "api");
    }

    #[test]
    fn the_one_where_the_notification_template_names_the_match() {
        let mut job = Job::new(42);
        job.start_time = Some(1700000000);
        let player = Player::new(Some(7), 1, 0);

        let message = NotificationMessage::parsed(&job, &player);
        assert_eq!(message.title, "Parsed 42");
        assert_eq!(message.body, "Check out your performance in match 42.");
        assert_eq!(message.payload.match_id, "42");
        assert_eq!(message.payload.start_time, "1700000000");
        assert_eq!(message.payload.hero_id, "1");
        assert_eq!(message.payload.player_slot, "0");
    }

    #[test]
    fn the_one_where_persist_options_speak_the_stores_dialect() -> anyhow::Result<()> {
        let options = PersistOptions {
            kind: PersistKind::Parsed,
            skip_parse: true,
            do_log_parse: false,
            do_scenarios: true,
        };
        assert_eq!(
            serde_json::to_value(options)?,
            json!({"type": "parsed", "skipParse": true, "doLogParse": false, "doScenarios": true})
        );
        Ok(())
    }
}
