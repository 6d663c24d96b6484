//! Conflict-resolution configuration and decision logic.
//!
//! A conflict is a mismatch between an intended DML outcome and the
//! target database's actual state: the row an UPDATE/DELETE aimed at is
//! missing, or the row an INSERT tried to create already exists. Per
//! (table, channel) configuration decides what happens next; the
//! decision table lives in [`resolution_plan`] and the writer executes
//! the plan.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_model::EventType;

use crate::LoadStatus;

/// What to do when a conflict is detected for a given original event
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Surface the conflict and halt the batch for an operator.
    Manual,
    /// Retry as the opposite DML type (INSERT ⇄ UPDATE).
    Fallback,
    /// Compare a designated column; the newer row wins.
    NewerWins,
    /// Keep the existing row and move on.
    Ignore,
}

/// How newer-wins finds the value to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "column")]
pub enum DetectionMethod {
    /// Compare a timestamp column.
    Timestamp(String),
    /// Compare a monotonically-increasing version column.
    Version(String),
}

impl DetectionMethod {
    /// The designated comparison column.
    pub fn column_name(&self) -> &str {
        match self {
            DetectionMethod::Timestamp(name) | DetectionMethod::Version(name) => name,
        }
    }
}

/// Whether ignore decisions apply to whole rows or single columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Row,
    Column,
}

/// Conflict policy for one (table, channel) pair; `*` wildcards match
/// any table or channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSetting {
    /// Qualified target table name, or `*`
    pub table: String,
    /// Channel id, or `*`
    pub channel: String,
    /// Policy when an INSERT hits an existing row
    pub insert_policy: ResolutionPolicy,
    /// Policy when an UPDATE finds no row
    pub update_policy: ResolutionPolicy,
    /// Policy when a DELETE finds no row
    pub delete_policy: ResolutionPolicy,
    /// Comparison method for newer-wins policies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionMethod>,
    /// Row vs column granularity for ignore decisions
    #[serde(default)]
    pub granularity: Granularity,
}

impl ConflictSetting {
    /// The channel-default policy set: fall back between INSERT and
    /// UPDATE, ignore missing deletes.
    pub fn defaults() -> Self {
        Self {
            table: "*".to_string(),
            channel: "*".to_string(),
            insert_policy: ResolutionPolicy::Fallback,
            update_policy: ResolutionPolicy::Fallback,
            delete_policy: ResolutionPolicy::Ignore,
            detection: None,
            granularity: Granularity::Row,
        }
    }

    /// The policy configured for the given original event type.
    pub fn policy_for(&self, event_type: EventType) -> ResolutionPolicy {
        match event_type {
            EventType::Insert => self.insert_policy,
            EventType::Update => self.update_policy,
            _ => self.delete_policy,
        }
    }
}

/// Resolves the most specific [`ConflictSetting`] for a target.
///
/// Lookup order: (table, channel), (table, *), (*, channel), (*, *),
/// then built-in defaults.
#[derive(Default)]
pub struct ConflictSettings {
    settings: Vec<ConflictSetting>,
}

impl ConflictSettings {
    pub fn new(settings: Vec<ConflictSetting>) -> Self {
        Self { settings }
    }

    pub fn resolve(&self, table: &str, channel: &str) -> ConflictSetting {
        let find = |t: &str, c: &str| {
            self.settings
                .iter()
                .find(|s| s.table == t && s.channel == c)
                .cloned()
        };
        find(table, channel)
            .or_else(|| find(table, "*"))
            .or_else(|| find("*", channel))
            .or_else(|| find("*", "*"))
            .unwrap_or_else(ConflictSetting::defaults)
    }
}

/// The writer-executable step a policy decision produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// Surface the conflict as-is.
    Manual,
    /// Retry the event as an UPDATE of the same logical row.
    RetryAsUpdate,
    /// Retry the event as an INSERT.
    RetryAsInsert,
    /// Probe the designated column and retry only if the incoming row
    /// is newer than what is stored.
    CompareAndSwap,
    /// Count and continue.
    IgnoreRow,
    /// The configuration combination is unsupported; surface a conflict.
    Unsupported,
}

/// The resolution decision table: (original event type, detected
/// status, configured policy) to an executable plan.
pub fn resolution_plan(
    original: EventType,
    _status: LoadStatus,
    setting: &ConflictSetting,
) -> ResolutionPlan {
    let policy = setting.policy_for(original);
    match (original, policy) {
        (_, ResolutionPolicy::Manual) => ResolutionPlan::Manual,

        (EventType::Insert, ResolutionPolicy::Fallback) => ResolutionPlan::RetryAsUpdate,
        (EventType::Update, ResolutionPolicy::Fallback) => ResolutionPlan::RetryAsInsert,
        (EventType::Delete, ResolutionPolicy::Fallback) => {
            // no meaningful fallback DML exists for a missing delete
            ResolutionPlan::IgnoreRow
        }

        (EventType::Insert | EventType::Update, ResolutionPolicy::NewerWins) => {
            ResolutionPlan::CompareAndSwap
        }
        (EventType::Delete, ResolutionPolicy::NewerWins) => ResolutionPlan::IgnoreRow,

        (_, ResolutionPolicy::Ignore) => {
            if setting.granularity == Granularity::Row {
                ResolutionPlan::IgnoreRow
            } else {
                // column-level ignore cannot be honored for a whole-row
                // condition
                ResolutionPlan::Unsupported
            }
        }

        // Non-DML event types (Sql/Create/Script) never reach conflict
        // resolution — the writer dispatches them to raw/script execution,
        // not the conflict path — so these combinations are unreachable in
        // practice and only exist to satisfy exhaustiveness.
        (_, ResolutionPolicy::Fallback | ResolutionPolicy::NewerWins) => {
            ResolutionPlan::Unsupported
        }
    }
}

/// Outcome of a newer-wins comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// Apply the incoming row.
    IncomingWins,
    /// Keep the existing row, skip the incoming one.
    ExistingWins,
}

/// Compare incoming vs existing values of the designated column.
///
/// The existing row having vanished between the failed DML and the
/// probe (`existing == None`) counts as the incoming side winning:
/// there is nothing left to defend.
pub fn compare_newer_wins(
    detection: &DetectionMethod,
    incoming: Option<&str>,
    existing: Option<Option<&str>>,
) -> Result<ComparisonOutcome, String> {
    let existing_cell = match existing {
        None => return Ok(ComparisonOutcome::IncomingWins),
        Some(cell) => cell,
    };
    let incoming = match incoming {
        // an incoming NULL can never beat a real stored value
        None => {
            return Ok(if existing_cell.is_none() {
                ComparisonOutcome::IncomingWins
            } else {
                ComparisonOutcome::ExistingWins
            })
        }
        Some(text) => text,
    };
    let existing_text = match existing_cell {
        None => return Ok(ComparisonOutcome::IncomingWins),
        Some(text) => text,
    };

    match detection {
        DetectionMethod::Timestamp(column) => {
            let incoming_ts = parse_timestamp(incoming)
                .ok_or_else(|| format!("incoming {column} '{incoming}' is not a timestamp"))?;
            let existing_ts = parse_timestamp(existing_text)
                .ok_or_else(|| format!("existing {column} '{existing_text}' is not a timestamp"))?;
            Ok(if incoming_ts > existing_ts {
                ComparisonOutcome::IncomingWins
            } else {
                ComparisonOutcome::ExistingWins
            })
        }
        DetectionMethod::Version(column) => {
            let incoming_v: i64 = incoming
                .parse()
                .map_err(|_| format!("incoming {column} '{incoming}' is not a version number"))?;
            let existing_v: i64 = existing_text.parse().map_err(|_| {
                format!("existing {column} '{existing_text}' is not a version number")
            })?;
            Ok(if incoming_v > existing_v {
                ComparisonOutcome::IncomingWins
            } else {
                ComparisonOutcome::ExistingWins
            })
        }
    }
}

/// Parse the timestamp shapes peers actually send: RFC 3339, or the
/// plain `YYYY-MM-DD HH:MM:SS[.fff]` form databases render by default.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
