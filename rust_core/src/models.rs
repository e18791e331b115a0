//! Domain types shared between the parsers, the node directory, and the
//! relay service.

use serde::{Deserialize, Serialize};

/// One independently scheduled feed/publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Arbitration,
    Incursions,
    Invasions,
    OpenWorldCycles,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Arbitration => "arbitration",
            Topic::Incursions => "incursions",
            Topic::Invasions => "invasions",
            Topic::OpenWorldCycles => "open_world_cycles",
        }
    }
}

/// One hourly arbitration rotation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationHour {
    pub start_ts: i64,
    pub node_id: String,
}

/// One daily steel-path incursion set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncursionDay {
    pub start_ts: i64,
    pub node_ids: Vec<String>,
}

/// Anything with a rotation start time. Lets the current-window selection
/// work over both rotation feeds.
pub trait TimedEntry {
    fn start_ts(&self) -> i64;
}

impl TimedEntry for ArbitrationHour {
    fn start_ts(&self) -> i64 {
        self.start_ts
    }
}

impl TimedEntry for IncursionDay {
    fn start_ts(&self) -> i64 {
        self.start_ts
    }
}

/// Resolved display data for one star-chart node, keyed by its internal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub name: String,
    pub planet: Option<String>,
    pub mission: Option<String>,
}

/// One side of a live invasion, as served by the oracle endpoint. Two
/// entries share an `id` when they describe the two competing sides of the
/// same invasion.
#[derive(Debug, Clone, Deserialize)]
pub struct InvasionSide {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub ally: Option<String>,
    #[serde(default)]
    pub missions: Vec<String>,
    #[serde(rename = "allyPay", default)]
    pub ally_pay: Vec<RewardItem>,
}

/// One reward stack in an invasion pay list.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardItem {
    #[serde(rename = "ItemType", default)]
    pub item_type: Option<String>,
    #[serde(rename = "ItemCount", default)]
    pub item_count: Option<i64>,
}

/// Display name for an upstream faction code. Unknown codes pass through
/// verbatim so new factions still render.
pub fn faction_name(code: Option<&str>) -> String {
    match code {
        Some("FC_CORPUS") => "Corpus".to_string(),
        Some("FC_GRINEER") => "Grineer".to_string(),
        Some("FC_INFESTATION") => "Infestation".to_string(),
        Some("FC_OROKIN") => "Orokin".to_string(),
        Some("FC_MITW") => "MurMur".to_string(),
        Some("FC_SENTIENT") => "Sentient".to_string(),
        Some(other) => other.to_string(),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faction_names_map_known_codes() {
        assert_eq!(faction_name(Some("FC_CORPUS")), "Corpus");
        assert_eq!(faction_name(Some("FC_GRINEER")), "Grineer");
        assert_eq!(faction_name(None), "Unknown");
    }

    #[test]
    fn faction_names_pass_unknown_codes_through() {
        assert_eq!(faction_name(Some("FC_NEWCOMERS")), "FC_NEWCOMERS");
    }
}
