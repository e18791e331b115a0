//! Payload builders and message renderers.
//!
//! A payload is the structured render input for one topic, built from
//! parsed rows, node lookups, and the current time. Payloads are what gets
//! fingerprinted, so ordered data lives in vectors with a deterministic
//! order; the rendered message string is derived from the payload alone.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;

use voidcast_rust_core::exports::Dictionary;
use voidcast_rust_core::models::{faction_name, ArbitrationHour, IncursionDay, InvasionSide, NodeInfo, RewardItem};
use voidcast_rust_core::timeline::{DAILY_WINDOW_SECS, HOURLY_WINDOW_SECS};

const DIVIDER: &str = "------------------------------";
const CREDIT: &str = "Data courtesy of https://browse.wf/about";

/// The four tracked open worlds, in render order: aggregate-document key
/// and display name.
pub const WORLDS: &[(&str, &str)] = &[
    ("earthCycle", "Earth"),
    ("cetusCycle", "Cetus"),
    ("vallisCycle", "Orb Vallis"),
    ("cambionCycle", "Cambion Drift"),
];

#[derive(Debug, Clone, Serialize)]
pub struct ArbitrationPayload {
    pub location: String,
    pub mission: Option<String>,
    pub start: String,
    pub next_change: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncursionsPayload {
    pub start: String,
    pub nodes: Vec<String>,
    pub next_change: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvasionsPayload {
    pub rows: Vec<InvasionRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvasionRow {
    pub location: String,
    pub sides: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CyclesPayload {
    pub worlds: Vec<WorldStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorldStatus {
    pub name: String,
    pub state: String,
    pub time_left: String,
    pub expiry: Option<f64>,
}

pub fn build_arbitration(
    entry: &ArbitrationHour,
    nodes: &HashMap<String, NodeInfo>,
    tz: Tz,
    now: i64,
) -> ArbitrationPayload {
    let node = nodes.get(&entry.node_id);
    ArbitrationPayload {
        location: node_label(node, &entry.node_id),
        mission: node
            .and_then(|n| n.mission.as_deref())
            .map(|m| title_case(m)),
        start: clock_time(entry.start_ts, tz, now),
        next_change: relative_time(entry.start_ts + HOURLY_WINDOW_SECS, now),
    }
}

pub fn build_incursions(
    entry: &IncursionDay,
    nodes: &HashMap<String, NodeInfo>,
    tz: Tz,
    now: i64,
) -> IncursionsPayload {
    IncursionsPayload {
        start: clock_time(entry.start_ts, tz, now),
        nodes: entry
            .node_ids
            .iter()
            .map(|id| node_label_with_mission(nodes.get(id), id))
            .collect(),
        next_change: relative_time(entry.start_ts + DAILY_WINDOW_SECS, now),
    }
}

/// Group sides by invasion id, order sides by faction name and rows by
/// location, so upstream arrival order can never move the fingerprint.
pub fn build_invasions(
    sides: &[InvasionSide],
    nodes: &HashMap<String, NodeInfo>,
    dictionary: Option<&Dictionary>,
) -> InvasionsPayload {
    let mut grouped: BTreeMap<&str, Vec<&InvasionSide>> = BTreeMap::new();
    for side in sides {
        let Some(id) = side.id.as_deref() else {
            continue;
        };
        grouped.entry(id).or_default().push(side);
    }

    let mut rows: Vec<InvasionRow> = grouped
        .values()
        .filter_map(|group| {
            let node_id = group.first()?.node.as_deref().unwrap_or("Unknown");
            let mut ordered = group.clone();
            ordered.sort_by_key(|s| faction_name(s.ally.as_deref()));
            Some(InvasionRow {
                location: node_label(nodes.get(node_id), node_id),
                sides: ordered
                    .iter()
                    .map(|s| invasion_side_text(s, dictionary))
                    .collect(),
            })
        })
        .collect();
    rows.sort_by(|a, b| a.location.cmp(&b.location));

    InvasionsPayload { rows }
}

/// Build the open-world payload from the aggregate cycles document.
/// `server_now` is the response `Date` header when present; expiry math
/// uses it as the authoritative clock.
pub fn build_world_cycles(doc: &Value, server_now: Option<f64>, now: i64) -> CyclesPayload {
    let reference = server_now.unwrap_or(now as f64);
    CyclesPayload {
        worlds: WORLDS
            .iter()
            .map(|(key, name)| world_status(name, doc.get(*key).unwrap_or(&Value::Null), reference))
            .collect(),
    }
}

fn world_status(name: &str, data: &Value, reference_now: f64) -> WorldStatus {
    let state = data
        .get("state")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            data.get("isDay")
                .and_then(|v| v.as_bool())
                .map(|day| if day { "day" } else { "night" }.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let expiry = data.get("expiry").and_then(parse_epoch);
    let mut time_left = data
        .get("timeLeft")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    if time_left.is_none() {
        if let Some(expiry) = expiry {
            if expiry >= reference_now {
                time_left = Some(format_duration((expiry - reference_now) as u64));
            }
        }
    }

    WorldStatus {
        name: name.to_string(),
        state: title_case(&state),
        time_left: time_left.unwrap_or_else(|| "unknown".to_string()),
        expiry,
    }
}

/// Expiry values arrive either as epoch numbers or RFC 3339 strings.
pub fn parse_epoch(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp() as f64),
        _ => None,
    }
}

pub fn render_arbitration(payload: &ArbitrationPayload) -> String {
    let mut lines = vec!["# ⚔️ Arbitration".to_string(), DIVIDER.to_string()];
    lines.push(format!("- 📍 Location: {}", payload.location));
    if let Some(mission) = &payload.mission {
        lines.push(format!("- 🧭 Mission: {mission}"));
    }
    lines.push(format!("- ⏱ Start: {}", payload.start));
    lines.push(format!("- 🔄 Next change: {}", payload.next_change));
    lines.push(DIVIDER.to_string());
    lines.push(CREDIT.to_string());
    lines.join("\n")
}

pub fn render_incursions(payload: &IncursionsPayload) -> String {
    let mut lines = vec!["# 🛡️ Steel Path Incursions".to_string(), DIVIDER.to_string()];
    lines.push(format!("- ⏱ Start: {}", payload.start));
    lines.push("- 🧭 Nodes:".to_string());
    for node in &payload.nodes {
        lines.push(format!("  - {node}"));
    }
    lines.push(format!("- 🔄 Next change: {}", payload.next_change));
    lines.push(DIVIDER.to_string());
    lines.push(CREDIT.to_string());
    lines.join("\n")
}

pub fn render_invasions(payload: &InvasionsPayload) -> String {
    let mut lines = vec!["# ⚠️ Invasions".to_string(), DIVIDER.to_string()];
    for row in &payload.rows {
        lines.push(format!("**🛰️ {}**: {}", row.location, row.sides.join(" | ")));
    }
    lines.push(DIVIDER.to_string());
    lines.push("- 🔄 Next check: 5m".to_string());
    lines.push(CREDIT.to_string());
    lines.join("\n")
}

pub fn render_world_cycles(payload: &CyclesPayload, next_check: Duration) -> String {
    let mut lines = vec!["# 🌍 Open World Cycles".to_string(), DIVIDER.to_string()];
    for world in &payload.worlds {
        lines.push(format!(
            "- **{}**: {} ({})",
            world.name, world.state, world.time_left
        ));
    }
    lines.push(format!(
        "- 🔄 Next change: {}",
        format_duration(next_check.as_secs())
    ));
    lines.push(DIVIDER.to_string());
    lines.push(CREDIT.to_string());
    lines.join("\n")
}

pub fn node_label(node: Option<&NodeInfo>, node_id: &str) -> String {
    match node {
        None => node_id.to_string(),
        Some(info) => match &info.planet {
            Some(planet) => format!("{} ({planet})", info.name),
            None => info.name.clone(),
        },
    }
}

fn node_label_with_mission(node: Option<&NodeInfo>, node_id: &str) -> String {
    let base = node_label(node, node_id);
    match node.and_then(|n| n.mission.as_deref()) {
        Some(mission) => format!("{base} - {}", title_case(mission)),
        None => base,
    }
}

fn invasion_side_text(side: &InvasionSide, dictionary: Option<&Dictionary>) -> String {
    let ally = faction_name(side.ally.as_deref());
    let missions = side
        .missions
        .iter()
        .map(|m| title_case(&split_camel(m)))
        .collect::<Vec<_>>()
        .join(" / ");
    let rewards = reward_text(&side.ally_pay, dictionary);
    if rewards.is_empty() {
        format!("***{ally}***: {missions}")
    } else {
        format!("***{ally}***: {missions} ({rewards})")
    }
}

fn reward_text(items: &[RewardItem], dictionary: Option<&Dictionary>) -> String {
    let mut rewards = Vec::new();
    for item in items {
        let Some(item_type) = item.item_type.as_deref() else {
            continue;
        };
        let name = item_name(item_type, dictionary);
        match item.item_count {
            Some(count) if count > 1 => rewards.push(format!("{name} x{count}")),
            _ => rewards.push(name),
        }
    }
    rewards.join(", ")
}

/// Resolve an internal item path through the dictionary, falling back to a
/// readable form of its last path segment.
pub fn item_name(item_type: &str, dictionary: Option<&Dictionary>) -> String {
    if let Some(dict) = dictionary {
        if let Some(name) = dict.get(item_type) {
            return name.clone();
        }
    }
    let tail = item_type.rsplit('/').next().unwrap_or(item_type);
    title_case(&split_camel(tail))
}

/// `SabotageMission` becomes `Sabotage Mission`.
pub fn split_camel(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for (i, ch) in text.chars().enumerate() {
        if i > 0 && ch.is_ascii_uppercase() {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Absolute wall-clock time in the display timezone, with the relative
/// offset appended.
fn clock_time(ts: i64, tz: Tz, now: i64) -> String {
    let stamp = match DateTime::from_timestamp(ts, 0) {
        Some(utc) => utc.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
        None => ts.to_string(),
    };
    format!("{stamp} ({})", relative_time(ts, now))
}

pub fn relative_time(ts: i64, now: i64) -> String {
    let delta = ts - now;
    if delta == 0 {
        return "now".to_string();
    }
    let span = format_duration(delta.unsigned_abs());
    if delta > 0 {
        format!("in {span}")
    } else {
        format!("{span} ago")
    }
}

/// Coarse human duration: minutes under an hour, `2h 5m`, `3d 4h`.
/// Partial minutes round up so a 61-second wait reads as `2m`, not `1m`.
pub fn format_duration(total_secs: u64) -> String {
    if total_secs == 0 {
        return "0m".to_string();
    }
    let minutes_total = (total_secs + 59) / 60;
    let hours = minutes_total / 60;
    let days = hours / 24;
    if days > 0 {
        format!("{days}d {}h", hours % 24)
    } else if hours > 0 {
        format!("{hours}h {}m", minutes_total % 60)
    } else {
        format!("{minutes_total}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voidcast_rust_core::diff::fingerprint;

    fn node(id: &str, name: &str, planet: Option<&str>, mission: Option<&str>) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            name: name.to_string(),
            planet: planet.map(str::to_string),
            mission: mission.map(str::to_string),
        }
    }

    fn directory(entries: Vec<NodeInfo>) -> HashMap<String, NodeInfo> {
        entries.into_iter().map(|n| (n.node_id.clone(), n)).collect()
    }

    #[test]
    fn duration_formatting_rounds_up_to_minutes() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(61), "2m");
        assert_eq!(format_duration(3600), "1h 0m");
        assert_eq!(format_duration(7500), "2h 5m");
        assert_eq!(format_duration(90 * 3600), "3d 18h");
    }

    #[test]
    fn relative_time_reads_in_both_directions() {
        assert_eq!(relative_time(1_000, 1_000), "now");
        assert_eq!(relative_time(1_000 + 120, 1_000), "in 2m");
        assert_eq!(relative_time(1_000 - 120, 1_000), "2m ago");
    }

    #[test]
    fn camel_case_splits_and_title_cases() {
        assert_eq!(split_camel("SabotageMission"), "Sabotage Mission");
        assert_eq!(title_case("dark sector survival"), "Dark Sector Survival");
        assert_eq!(title_case(&split_camel("corpusOutpost")), "Corpus Outpost");
    }

    #[test]
    fn item_names_prefer_the_dictionary() {
        let mut dict = Dictionary::new();
        dict.insert(
            "/Lotus/Types/Items/OrokinCatalyst".to_string(),
            "Catalizador Orokin".to_string(),
        );
        assert_eq!(
            item_name("/Lotus/Types/Items/OrokinCatalyst", Some(&dict)),
            "Catalizador Orokin"
        );
        assert_eq!(
            item_name("/Lotus/Types/Items/OrokinCatalyst", None),
            "Orokin Catalyst"
        );
    }

    #[test]
    fn unknown_nodes_render_as_their_raw_id() {
        let nodes = directory(vec![]);
        let entry = ArbitrationHour {
            start_ts: 1_700_003_600,
            node_id: "EarthNode1".to_string(),
        };
        let payload = build_arbitration(&entry, &nodes, chrono_tz::UTC, 1_700_003_700);
        assert_eq!(payload.location, "EarthNode1");
        assert!(payload.mission.is_none());
    }

    #[test]
    fn known_nodes_render_name_planet_and_mission() {
        let nodes = directory(vec![node(
            "EarthNode1",
            "Cervantes",
            Some("Earth"),
            Some("sabotage"),
        )]);
        let entry = ArbitrationHour {
            start_ts: 1_700_003_600,
            node_id: "EarthNode1".to_string(),
        };
        let payload = build_arbitration(&entry, &nodes, chrono_tz::UTC, 1_700_003_700);
        assert_eq!(payload.location, "Cervantes (Earth)");
        assert_eq!(payload.mission.as_deref(), Some("Sabotage"));
        assert_eq!(payload.next_change, "in 59m");
    }

    #[test]
    fn invasion_sides_order_by_faction_regardless_of_arrival() {
        let nodes = directory(vec![node("SolNode1", "Apollodorus", Some("Mercury"), None)]);
        let grineer_first: Vec<InvasionSide> = serde_json::from_value(json!([
            { "id": "inv1", "node": "SolNode1", "ally": "FC_GRINEER", "missions": ["Sabotage"] },
            { "id": "inv1", "node": "SolNode1", "ally": "FC_CORPUS", "missions": ["Defense"] },
        ]))
        .unwrap();
        let corpus_first: Vec<InvasionSide> = serde_json::from_value(json!([
            { "id": "inv1", "node": "SolNode1", "ally": "FC_CORPUS", "missions": ["Defense"] },
            { "id": "inv1", "node": "SolNode1", "ally": "FC_GRINEER", "missions": ["Sabotage"] },
        ]))
        .unwrap();

        let a = build_invasions(&grineer_first, &nodes, None);
        let b = build_invasions(&corpus_first, &nodes, None);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(a.rows[0].sides[0].contains("Corpus"));
        assert!(a.rows[0].sides[1].contains("Grineer"));
    }

    #[test]
    fn invasion_rewards_render_with_counts() {
        let sides: Vec<InvasionSide> = serde_json::from_value(json!([
            {
                "id": "inv2",
                "node": "SolNode1",
                "ally": "FC_CORPUS",
                "missions": ["ExterminationMission"],
                "allyPay": [
                    { "ItemType": "/Lotus/Types/Items/FieldronSample", "ItemCount": 3 },
                    { "ItemType": "/Lotus/Types/Items/Detonite", "ItemCount": 1 },
                ],
            },
        ]))
        .unwrap();
        let payload = build_invasions(&sides, &HashMap::new(), None);
        let side = &payload.rows[0].sides[0];
        assert!(side.contains("Extermination Mission"));
        assert!(side.contains("Fieldron Sample x3"));
        assert!(side.contains("Detonite"));
        assert!(!side.contains("Detonite x1"));
    }

    #[test]
    fn sides_without_an_invasion_id_are_dropped() {
        let sides: Vec<InvasionSide> =
            serde_json::from_value(json!([{ "node": "SolNode1", "ally": "FC_CORPUS" }])).unwrap();
        let payload = build_invasions(&sides, &HashMap::new(), None);
        assert!(payload.rows.is_empty());
    }

    #[test]
    fn world_state_falls_back_to_the_day_flag() {
        let status = world_status("Earth", &json!({ "isDay": false }), 1_000.0);
        assert_eq!(status.state, "Night");
        assert_eq!(status.time_left, "unknown");
        assert!(status.expiry.is_none());
    }

    #[test]
    fn world_time_left_is_computed_from_expiry_when_missing() {
        let status = world_status("Cetus", &json!({ "state": "day", "expiry": 1_300.0 }), 1_000.0);
        assert_eq!(status.state, "Day");
        assert_eq!(status.time_left, "5m");
        assert_eq!(status.expiry, Some(1_300.0));
    }

    #[test]
    fn world_expiry_parses_rfc3339_strings() {
        let status = world_status(
            "Cetus",
            &json!({ "state": "night", "expiry": "2026-08-05T00:00:00Z", "timeLeft": "12m" }),
            1_000.0,
        );
        assert!(status.expiry.is_some());
        assert_eq!(status.time_left, "12m");
    }

    #[test]
    fn cycles_payload_keeps_a_fixed_world_order() {
        let doc = json!({
            "cambionCycle": { "state": "vome" },
            "earthCycle": { "state": "day" },
        });
        let payload = build_world_cycles(&doc, None, 1_000);
        let names: Vec<&str> = payload.worlds.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["Earth", "Cetus", "Orb Vallis", "Cambion Drift"]);
        assert_eq!(payload.worlds[0].state, "Day");
        assert_eq!(payload.worlds[1].state, "Unknown");
    }

    #[test]
    fn rendered_messages_track_their_payload() {
        let payload = ArbitrationPayload {
            location: "Cervantes (Earth)".to_string(),
            mission: Some("Sabotage".to_string()),
            start: "2026-08-05 12:00 UTC (5m ago)".to_string(),
            next_change: "in 55m".to_string(),
        };
        let message = render_arbitration(&payload);
        assert!(message.contains("Cervantes (Earth)"));
        assert!(message.contains("Mission: Sabotage"));
        assert!(message.starts_with("# ⚔️ Arbitration"));
    }
}
