//! Node directory construction from the public export documents.
//!
//! The region export has shipped in more than one shape over time:
//! sometimes a ready-made map of node id to display record, sometimes a raw
//! export tree with a `Nodes` list buried at an arbitrary depth. Each known
//! shape gets a named detector with a predicate and an extractor; the first
//! detector whose predicate matches wins, so shape checks stay out of the
//! business logic.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::models::NodeInfo;

/// Localization dictionary: raw export key to display string.
pub type Dictionary = HashMap<String, String>;

const NODE_ID_KEYS: &[&str] = &["Node", "node", "nodeId", "node_id", "NodeId"];
const NAME_KEYS: &[&str] = &["Name", "name", "nodeName", "NodeName", "nameKey"];
const PLANET_KEYS: &[&str] = &[
    "systemName",
    "SystemName",
    "Planet",
    "planet",
    "Region",
    "region",
    "system",
];
const MISSION_KEYS: &[&str] = &["missionName", "MissionName", "mission", "Mission"];

struct ShapeDetector {
    name: &'static str,
    matches: fn(&Value) -> bool,
    extract: fn(&Value, Option<&Dictionary>) -> HashMap<String, NodeInfo>,
}

const SHAPE_DETECTORS: &[ShapeDetector] = &[
    ShapeDetector {
        name: "node-map",
        matches: looks_like_node_map,
        extract: build_from_node_map,
    },
    ShapeDetector {
        name: "export-tree",
        matches: is_export_tree,
        extract: build_from_export_tree,
    },
];

/// Merge the region export with an optional localization dictionary into a
/// lookup from node id to display info.
pub fn build_node_map(exports: &Value, dictionary: Option<&Dictionary>) -> HashMap<String, NodeInfo> {
    for detector in SHAPE_DETECTORS {
        if (detector.matches)(exports) {
            log::debug!("export document matched the {} shape", detector.name);
            return (detector.extract)(exports, dictionary);
        }
    }
    log::warn!("export document matched no known shape");
    HashMap::new()
}

fn looks_like_node_map(doc: &Value) -> bool {
    doc.as_object().map_or(false, |map| {
        map.values().any(|value| {
            value
                .as_object()
                .map_or(false, |entry| entry.contains_key("name") || entry.contains_key("systemName"))
        })
    })
}

fn is_export_tree(doc: &Value) -> bool {
    doc.is_object() || doc.is_array()
}

fn build_from_node_map(doc: &Value, dictionary: Option<&Dictionary>) -> HashMap<String, NodeInfo> {
    let mut result = HashMap::new();
    let Some(map) = doc.as_object() else {
        return result;
    };
    for (node_id, entry) in map {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        let name = resolve_name(get_str(entry, "name").or_else(|| get_str(entry, "Name")), dictionary)
            .unwrap_or_else(|| node_id.clone());
        let planet = resolve_name(
            get_str(entry, "systemName").or_else(|| get_str(entry, "SystemName")),
            dictionary,
        );
        let mission = resolve_name(
            get_str(entry, "missionName").or_else(|| get_str(entry, "MissionName")),
            dictionary,
        );
        result.insert(
            node_id.clone(),
            NodeInfo {
                node_id: node_id.clone(),
                name,
                planet,
                mission,
            },
        );
    }
    result
}

fn build_from_export_tree(doc: &Value, dictionary: Option<&Dictionary>) -> HashMap<String, NodeInfo> {
    let mut result = HashMap::new();
    for entry in collect_node_entries(doc) {
        let Some(node_id) = first_str_key(entry, NODE_ID_KEYS) else {
            continue;
        };
        let name = resolve_name(first_str_key(entry, NAME_KEYS), dictionary)
            .unwrap_or_else(|| node_id.to_string());
        let planet = resolve_name(first_str_key(entry, PLANET_KEYS), dictionary);
        let mission = resolve_name(first_str_key(entry, MISSION_KEYS), dictionary);
        result.insert(
            node_id.to_string(),
            NodeInfo {
                node_id: node_id.to_string(),
                name,
                planet,
                mission,
            },
        );
    }
    result
}

fn collect_node_entries(doc: &Value) -> Vec<&Map<String, Value>> {
    if let Some(list) = doc.get("Nodes").and_then(|v| v.as_array()) {
        return list.iter().filter_map(|v| v.as_object()).collect();
    }
    let mut found = Vec::new();
    walk(doc, &mut found);
    found
}

fn walk<'a>(value: &'a Value, found: &mut Vec<&'a Map<String, Value>>) {
    match value {
        Value::Object(map) => {
            if let Some(list) = map.get("Nodes").and_then(|v| v.as_array()) {
                found.extend(list.iter().filter_map(|v| v.as_object()));
            }
            for child in map.values() {
                walk(child, found);
            }
        }
        Value::Array(list) => {
            for child in list {
                walk(child, found);
            }
        }
        _ => {}
    }
}

fn resolve_name(raw: Option<&str>, dictionary: Option<&Dictionary>) -> Option<String> {
    let raw = raw?;
    if let Some(dict) = dictionary {
        if let Some(name) = dict.get(raw) {
            return Some(name.clone());
        }
    }
    if let Some(rest) = raw.strip_prefix("/Lotus/Language/") {
        return Some(rest.rsplit('/').next().unwrap_or(rest).to_string());
    }
    Some(raw.to_string())
}

fn get_str<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(|v| v.as_str())
}

fn first_str_key<'a>(entry: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| get_str(entry, key))
}
