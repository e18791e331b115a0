//! Line parsers for the two plain-text rotation feeds.
//!
//! Both feeds are newline-separated snapshots covering past and future
//! rotation windows. A malformed line is dropped on its own; it never
//! aborts the rest of the snapshot.

use crate::models::{ArbitrationHour, IncursionDay};

/// Parse `epoch_seconds,node_id` lines.
pub fn parse_arbitrations(text: &str) -> Vec<ArbitrationHour> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (ts, node) = line.split_once(',')?;
            let node_id = node.trim();
            if node_id.is_empty() || node_id.contains(',') {
                return None;
            }
            let start_ts = ts.trim().parse().ok()?;
            Some(ArbitrationHour {
                start_ts,
                node_id: node_id.to_string(),
            })
        })
        .collect()
}

/// Parse `epoch_seconds;node_id[,node_id...]` lines.
pub fn parse_incursions(text: &str) -> Vec<IncursionDay> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (ts, nodes) = line.split_once(';')?;
            if nodes.contains(';') {
                return None;
            }
            let start_ts = ts.trim().parse().ok()?;
            let node_ids: Vec<String> = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if node_ids.is_empty() {
                return None;
            }
            Some(IncursionDay { start_ts, node_ids })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_arbitration_rows() {
        let rows = parse_arbitrations("1700000000,SolNode1\n1700003600,SolNode2\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].start_ts, 1_700_000_000);
        assert_eq!(rows[0].node_id, "SolNode1");
        assert_eq!(rows[1].node_id, "SolNode2");
    }

    #[test]
    fn skips_malformed_arbitration_rows() {
        let text = "notanumber,SolNode1\n1700000000\n1700003600,\n1700007200,SolNode3,extra\n\n  \n1700010800,SolNode4";
        let rows = parse_arbitrations(text);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].node_id, "SolNode4");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let rows = parse_arbitrations("  1700000000 , SolNode1  \n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].node_id, "SolNode1");
    }

    #[test]
    fn parses_incursion_rows_with_multiple_nodes() {
        let rows = parse_incursions("1700000000;SolNode1,SolNode2,SolNode3\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_ts, 1_700_000_000);
        assert_eq!(
            rows[0].node_ids,
            vec!["SolNode1", "SolNode2", "SolNode3"]
        );
    }

    #[test]
    fn skips_malformed_incursion_rows() {
        let text = "1700000000\nbad;SolNode1\n1700000000;\n1700000000;a;b\n1700086400;SolNode9";
        let rows = parse_incursions(text);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].node_ids, vec!["SolNode9"]);
    }

    #[test]
    fn empty_input_parses_to_no_rows() {
        assert!(parse_arbitrations("").is_empty());
        assert!(parse_incursions("").is_empty());
    }
}
