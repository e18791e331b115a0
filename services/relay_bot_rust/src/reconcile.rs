//! Per-topic reconciliation.
//!
//! For each feed topic the engine decides whether fresh upstream content
//! warrants a republish and keeps exactly one tracked message per topic
//! alive in its channel: fetch, parse, select the current row, resolve
//! nodes, fingerprint the rendered payload, then edit-or-create and persist.
//! Every topic entry point absorbs its own failures; one topic can never
//! stall another or take the scheduler down.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use voidcast_rust_core::diff::fingerprint;
use voidcast_rust_core::exports::{build_node_map, Dictionary};
use voidcast_rust_core::fetch::{fetch_json_cached, fetch_text};
use voidcast_rust_core::models::{InvasionSide, NodeInfo, Topic};
use voidcast_rust_core::parsers::{parse_arbitrations, parse_incursions};
use voidcast_rust_core::state::{RelayState, StateStore};
use voidcast_rust_core::timeline::{select_current, DAILY_WINDOW_SECS, HOURLY_WINDOW_SECS};

use crate::config::Config;
use crate::discord::{ChatError, MessageGateway};
use crate::formatters;
use crate::formatters::CyclesPayload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const SWEEP_LIMIT: usize = 200;

/// Fixed polling interval of the invasions loop.
pub const INVASION_POLL_INTERVAL: Duration = Duration::from_secs(300);

const CYCLE_GRACE_SECS: f64 = 5.0;
const CYCLE_MIN_DELAY_SECS: f64 = 30.0;
const CYCLE_FALLBACK_DELAY: Duration = Duration::from_secs(300);

pub struct Relay<G: MessageGateway> {
    config: Config,
    http: Client,
    gateway: G,
    store: StateStore,
    state: Mutex<RelayState>,
    hourly_lock: Mutex<()>,
}

impl<G: MessageGateway> Relay<G> {
    pub fn new(config: Config, gateway: G, store: StateStore, state: RelayState) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            config,
            http,
            gateway,
            store,
            state: Mutex::new(state),
            hourly_lock: Mutex::new(()),
        })
    }

    /// Startup pass: every topic forced once, sequentially, so the channels
    /// reach a clean single-message state no matter what a previous process
    /// left behind.
    pub async fn initial_run(&self) {
        info!("initial forced run starting");
        self.refresh_hourly_pair().await;
        self.refresh_invasions(true).await;
        self.refresh_open_worlds(true).await;
        info!("initial forced run complete");
    }

    /// The coupled hourly pair: one cleanup of the main channel, then
    /// arbitration and incursions republished. The lock serializes this
    /// sequence against the startup pass.
    pub async fn refresh_hourly_pair(&self) {
        let _guard = self.hourly_lock.lock().await;
        self.cleanup_main_channel().await;
        if let Err(err) = self.run_arbitration(true).await {
            error!("arbitration refresh failed: {err:#}");
        }
        if let Err(err) = self.run_incursions(true).await {
            error!("incursions refresh failed: {err:#}");
        }
    }

    pub async fn refresh_invasions(&self, force: bool) {
        if force {
            self.cleanup_topic_channel(Topic::Invasions, self.config.invasions_channel_id)
                .await;
        }
        if let Err(err) = self.run_invasions(force).await {
            error!("invasions refresh failed: {err:#}");
        }
    }

    /// Returns the delay until this topic should be polled again.
    pub async fn refresh_open_worlds(&self, force: bool) -> Duration {
        if force {
            self.cleanup_topic_channel(Topic::OpenWorldCycles, self.config.cycles_channel_id)
                .await;
        }
        match self.run_open_worlds(force).await {
            Ok(delay) => delay,
            Err(err) => {
                error!("open world cycles refresh failed: {err:#}");
                CYCLE_FALLBACK_DELAY
            }
        }
    }

    async fn run_arbitration(&self, force: bool) -> Result<()> {
        let cache = if force {
            None
        } else {
            Some(self.state.lock().await.arbitration_cache.clone())
        };
        let fetched = fetch_text(&self.http, &self.config.arbitrations_url, cache.as_ref()).await?;
        if !fetched.changed && !force {
            info!("arbitration feed not modified");
            return Ok(());
        }

        let rows = parse_arbitrations(&fetched.body);
        let now = Utc::now().timestamp();
        let Some(current) = select_current(&rows, HOURLY_WINDOW_SECS, now) else {
            warn!("arbitration feed has no usable row");
            return Ok(());
        };

        let (nodes, _) = self.load_node_directory().await?;
        let payload = formatters::build_arbitration(current, &nodes, self.config.timezone, now);
        let new_hash = fingerprint(&payload);

        let mut state = self.state.lock().await;
        if !should_publish(state.last_hash(Topic::Arbitration), &new_hash, force) {
            info!("arbitration unchanged");
            return Ok(());
        }
        let content = formatters::render_arbitration(&payload);
        let message_id = publish_tracked(
            &self.gateway,
            self.config.channel_id,
            state.message_id(Topic::Arbitration),
            &content,
        )
        .await?;
        state.record_publish(Topic::Arbitration, new_hash, message_id);
        state.arbitration_cache = fetched.meta;
        self.store
            .save(&state)
            .context("persisting state after arbitration publish")?;
        info!("arbitration published (message {message_id})");
        Ok(())
    }

    async fn run_incursions(&self, force: bool) -> Result<()> {
        let channel_id = self.config.incursions_channel();
        let cache = if force {
            None
        } else {
            Some(self.state.lock().await.incursions_cache.clone())
        };
        let fetched = fetch_text(&self.http, &self.config.incursions_url, cache.as_ref()).await?;
        if !fetched.changed && !force {
            info!("incursions feed not modified");
            return Ok(());
        }

        let rows = parse_incursions(&fetched.body);
        let now = Utc::now().timestamp();
        let Some(current) = select_current(&rows, DAILY_WINDOW_SECS, now) else {
            warn!("incursions feed has no usable row");
            return Ok(());
        };

        let (nodes, _) = self.load_node_directory().await?;
        let payload = formatters::build_incursions(current, &nodes, self.config.timezone, now);
        let new_hash = fingerprint(&payload);

        let mut state = self.state.lock().await;
        if !should_publish(state.last_hash(Topic::Incursions), &new_hash, force) {
            info!("incursions unchanged");
            return Ok(());
        }
        let content = formatters::render_incursions(&payload);
        let message_id = publish_tracked(
            &self.gateway,
            channel_id,
            state.message_id(Topic::Incursions),
            &content,
        )
        .await?;
        state.record_publish(Topic::Incursions, new_hash, message_id);
        state.incursions_cache = fetched.meta;
        self.store
            .save(&state)
            .context("persisting state after incursions publish")?;
        info!("incursions published (message {message_id})");
        Ok(())
    }

    async fn run_invasions(&self, force: bool) -> Result<()> {
        let channel_id = self.config.invasions_channel_id;
        if channel_id == 0 {
            warn!("invasions channel not configured, skipping");
            return Ok(());
        }

        let response = self
            .http
            .get(&self.config.invasions_url)
            .send()
            .await
            .context("fetching invasions feed")?
            .error_for_status()
            .context("fetching invasions feed")?;
        let doc: Value = response.json().await.context("parsing invasions feed")?;
        let sides = invasion_sides(&doc);

        let (nodes, dictionary) = self.load_node_directory().await?;
        let payload = formatters::build_invasions(&sides, &nodes, dictionary.as_ref());
        let new_hash = fingerprint(&payload);

        let mut state = self.state.lock().await;
        if !should_publish(state.last_hash(Topic::Invasions), &new_hash, force) {
            info!("invasions unchanged");
            return Ok(());
        }
        // On real content change the channel is swept before posting, so a
        // stray message can never coexist with the tracked one.
        if state.last_hash(Topic::Invasions) != Some(new_hash.as_str()) {
            self.sweep_channel(channel_id).await;
        }
        let content = formatters::render_invasions(&payload);
        let message_id = publish_tracked(
            &self.gateway,
            channel_id,
            state.message_id(Topic::Invasions),
            &content,
        )
        .await?;
        state.record_publish(Topic::Invasions, new_hash, message_id);
        self.store
            .save(&state)
            .context("persisting state after invasions publish")?;
        info!("invasions published (message {message_id})");
        Ok(())
    }

    async fn run_open_worlds(&self, force: bool) -> Result<Duration> {
        let channel_id = self.config.cycles_channel_id;
        if channel_id == 0 {
            warn!("open world cycles channel not configured, skipping");
            return Ok(CYCLE_FALLBACK_DELAY);
        }

        let (doc, server_now) = self.fetch_cycles_doc().await?;
        let now = Utc::now().timestamp();
        let payload = formatters::build_world_cycles(&doc, server_now, now);
        let new_hash = fingerprint(&payload);
        let delay = next_cycle_delay(&payload, now as f64);

        let mut state = self.state.lock().await;
        if !should_publish(state.last_hash(Topic::OpenWorldCycles), &new_hash, force) {
            info!("open world cycles unchanged");
            return Ok(delay);
        }
        if state.last_hash(Topic::OpenWorldCycles) != Some(new_hash.as_str()) {
            self.sweep_channel(channel_id).await;
        }
        let content = formatters::render_world_cycles(&payload, delay);
        let message_id = publish_tracked(
            &self.gateway,
            channel_id,
            state.message_id(Topic::OpenWorldCycles),
            &content,
        )
        .await?;
        state.record_publish(Topic::OpenWorldCycles, new_hash, message_id);
        self.store
            .save(&state)
            .context("persisting state after open world cycles publish")?;
        info!("open world cycles published (message {message_id})");
        Ok(delay)
    }

    /// Fetch the aggregate cycles document, falling back to assembling it
    /// from the per-world endpoints when the aggregate is down. The
    /// response `Date` header, when present, is the authoritative clock
    /// for expiry math.
    async fn fetch_cycles_doc(&self) -> Result<(Value, Option<f64>)> {
        match self.fetch_json_with_date(&self.config.open_world_cycles_url).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(
                    "aggregate cycles endpoint failed, assembling from per-world endpoints: {err:#}"
                );
                self.fetch_cycles_per_world().await
            }
        }
    }

    async fn fetch_cycles_per_world(&self) -> Result<(Value, Option<f64>)> {
        let endpoints = [
            ("earthCycle", self.config.earth_cycle_url.as_str()),
            ("cetusCycle", self.config.cetus_cycle_url.as_str()),
            ("vallisCycle", self.config.vallis_cycle_url.as_str()),
            ("cambionCycle", self.config.cambion_cycle_url.as_str()),
        ];
        let mut doc = serde_json::Map::new();
        let mut server_now = None;
        for (key, url) in endpoints {
            match self.fetch_json_with_date(url).await {
                Ok((value, date)) => {
                    doc.insert(key.to_string(), value);
                    server_now = server_now.or(date);
                }
                Err(err) => warn!("cycle endpoint {url} failed: {err:#}"),
            }
        }
        if doc.is_empty() {
            anyhow::bail!("every open world cycle endpoint failed");
        }
        Ok((Value::Object(doc), server_now))
    }

    async fn fetch_json_with_date(&self, url: &str) -> Result<(Value, Option<f64>)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        let server_now = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let doc = response
            .json()
            .await
            .with_context(|| format!("parsing {url}"))?;
        Ok((doc, server_now))
    }

    /// Refresh the node directory from the cached export documents and
    /// persist any new revalidation metadata.
    async fn load_node_directory(&self) -> Result<(HashMap<String, NodeInfo>, Option<Dictionary>)> {
        let exports_path = self.config.cache_dir.join("ExportRegions.json");
        let dict_path = self
            .config
            .cache_dir
            .join(format!("dict.{}.json", self.config.locale));

        let exports_cache = self.state.lock().await.exports_cache.clone();
        let (exports, exports_meta) = fetch_json_cached(
            &self.http,
            &self.config.exports_url,
            &exports_path,
            Some(&exports_cache),
        )
        .await?;

        let mut dictionary = None;
        let mut dict_meta = None;
        if !self.config.dict_url.is_empty() {
            let cached = self.state.lock().await.dict_cache.clone();
            let (value, meta) =
                fetch_json_cached(&self.http, &self.config.dict_url, &dict_path, Some(&cached))
                    .await?;
            dictionary = serde_json::from_value::<Dictionary>(value).ok();
            dict_meta = Some(meta);
        }

        {
            let mut state = self.state.lock().await;
            state.exports_cache = exports_meta;
            if let Some(meta) = dict_meta {
                state.dict_cache = meta;
            }
            if let Err(err) = self.store.save(&state) {
                warn!("failed to persist fetch cache metadata: {err:#}");
            }
        }

        Ok((build_node_map(&exports, dictionary.as_ref()), dictionary))
    }

    /// Cold-start/forced cleanup for the main channel pair: delete both
    /// tracked messages, sweep stray bot messages, forget both topics.
    async fn cleanup_main_channel(&self) {
        let (arbitration_id, incursions_id) = {
            let state = self.state.lock().await;
            (
                state.message_id(Topic::Arbitration),
                state.message_id(Topic::Incursions),
            )
        };

        let mut cleaned = false;
        if let Some(id) = arbitration_id {
            cleaned |= self.delete_tracked(self.config.channel_id, id).await;
        }
        if let Some(id) = incursions_id {
            cleaned |= self.delete_tracked(self.config.incursions_channel(), id).await;
        }
        cleaned |= self.sweep_channel(self.config.channel_id).await > 0;

        let mut state = self.state.lock().await;
        state.clear_topic(Topic::Arbitration);
        state.clear_topic(Topic::Incursions);
        if cleaned {
            if let Err(err) = self.store.save(&state) {
                warn!("failed to persist state after cleanup: {err:#}");
            }
        }
    }

    async fn cleanup_topic_channel(&self, topic: Topic, channel_id: u64) {
        if channel_id == 0 {
            return;
        }
        let tracked = self.state.lock().await.message_id(topic);
        let mut cleaned = false;
        if let Some(id) = tracked {
            cleaned |= self.delete_tracked(channel_id, id).await;
        }
        cleaned |= self.sweep_channel(channel_id).await > 0;

        let mut state = self.state.lock().await;
        state.clear_topic(topic);
        if cleaned {
            if let Err(err) = self.store.save(&state) {
                warn!("failed to persist state after {} cleanup: {err:#}", topic.as_str());
            }
        }
    }

    async fn delete_tracked(&self, channel_id: u64, message_id: u64) -> bool {
        match self.gateway.delete(channel_id, message_id).await {
            Ok(()) => {
                info!("deleted tracked message {message_id}");
                true
            }
            Err(ChatError::NotFound) => {
                info!("tracked message {message_id} already gone");
                false
            }
            Err(ChatError::Forbidden) => {
                warn!("missing permission to delete message {message_id}");
                false
            }
            Err(err) => {
                warn!("failed to delete message {message_id}: {err}");
                false
            }
        }
    }

    async fn sweep_channel(&self, channel_id: u64) -> usize {
        match self.gateway.sweep_own_messages(channel_id, SWEEP_LIMIT).await {
            Ok(count) => {
                if count > 0 {
                    info!("swept {count} stray messages from channel {channel_id}");
                }
                count
            }
            Err(ChatError::Forbidden) => {
                warn!("missing permission to sweep channel {channel_id}");
                0
            }
            Err(err) => {
                warn!("sweep of channel {channel_id} failed: {err}");
                0
            }
        }
    }
}

/// Fingerprint equality is the sole skip gate, except under force.
fn should_publish(last_hash: Option<&str>, new_hash: &str, force: bool) -> bool {
    force || last_hash != Some(new_hash)
}

/// Edit the tracked message when one exists, falling back to a fresh send
/// when the edit target is gone.
async fn publish_tracked<G: MessageGateway>(
    gateway: &G,
    channel_id: u64,
    tracked: Option<u64>,
    content: &str,
) -> Result<u64, ChatError> {
    if let Some(message_id) = tracked {
        match gateway.edit(channel_id, message_id, content).await {
            Ok(id) => return Ok(id),
            Err(ChatError::NotFound) => {
                info!("tracked message {message_id} vanished, sending a new one");
            }
            Err(err) => return Err(err),
        }
    }
    gateway.send(channel_id, content).await
}

/// Accept the invasions document both as a bare array and wrapped under an
/// `invasions` key; entries that do not deserialize are dropped one by one.
fn invasion_sides(doc: &Value) -> Vec<InvasionSide> {
    let items = if let Some(list) = doc.as_array() {
        list
    } else if let Some(list) = doc.get("invasions").and_then(|v| v.as_array()) {
        list
    } else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Sleep until just past the soonest world phase change: minimum future
/// expiry plus a small grace, floored so a clock skew cannot busy-loop the
/// poller, defaulting to five minutes when no expiry is known.
fn next_cycle_delay(payload: &CyclesPayload, now: f64) -> Duration {
    let next = payload
        .worlds
        .iter()
        .filter_map(|w| w.expiry)
        .filter(|expiry| *expiry >= now)
        .fold(None::<f64>, |acc, expiry| {
            Some(acc.map_or(expiry, |cur| cur.min(expiry)))
        });
    match next {
        Some(expiry) => Duration::from_secs_f64((expiry - now + CYCLE_GRACE_SECS).max(CYCLE_MIN_DELAY_SECS)),
        None => CYCLE_FALLBACK_DELAY,
    }
}

fn parse_http_date(value: &str) -> Option<f64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::WorldStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeGateway {
        next_id: StdMutex<u64>,
        live: StdMutex<HashSet<u64>>,
        sends: StdMutex<u64>,
        edits: StdMutex<u64>,
    }

    impl FakeGateway {
        fn sends(&self) -> u64 {
            *self.sends.lock().unwrap()
        }
        fn edits(&self) -> u64 {
            *self.edits.lock().unwrap()
        }
    }

    #[async_trait]
    impl MessageGateway for FakeGateway {
        async fn send(&self, _channel_id: u64, _content: &str) -> Result<u64, ChatError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            self.live.lock().unwrap().insert(*next);
            *self.sends.lock().unwrap() += 1;
            Ok(*next)
        }

        async fn edit(
            &self,
            _channel_id: u64,
            message_id: u64,
            _content: &str,
        ) -> Result<u64, ChatError> {
            if self.live.lock().unwrap().contains(&message_id) {
                *self.edits.lock().unwrap() += 1;
                Ok(message_id)
            } else {
                Err(ChatError::NotFound)
            }
        }

        async fn delete(&self, _channel_id: u64, message_id: u64) -> Result<(), ChatError> {
            if self.live.lock().unwrap().remove(&message_id) {
                Ok(())
            } else {
                Err(ChatError::NotFound)
            }
        }

        async fn sweep_own_messages(
            &self,
            _channel_id: u64,
            _limit: usize,
        ) -> Result<usize, ChatError> {
            let mut live = self.live.lock().unwrap();
            let count = live.len();
            live.clear();
            Ok(count)
        }
    }

    fn world(name: &str, expiry: Option<f64>) -> WorldStatus {
        WorldStatus {
            name: name.to_string(),
            state: "Day".to_string(),
            time_left: "unknown".to_string(),
            expiry,
        }
    }

    #[test]
    fn fingerprint_equality_is_the_sole_skip_gate() {
        assert!(should_publish(None, "abc", false));
        assert!(should_publish(Some("old"), "abc", false));
        assert!(!should_publish(Some("abc"), "abc", false));
    }

    #[test]
    fn force_always_publishes() {
        assert!(should_publish(Some("abc"), "abc", true));
    }

    #[tokio::test]
    async fn publish_tracked_edits_in_place() {
        let gateway = FakeGateway::default();
        let first = publish_tracked(&gateway, 1, None, "hello").await.unwrap();
        let second = publish_tracked(&gateway, 1, Some(first), "hello again")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.sends(), 1);
        assert_eq!(gateway.edits(), 1);
    }

    #[tokio::test]
    async fn publish_tracked_falls_back_to_send_when_edit_target_is_gone() {
        let gateway = FakeGateway::default();
        // 42 was never sent, so the edit must miss and a new message appear
        let id = publish_tracked(&gateway, 1, Some(42), "hello").await.unwrap();
        assert_ne!(id, 42);
        assert_eq!(gateway.sends(), 1);
        assert_eq!(gateway.edits(), 0);
    }

    #[tokio::test]
    async fn publish_tracked_reports_non_absorbable_errors() {
        struct BrokenGateway;

        #[async_trait]
        impl MessageGateway for BrokenGateway {
            async fn send(&self, _c: u64, _m: &str) -> Result<u64, ChatError> {
                Err(ChatError::Forbidden)
            }
            async fn edit(&self, _c: u64, _id: u64, _m: &str) -> Result<u64, ChatError> {
                Err(ChatError::Forbidden)
            }
            async fn delete(&self, _c: u64, _id: u64) -> Result<(), ChatError> {
                Err(ChatError::Forbidden)
            }
            async fn sweep_own_messages(&self, _c: u64, _l: usize) -> Result<usize, ChatError> {
                Err(ChatError::Forbidden)
            }
        }

        let result = publish_tracked(&BrokenGateway, 1, Some(7), "hello").await;
        assert!(matches!(result, Err(ChatError::Forbidden)));
    }

    #[test]
    fn next_cycle_delay_picks_the_soonest_future_expiry() {
        let payload = CyclesPayload {
            worlds: vec![
                world("Earth", Some(1_120.0)),
                world("Cetus", Some(1_600.0)),
                world("Orb Vallis", None),
                world("Cambion Drift", None),
            ],
        };
        assert_eq!(next_cycle_delay(&payload, 1_000.0).as_secs(), 125);
    }

    #[test]
    fn next_cycle_delay_is_floored() {
        let payload = CyclesPayload {
            worlds: vec![world("Earth", Some(1_002.0))],
        };
        assert_eq!(next_cycle_delay(&payload, 1_000.0).as_secs(), 30);
    }

    #[test]
    fn next_cycle_delay_defaults_without_future_expiries() {
        let stale = CyclesPayload {
            worlds: vec![world("Earth", Some(900.0)), world("Cetus", None)],
        };
        assert_eq!(next_cycle_delay(&stale, 1_000.0).as_secs(), 300);
        let empty = CyclesPayload { worlds: vec![] };
        assert_eq!(next_cycle_delay(&empty, 1_000.0).as_secs(), 300);
    }

    #[test]
    fn invasion_documents_unwrap_both_envelopes() {
        let bare = json!([{ "id": "inv1", "node": "SolNode1", "ally": "FC_CORPUS" }]);
        let wrapped = json!({ "invasions": [{ "id": "inv1", "node": "SolNode1", "ally": "FC_CORPUS" }] });
        assert_eq!(invasion_sides(&bare).len(), 1);
        assert_eq!(invasion_sides(&wrapped).len(), 1);
        assert!(invasion_sides(&json!({ "unexpected": true })).is_empty());
    }

    #[test]
    fn http_dates_parse_to_epoch_seconds() {
        let ts = parse_http_date("Wed, 05 Aug 2026 12:00:00 GMT").unwrap();
        assert!(ts > 1_700_000_000.0);
        assert!(parse_http_date("not a date").is_none());
    }
}
