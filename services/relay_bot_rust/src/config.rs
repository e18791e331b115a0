use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub channel_id: u64,

    pub locale: String,
    pub timezone: Tz,
    pub poll_hour_minute: u32,

    pub state_path: PathBuf,
    pub cache_dir: PathBuf,

    pub exports_url: String,
    pub dict_url: String,
    pub arbitrations_url: String,
    pub incursions_url: String,
    pub incursions_channel_id: u64,
    pub invasions_url: String,
    pub invasions_channel_id: u64,

    pub open_world_cycles_url: String,
    pub earth_cycle_url: String,
    pub cetus_cycle_url: String,
    pub vallis_cycle_url: String,
    pub cambion_cycle_url: String,
    pub cycles_channel_id: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_token = require_env("DISCORD_TOKEN")?;
        let channel_id = require_env("CHANNEL_ID")?
            .parse::<u64>()
            .context("Invalid CHANNEL_ID (expected a numeric channel id)")?;

        let locale = env::var("LOCALE").unwrap_or_else(|_| "en".to_string());

        let timezone_str = env::var("TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        let timezone = Tz::from_str(&timezone_str).map_err(|_| {
            anyhow!("Invalid TIMEZONE: {timezone_str} (expected IANA tz like Europe/Madrid)")
        })?;

        let poll_hour_minute = parse_u32_env("POLL_HOUR_MINUTE", 1)?;
        if poll_hour_minute > 59 {
            return Err(anyhow!("POLL_HOUR_MINUTE must be between 0 and 59"));
        }

        let cycles_base =
            env::var("OPEN_WORLD_CYCLES_URL").unwrap_or_else(|_| "https://api.warframestat.us/pc/".to_string());

        Ok(Self {
            discord_token,
            channel_id,
            dict_url: env::var("DICT_URL").unwrap_or_else(|_| {
                format!("https://browse.wf/warframe-public-export-plus/dict.{locale}.json")
            }),
            locale,
            timezone,
            poll_hour_minute,
            state_path: path_env("STATE_PATH", "./state.json"),
            cache_dir: path_env("CACHE_DIR", "./cache"),
            exports_url: env::var("EXPORTS_URL").unwrap_or_else(|_| {
                "https://browse.wf/warframe-public-export-plus/ExportRegions.json".to_string()
            }),
            arbitrations_url: env::var("ARBITRATIONS_URL")
                .unwrap_or_else(|_| "https://browse.wf/arbys.txt".to_string()),
            incursions_url: env::var("INCURSIONS_URL")
                .unwrap_or_else(|_| "https://browse.wf/sp-incursions.txt".to_string()),
            incursions_channel_id: parse_u64_env("INCURSIONS_CHANNEL_ID", 0)?,
            invasions_url: env::var("INVASIONS_URL")
                .unwrap_or_else(|_| "https://oracle.browse.wf/invasions".to_string()),
            invasions_channel_id: parse_u64_env("INVASIONS_CHANNEL_ID", 0)?,
            earth_cycle_url: cycle_url_env("EARTH_CYCLE_URL", &cycles_base, "earthCycle"),
            cetus_cycle_url: cycle_url_env("CETUS_CYCLE_URL", &cycles_base, "cetusCycle"),
            vallis_cycle_url: cycle_url_env("VALLIS_CYCLE_URL", &cycles_base, "vallisCycle"),
            cambion_cycle_url: cycle_url_env("CAMBION_CYCLE_URL", &cycles_base, "cambionCycle"),
            open_world_cycles_url: cycles_base,
            cycles_channel_id: parse_u64_env("CYCLES_CHANNEL_ID", 0)?,
        })
    }

    /// Incursions publish next to arbitrations unless redirected.
    pub fn incursions_channel(&self) -> u64 {
        if self.incursions_channel_id != 0 {
            self.incursions_channel_id
        } else {
            self.channel_id
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("{key} must be set"))
}

fn path_env(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn parse_u32_env(key: &str, default: u32) -> Result<u32> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>()
        .with_context(|| format!("Invalid {key}: {raw} (expected integer)"))
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>()
        .with_context(|| format!("Invalid {key}: {raw} (expected integer)"))
}

fn cycle_url_env(key: &str, base: &str, endpoint: &str) -> String {
    env::var(key).unwrap_or_else(|_| format!("{}/{endpoint}/", base.trim_end_matches('/')))
}
