//! Service configuration, read from `HELPDESK_*` environment variables.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::api::{ApiConfig, CleanupConfig};
use crate::idempotency::DEFAULT_TTL_HOURS;

const APP_DIR_NAME: &str = "helpdesk";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub idempotency_ttl_hours: i64,
    pub idempotency_sweep_secs: u64,
    pub sla_sweep_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let api = ApiConfig::default();
        let cleanup = CleanupConfig::default();
        Self {
            data_dir: default_data_dir(),
            host: api.host,
            port: api.port,
            idempotency_ttl_hours: DEFAULT_TTL_HOURS,
            idempotency_sweep_secs: cleanup.idempotency_sweep_secs,
            sla_sweep_secs: cleanup.sla_sweep_secs,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Parse `raw` or keep `fallback`, warning about values that don't parse.
fn parse_or<T>(name: &str, raw: Option<String>, fallback: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + std::fmt::Debug,
{
    let Some(raw) = raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) else {
        return fallback;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!("Ignoring invalid {}={:?}, using {:?}", name, raw, fallback);
            fallback
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("HELPDESK_DATA_DIR")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Self {
            data_dir,
            host: parse_or("HELPDESK_HOST", lookup("HELPDESK_HOST"), defaults.host, |_| true),
            port: parse_or("HELPDESK_PORT", lookup("HELPDESK_PORT"), defaults.port, |_| true),
            idempotency_ttl_hours: parse_or(
                "HELPDESK_IDEMPOTENCY_TTL_HOURS",
                lookup("HELPDESK_IDEMPOTENCY_TTL_HOURS"),
                defaults.idempotency_ttl_hours,
                |h| *h > 0,
            ),
            idempotency_sweep_secs: parse_or(
                "HELPDESK_IDEMPOTENCY_SWEEP_SECS",
                lookup("HELPDESK_IDEMPOTENCY_SWEEP_SECS"),
                defaults.idempotency_sweep_secs,
                |s| *s > 0,
            ),
            sla_sweep_secs: parse_or(
                "HELPDESK_SLA_SWEEP_SECS",
                lookup("HELPDESK_SLA_SWEEP_SECS"),
                defaults.sla_sweep_secs,
                |s| *s > 0,
            ),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("helpdesk.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn admin_token_path(&self) -> PathBuf {
        self.data_dir.join("admin_token")
    }

    pub fn api(&self) -> ApiConfig {
        ApiConfig {
            host: self.host,
            port: self.port,
        }
    }

    pub fn cleanup(&self) -> CleanupConfig {
        CleanupConfig {
            idempotency_sweep_secs: self.idempotency_sweep_secs,
            sla_sweep_secs: self.sla_sweep_secs,
        }
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idempotency_ttl_hours)
    }
}
