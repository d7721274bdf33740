use std::{str::FromStr, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use duration_string::DurationString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Parser)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "camelCase")]
pub struct ShootControllerArgs {
    /// Default interval between two reconciliations of a healthy shoot
    #[arg(
        long,
        env = "GARDEN_SHOOT_SYNC_PERIOD",
        value_name = "DURATION",
        value_parser = parse_duration,
        default_value = "1h",
    )]
    #[serde(default = "ShootControllerArgs::default_sync_period")]
    pub sync_period: Duration,

    /// Interval before retrying a failed reconciliation
    #[arg(
        long,
        env = "GARDEN_SHOOT_RETRY_SYNC_PERIOD",
        value_name = "DURATION",
        value_parser = parse_duration,
        default_value = "15s",
    )]
    #[serde(default = "ShootControllerArgs::default_retry_sync_period")]
    pub retry_sync_period: Duration,

    /// Whether to honor the sync period annotation of each shoot
    #[arg(long, env = "GARDEN_SHOOT_RESPECT_SYNC_PERIOD_OVERWRITE")]
    #[serde(default)]
    pub respect_sync_period_overwrite: bool,

    #[arg(
        long,
        env = "GARDEN_SHOOT_CONCURRENT_SYNCS",
        value_name = "WORKERS",
        default_value_t = ShootControllerArgs::default_concurrent_syncs(),
    )]
    #[serde(default = "ShootControllerArgs::default_concurrent_syncs")]
    pub concurrent_syncs: usize,

    /// Watch shoots only in the given namespace
    #[arg(long, env = "GARDEN_SHOOT_NAMESPACE", value_name = "NAMESPACE")]
    #[serde(default)]
    pub namespace: Option<String>,

    /// Install or update the CRD on startup
    #[arg(long, env = "GARDEN_SHOOT_INSTALL_CRD")]
    #[serde(default)]
    pub install_crd: bool,
}

impl Default for ShootControllerArgs {
    fn default() -> Self {
        Self {
            sync_period: Self::default_sync_period(),
            retry_sync_period: Self::default_retry_sync_period(),
            respect_sync_period_overwrite: false,
            concurrent_syncs: Self::default_concurrent_syncs(),
            namespace: None,
            install_crd: false,
        }
    }
}

impl ShootControllerArgs {
    /// Lower bound of a sync period requested by an annotation.
    pub const MIN_SYNC_PERIOD_OVERWRITE: Duration = Duration::from_secs(60);

    const fn default_sync_period() -> Duration {
        Duration::from_secs(60 * 60)
    }

    const fn default_retry_sync_period() -> Duration {
        Duration::from_secs(15)
    }

    const fn default_concurrent_syncs() -> usize {
        20
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_period.is_zero() {
            bail!("sync period should be positive");
        }
        if self.retry_sync_period.is_zero() {
            bail!("retry sync period should be positive");
        }
        if self.concurrent_syncs == 0 {
            bail!("concurrent syncs should be positive");
        }
        Ok(())
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    DurationString::from_str(s)
        .map(Into::into)
        .map_err(|error| error.to_string())
}
