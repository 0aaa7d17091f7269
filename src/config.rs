use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use reqwest::Url;

/// Largest accepted display width or height, in pixels.
pub const MAX_DISPLAY_SIDE: u32 = 256;

pub const DEFAULT_MESONET_ENDPOINT: &str = "https://api.nysmesonet.org/data/dynserv/timeseries2";

#[derive(Parser, Debug, Clone)]
#[command(name = "home-env-display")]
#[command(about = "Renders indoor and outdoor conditions for a small LED matrix display")]
pub struct Args {
    #[command(flatten)]
    pub influxdb: InfluxDBConfig,

    #[command(flatten)]
    pub mesonet: MesonetConfig,

    #[command(flatten)]
    pub output: OutputConfig,

    /// Address the HTTP server listens on
    #[arg(long = "listen", env = "LISTEN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Seconds between refreshes; also the deadline for each refresh
    #[arg(
        long,
        env = "REFRESH_INTERVAL",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_interval: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
}

impl Args {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct InfluxDBConfig {
    /// The address of the InfluxDB server to read from
    #[arg(long = "influxdb-address", env = "INFLUXDB_ADDRESS", default_value = "http://localhost:8086")]
    pub address: Url,

    /// An access token to query the provided InfluxDB server
    #[arg(long = "influxdb-token", env = "INFLUXDB_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// The org that your data is in
    #[arg(long = "influxdb-org", env = "INFLUXDB_ORG", default_value = "")]
    pub org: String,

    /// The bucket to query sensor data from
    #[arg(long = "influxdb-bucket", env = "INFLUXDB_BUCKET", default_value = "home-sensors")]
    pub bucket: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MesonetConfig {
    /// The Mesonet timeseries endpoint
    #[arg(long = "mesonet-endpoint", env = "MESONET_ENDPOINT", default_value = DEFAULT_MESONET_ENDPOINT)]
    pub endpoint: Url,

    /// The station to read outdoor temperature from
    #[arg(long = "mesonet-station", env = "MESONET_STATION", default_value = "bkln")]
    pub station: String,
}

#[derive(clap::Args, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// The width, in pixels, of the target display
    #[arg(
        long = "display-width",
        env = "DISPLAY_WIDTH",
        default_value = "64",
        value_parser = clap::value_parser!(u32).range(1..=MAX_DISPLAY_SIDE as i64)
    )]
    pub width: u32,

    /// The height, in pixels, of the target display
    #[arg(
        long = "display-height",
        env = "DISPLAY_HEIGHT",
        default_value = "32",
        value_parser = clap::value_parser!(u32).range(1..=MAX_DISPLAY_SIDE as i64)
    )]
    pub height: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 32,
        }
    }
}
