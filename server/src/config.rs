//! Server configuration surface

use clap::Parser;
use shared::ColorMode;
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments, validated once at startup. Every tunable the
/// server recognizes lives here; nothing else reads the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Collaborative pixel canvas server")]
pub struct Config {
    /// Address to bind the HTTP listener to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Directory snapshots are written to and restored from
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory of static client assets served on non-websocket paths
    #[arg(long, default_value = "./dist")]
    pub static_dir: PathBuf,

    /// Number of panels in the grid
    #[arg(long, default_value_t = shared::DEFAULT_NUM_PANELS)]
    pub panels: usize,

    /// Grid tiling columns (cols × rows must equal the panel count)
    #[arg(long, default_value_t = shared::DEFAULT_GRID_COLS)]
    pub cols: usize,

    /// Grid tiling rows
    #[arg(long, default_value_t = shared::DEFAULT_GRID_ROWS)]
    pub rows: usize,

    /// Seconds between canvas snapshots
    #[arg(long, default_value_t = 300)]
    pub snapshot_interval_secs: u64,

    /// Outbound queue capacity per client, in frames
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,

    /// Paint tokens refilled per second per client
    #[arg(long, default_value_t = 150.0)]
    pub rate_refill: f64,

    /// Paint token burst per client
    #[arg(long, default_value_t = 300)]
    pub rate_burst: u32,

    /// Seconds allowed for one websocket write before the connection is
    /// terminated
    #[arg(long, default_value_t = 10)]
    pub write_wait_secs: u64,

    /// Seconds without any inbound frame (pong replies included) before a
    /// connection is considered dead
    #[arg(long, default_value_t = 60)]
    pub pong_wait_secs: u64,

    /// Origin allowed to upgrade (repeatable); no value allows any origin
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Admission verification secret; when unset every connection is
    /// admitted without a token check
    #[arg(long, env = "ADMISSION_SECRET")]
    pub admission_secret: Option<String>,

    /// Take the paint color from Update frames (8-byte layout) instead of
    /// assigning a random color per connection
    #[arg(long, default_value_t = false)]
    pub client_colors: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.panels == 0 || self.cols * self.rows != self.panels {
            return Err(format!(
                "grid tiling {}x{} does not cover {} panels",
                self.cols, self.rows, self.panels
            ));
        }
        // The wire index for a panel is a u16.
        if self.panels > usize::from(u16::MAX) + 1 {
            return Err(format!("{} panels exceed the 16-bit panel index", self.panels));
        }
        if self.rate_refill <= 0.0 || self.rate_burst == 0 {
            return Err("rate limiter needs a positive refill rate and burst".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("outbound queue capacity must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn color_mode(&self) -> ColorMode {
        if self.client_colors {
            ColorMode::ClientDeclared
        } else {
            ColorMode::ServerAssigned
        }
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Liveness probes go out at 9/10 of the pong deadline so a healthy
    /// client always has a probe in flight before the deadline expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}
