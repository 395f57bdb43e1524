use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize)]
pub struct Config {
    pub world: WorldConfig,
}

#[derive(Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_tps")]
    pub tps: u32,

    #[serde(default)]
    pub unload_grace_ticks: Option<i32>,

    #[serde(default = "default_save_stagger_seconds")]
    pub save_stagger_seconds: u32,

    #[serde(default = "default_core_threads")]
    pub core_threads: usize,

    #[serde(default)]
    pub max_threads: Option<usize>,

    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,

    #[serde(default = "default_shutdown_drain_seconds")]
    pub shutdown_drain_seconds: u64,

    pub world_root: PathBuf,
}

impl WorldConfig {
    /// Defaults to 10 * [`Self::tps`] when not set explicitly.
    pub fn unload_grace_ticks(&self) -> i32 {
        self.unload_grace_ticks
            .unwrap_or_else(|| 10 * self.tps as i32)
    }

    /// Defaults to `max(2, num_cpus)`.
    pub fn max_threads(&self) -> usize {
        self.max_threads
            .unwrap_or_else(|| usize::max(2, num_cpus::get()))
    }
}

fn default_tps() -> u32 {
    60
}

fn default_save_stagger_seconds() -> u32 {
    64
}

fn default_core_threads() -> usize {
    2
}

fn default_keep_alive_seconds() -> u64 {
    30
}

fn default_shutdown_drain_seconds() -> u64 {
    10
}
