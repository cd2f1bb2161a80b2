use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

pub const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");

pub const USER_AGENT: &str = {
    concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION"),
        "; ",
        env!("CARGO_PKG_HOMEPAGE"),
    )
};

/// Global settings for this program, stored as `settings.yaml` in the config
/// directory. `last_message` is written back after each inbox pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the site's API, e.g. `https://example.test/`.
    pub base_url: String,
    /// Username of the bot account.
    pub username: String,
    /// API token for the bot account.
    pub token: String,
    /// Account allowed to issue owner-only inbox commands.
    pub owner_username: String,
    /// Community whose wiki hosts the standard-conditions catalog.
    pub standards_community: String,
    #[serde(default = "default_wiki_page")]
    pub wiki_page: String,
    #[serde(default = "default_standards_wiki_page")]
    pub standards_wiki_page: String,
    /// How far back to scan the user-report queue.
    #[serde(default = "default_report_backlog_limit_hours")]
    pub report_backlog_limit_hours: i64,
    /// Minimum minutes between report-queue passes.
    #[serde(default = "default_reports_check_period_mins")]
    pub reports_check_period_mins: i64,
    /// Unix timestamp of the newest inbox message already processed.
    #[serde(default)]
    pub last_message: i64,
    /// Appended to every comment and private message the bot sends.
    #[serde(default)]
    pub disclaimer: String,
    /// Directory holding community state, the standards table, and the action log.
    pub state_dir: PathBuf,
}

fn default_wiki_page() -> String {
    "automoderation".to_string()
}

fn default_standards_wiki_page() -> String {
    "automoderation_standards".to_string()
}

fn default_report_backlog_limit_hours() -> i64 {
    2
}

fn default_reports_check_period_mins() -> i64 {
    5
}

impl Settings {
    fn path(config_dir: &Path) -> PathBuf {
        config_dir.join("settings.yaml")
    }

    pub fn load(config_dir: &Path) -> Result<Self> {
        let file = File::open(Self::path(config_dir))?;
        let settings = serde_yaml::from_reader(file)?;
        Ok(settings)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        create_dir_all(config_dir)?;
        let file = File::create(Self::path(config_dir))?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }
}
