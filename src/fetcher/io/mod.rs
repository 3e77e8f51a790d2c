use std::fs::{read_to_string, write};
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Error, ensure};
use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.json";

/// Browser User-Agent sent with every request.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/84.0.4147.105 Safari/537.36";

/// Config that is used to do general setup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Remote root every image name is appended to.
    #[serde(rename = "baseUrl")]
    base_url: String,
    /// User-Agent header sent with every request.
    #[serde(rename = "userAgent", default = "default_user_agent")]
    user_agent: String,
    /// Optional proxy URL, none by default.
    #[serde(rename = "proxy", default)]
    proxy: Option<String>,
    /// Date the image sequence was published under.
    #[serde(rename = "date")]
    date: NaiveDate,
    /// Category used for the image directory and progress file names.
    #[serde(rename = "category", default = "default_category")]
    category: String,
    /// First sequence number of a batch run (inclusive).
    #[serde(rename = "rangeStart", default = "default_range_start")]
    range_start: u32,
    /// End of the batch range (exclusive).
    #[serde(rename = "rangeEnd", default = "default_range_end")]
    range_end: u32,
    /// Worker threads for a full batch run.
    #[serde(rename = "batchWorkers", default = "default_batch_workers")]
    batch_workers: usize,
    /// Worker threads for retry rounds.
    #[serde(rename = "retryWorkers", default = "default_retry_workers")]
    retry_workers: usize,
    /// How many retry rounds to run before giving up.
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    max_retries: usize,
    /// Per-request timeout in seconds.
    #[serde(rename = "requestTimeoutSecs", default = "default_timeout_secs")]
    request_timeout_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}
fn default_category() -> String {
    String::from("Apple")
}
fn default_range_start() -> u32 {
    1
}
fn default_range_end() -> u32 {
    10_000
}
fn default_batch_workers() -> usize {
    20
}
fn default_retry_workers() -> usize {
    5
}
fn default_max_retries() -> usize {
    3
}
fn default_timeout_secs() -> u64 {
    10
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub(crate) fn date(&self) -> NaiveDate {
        self.date
    }

    pub(crate) fn range_start(&self) -> u32 {
        self.range_start
    }

    pub(crate) fn range_end(&self) -> u32 {
        self.range_end
    }

    pub(crate) fn batch_workers(&self) -> usize {
        self.batch_workers
    }

    pub(crate) fn retry_workers(&self) -> usize {
        self.retry_workers
    }

    pub(crate) fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory the images for this date are written into.
    pub(crate) fn image_dir(&self) -> PathBuf {
        PathBuf::from(format!("./{}_images/{}", self.category, self.date))
    }

    /// Path of the JSON progress record.
    pub(crate) fn progress_path(&self) -> PathBuf {
        PathBuf::from(format!("{}_progress.json", self.category))
    }

    /// Checks config and ensures it isn't missing.
    pub(crate) fn config_exists() -> bool {
        if !Path::new(CONFIG_NAME).exists() {
            trace!("{}: does not exist!", CONFIG_NAME);
            return false;
        }

        true
    }

    /// Creates the config file with default values.
    pub(crate) fn create_config() -> Result<(), Error> {
        let json = to_string_pretty(&Config::default())?;
        write(Path::new(CONFIG_NAME), json)?;

        Ok(())
    }

    /// Get the global instance of the `Config`.
    ///
    /// Configuration problems are fatal at startup; nothing useful can
    /// run without a valid config.
    pub(crate) fn get() -> &'static Self {
        CONFIG.get_or_init(|| match Self::load() {
            Ok(config) => config,
            Err(err) => {
                error!("Failed to load configuration: {err:#}");
                emergency_exit("The configuration file could not be loaded");
            }
        })
    }

    /// Loads and validates the config file.
    fn load() -> Result<Self, Error> {
        let contents = read_to_string(CONFIG_NAME)
            .with_context(|| format!("could not read {CONFIG_NAME}"))?;
        let config: Config =
            from_str(&contents).with_context(|| format!("{CONFIG_NAME} contains invalid JSON"))?;

        ensure!(
            config.range_start < config.range_end,
            "rangeStart must be below rangeEnd"
        );
        ensure!(
            config.batch_workers > 0 && config.retry_workers > 0,
            "worker counts must be at least one"
        );
        ensure!(!config.base_url.is_empty(), "baseUrl must not be empty");

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: String::from("https://source.cengceng.chat/safe/"),
            user_agent: default_user_agent(),
            proxy: None,
            date: NaiveDate::from_ymd_opt(2025, 5, 9).unwrap(),
            category: default_category(),
            range_start: default_range_start(),
            range_end: default_range_end(),
            batch_workers: default_batch_workers(),
            retry_workers: default_retry_workers(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Exits the program after a message explaining the error and prompting the user to press `ENTER`.
///
/// # Arguments
///
/// * `error`: The error message to print.
pub(crate) fn emergency_exit(error: &str) -> ! {
    error!("{}", error);
    println!("Press ENTER to close the application...");

    let mut line = String::new();
    io::stdin().read_line(&mut line).unwrap_or_default();

    exit(0x00FF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_and_parses_back() {
        let json = to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = from_str(&json).unwrap();

        assert_eq!(parsed.range_start, 1);
        assert_eq!(parsed.range_end, 10_000);
        assert_eq!(parsed.batch_workers, 20);
        assert_eq!(parsed.retry_workers, 5);
        assert_eq!(parsed.max_retries, 3);
        assert!(parsed.proxy.is_none());
    }

    #[test]
    fn minimal_config_fills_in_defaults() {
        let parsed: Config =
            from_str(r#"{"baseUrl": "http://example.com/", "date": "2025-05-09"}"#).unwrap();

        assert_eq!(parsed.category, "Apple");
        assert_eq!(parsed.request_timeout(), Duration::from_secs(10));
        assert_eq!(parsed.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn derived_paths_follow_category_and_date() {
        let config = Config::default();

        assert_eq!(config.progress_path(), PathBuf::from("Apple_progress.json"));
        assert_eq!(config.image_dir(), PathBuf::from("./Apple_images/2025-05-09"));
    }
}
