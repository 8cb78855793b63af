//! Configuration management for Reelcast
//!
//! Non-secret settings come from a TOML file; tokens and app secrets come
//! only from the environment and are held as [`SecretString`]s.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::DestinationId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Key into the schedule file
    pub key: String,
    /// Prefix shown on every notification; defaults to `key`
    #[serde(default)]
    pub label: Option<String>,
}

impl AccountConfig {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_graph_version")]
    pub version: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            version: default_graph_version(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_version() -> String {
    "v18.0".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Instagram business account id (falls back to `IG_ID`)
    #[serde(default)]
    pub account_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacebookConfig {
    /// Facebook Page id (falls back to `FB_PAGE_ID`)
    #[serde(default)]
    pub page_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_folder")]
    pub folder: String,
    #[serde(default = "default_staging_api_url")]
    pub api_url: String,
    #[serde(default = "default_staging_token_url")]
    pub token_url: String,
    /// Maximum age of a temporary link before it must be re-fetched
    #[serde(default = "default_fetch_url_max_age_secs")]
    pub fetch_url_max_age_secs: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            folder: default_staging_folder(),
            api_url: default_staging_api_url(),
            token_url: default_staging_token_url(),
            fetch_url_max_age_secs: default_fetch_url_max_age_secs(),
        }
    }
}

fn default_staging_folder() -> String {
    "/reels".to_string()
}

fn default_staging_api_url() -> String {
    "https://api.dropboxapi.com/2".to_string()
}

fn default_staging_token_url() -> String {
    "https://api.dropbox.com/oauth2/token".to_string()
}

// Dropbox temporary links live for four hours
fn default_fetch_url_max_age_secs() -> u64 {
    4 * 60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_path")]
    pub path: String,
    /// Offset used to decide today's weekday, e.g. `"+05:30"`
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default = "default_caption")]
    pub default_caption: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            path: default_schedule_path(),
            utc_offset: default_utc_offset(),
            default_caption: default_caption(),
        }
    }
}

fn default_schedule_path() -> String {
    "scheduler/config.json".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_caption() -> String {
    "✨".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One tokio task per destination, joined before results are read
    Concurrent,
    /// Destinations run one after another
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,
    /// Attach the published Instagram media to the Page before uploading again
    #[serde(default = "default_true")]
    pub crosspost: bool,
    #[serde(default = "default_video_destinations")]
    pub video_destinations: Vec<DestinationId>,
    #[serde(default = "default_image_destinations")]
    pub image_destinations: Vec<DestinationId>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            crosspost: true,
            video_destinations: default_video_destinations(),
            image_destinations: default_image_destinations(),
        }
    }
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Concurrent
}

fn default_true() -> bool {
    true
}

fn default_video_destinations() -> Vec<DestinationId> {
    vec![DestinationId::Instagram, DestinationId::FacebookPage]
}

fn default_image_destinations() -> Vec<DestinationId> {
    vec![DestinationId::Instagram]
}

/// Poll and delay settings for the publish protocol, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_settle_delay")]
    pub settle_delay: u64,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_verify_delay")]
    pub verify_delay: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_polls: default_max_polls(),
            settle_delay: default_settle_delay(),
            verify_attempts: default_verify_attempts(),
            verify_delay: default_verify_delay(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_polls() -> u32 {
    20
}

fn default_settle_delay() -> u64 {
    15
}

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_delay() -> u64 {
    3
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_api_url: default_telegram_api_url(),
        }
    }
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, filling ids from the
    /// environment and validating the result
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_fallbacks();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Fill empty account ids from `IG_ID` / `FB_PAGE_ID`
    pub fn apply_env_fallbacks(&mut self) {
        if self.instagram.account_id.is_empty() {
            if let Ok(id) = std::env::var("IG_ID") {
                self.instagram.account_id = id;
            }
        }
        if self.facebook.page_id.is_empty() {
            if let Ok(id) = std::env::var("FB_PAGE_ID") {
                self.facebook.page_id = id;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.key.trim().is_empty() {
            return Err(ConfigError::MissingField("account.key".to_string()).into());
        }
        // The page id is needed for token resolution even for Instagram
        if self.facebook.page_id.trim().is_empty() {
            return Err(ConfigError::MissingField("facebook.page_id".to_string()).into());
        }
        let wants_instagram = self
            .publish
            .video_destinations
            .iter()
            .chain(self.publish.image_destinations.iter())
            .any(|d| *d == DestinationId::Instagram);
        if wants_instagram && self.instagram.account_id.trim().is_empty() {
            return Err(ConfigError::MissingField("instagram.account_id".to_string()).into());
        }
        if self.timing.max_polls == 0 {
            return Err(invalid("timing.max_polls", "must be at least 1"));
        }
        if self.timing.verify_attempts == 0 {
            return Err(invalid("timing.verify_attempts", "must be at least 1"));
        }
        if crate::schedule::parse_utc_offset(&self.schedule.utc_offset).is_none() {
            return Err(invalid("schedule.utc_offset", "expected +HH:MM or -HH:MM"));
        }
        if self.publish.image_destinations.contains(&DestinationId::FacebookPage) {
            return Err(invalid(
                "publish.image_destinations",
                "facebook_page only accepts videos",
            ));
        }
        if self.publish.video_destinations.is_empty() && self.publish.image_destinations.is_empty() {
            return Err(invalid("publish", "no destinations configured"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::ReelcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Credentials read from the environment
#[derive(Debug)]
pub struct Secrets {
    /// Long-lived Meta user token
    pub meta_token: SecretString,
    pub dropbox_app_key: String,
    pub dropbox_app_secret: SecretString,
    pub dropbox_refresh_token: SecretString,
    pub telegram_bot_token: Option<SecretString>,
    pub telegram_chat_id: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            meta_token: required_secret("META_TOKEN")?,
            dropbox_app_key: required_var("DROPBOX_APP_KEY")?,
            dropbox_app_secret: required_secret("DROPBOX_APP_SECRET")?,
            dropbox_refresh_token: required_secret("DROPBOX_REFRESH_TOKEN")?,
            telegram_bot_token: optional_var("TELEGRAM_BOT_TOKEN").map(SecretString::from),
            telegram_chat_id: optional_var("TELEGRAM_CHAT_ID"),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name).ok_or_else(|| ConfigError::MissingField(name.to_string()).into())
}

fn required_secret(name: &str) -> Result<SecretString> {
    required_var(name).map(SecretString::from)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REELCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("reelcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const MINIMAL: &str = r#"
        [account]
        key = "eclipsed_by_you"

        [instagram]
        account_id = "17841400000000000"

        [facebook]
        page_id = "100000000000001"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.account.label(), "eclipsed_by_you");
        assert_eq!(config.graph.version, "v18.0");
        assert_eq!(config.timing.poll_interval, 5);
        assert_eq!(config.timing.max_polls, 20);
        assert_eq!(config.timing.settle_delay, 15);
        assert_eq!(config.publish.mode, ExecutionMode::Concurrent);
        assert!(config.publish.crosspost);
        assert_eq!(
            config.publish.video_destinations,
            vec![DestinationId::Instagram, DestinationId::FacebookPage]
        );
        assert_eq!(config.publish.image_destinations, vec![DestinationId::Instagram]);
    }

    #[test]
    fn test_publish_section_parses() {
        let content = format!(
            "{}\n[publish]\nmode = \"sequential\"\ncrosspost = false\nvideo_destinations = [\"facebook_page\"]\n",
            MINIMAL
        );
        let config = Config::from_toml(&content).unwrap();
        assert_eq!(config.publish.mode, ExecutionMode::Sequential);
        assert!(!config.publish.crosspost);
        assert_eq!(config.publish.video_destinations, vec![DestinationId::FacebookPage]);
    }

    #[test]
    fn test_validate_rejects_zero_polls() {
        let content = format!("{}\n[timing]\nmax_polls = 0\n", MINIMAL);
        let config = Config::from_toml(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timing.max_polls"));
    }

    #[test]
    fn test_validate_rejects_facebook_for_images() {
        let content = format!("{}\n[publish]\nimage_destinations = [\"facebook_page\"]\n", MINIMAL);
        let config = Config::from_toml(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("image_destinations"));
    }

    #[test]
    #[serial]
    fn test_env_fallback_fills_ids() {
        std::env::set_var("IG_ID", "1784env");
        std::env::set_var("FB_PAGE_ID", "page-env");

        let mut config = Config::from_toml("[account]\nkey = \"acct\"\n").unwrap();
        config.apply_env_fallbacks();
        config.validate().unwrap();
        assert_eq!(config.instagram.account_id, "1784env");
        assert_eq!(config.facebook.page_id, "page-env");

        std::env::remove_var("IG_ID");
        std::env::remove_var("FB_PAGE_ID");
    }

    #[test]
    #[serial]
    fn test_missing_page_id_is_reported() {
        std::env::remove_var("FB_PAGE_ID");
        let mut config = Config::from_toml("[account]\nkey = \"acct\"\n[instagram]\naccount_id = \"1\"\n").unwrap();
        config.apply_env_fallbacks();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("facebook.page_id"));
    }

    #[test]
    #[serial]
    fn test_secrets_from_env() {
        std::env::set_var("META_TOKEN", "meta");
        std::env::set_var("DROPBOX_APP_KEY", "key");
        std::env::set_var("DROPBOX_APP_SECRET", "secret");
        std::env::set_var("DROPBOX_REFRESH_TOKEN", "refresh");
        std::env::remove_var("TELEGRAM_BOT_TOKEN");

        let secrets = Secrets::from_env().unwrap();
        assert_eq!(secrets.meta_token.expose_secret(), "meta");
        assert!(secrets.telegram_bot_token.is_none());
        assert!(!format!("{:?}", secrets).contains("refresh\""));

        std::env::remove_var("META_TOKEN");
        let err = Secrets::from_env().unwrap_err();
        assert!(err.to_string().contains("META_TOKEN"));

        std::env::remove_var("DROPBOX_APP_KEY");
        std::env::remove_var("DROPBOX_APP_SECRET");
        std::env::remove_var("DROPBOX_REFRESH_TOKEN");
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env() {
        std::env::set_var("REELCAST_CONFIG", "/tmp/reelcast-test.toml");
        assert_eq!(resolve_config_path().unwrap(), PathBuf::from("/tmp/reelcast-test.toml"));
        std::env::remove_var("REELCAST_CONFIG");
    }
}
