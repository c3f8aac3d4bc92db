use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::session::SessionConfig;

const DEFAULT_URL: &str = "https://edugate.jadara.edu.jo/timetable";

#[derive(Parser, Debug, Clone)]
#[command(name = "edugatebot")]
#[command(about = "Edugate timetable scraper - looks up subjects and sections from the university timetable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the timetable once, log a summary and export it to JSON
    Check {
        #[command(flatten)]
        config: Config,
    },
    /// Print all sections of a subject, or a single section
    Get {
        #[command(flatten)]
        config: Config,

        /// Subject ID (6 digits)
        id: String,

        /// Section number
        section: Option<String>,

        /// Read a previously exported JSON file instead of fetching
        #[arg(long, value_name = "PATH")]
        from_file: Option<PathBuf>,
    },
    /// Search subjects by name (case-sensitive substring)
    Search {
        #[command(flatten)]
        config: Config,

        /// Part of the subject name; empty lists every subject
        #[arg(default_value = "")]
        name: String,

        /// Read a previously exported JSON file instead of fetching
        #[arg(long, value_name = "PATH")]
        from_file: Option<PathBuf>,
    },
    /// Start the Telegram bot and the web dashboard
    Start {
        #[command(flatten)]
        config: Config,

        /// Telegram bot token from @BotFather
        #[arg(long, env = "TELE_TOKEN", hide_env_values = true)]
        telegram_token: String,

        /// Do not start the web dashboard
        #[arg(long)]
        no_web: bool,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Timetable page URL (used for both the token GET and the data POST)
    #[arg(short, long, env = "EDUGATE_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Minimum snapshot age in seconds before a lookup triggers a refetch
    #[arg(long, env = "EDUGATE_STALE_SECS", default_value = "20")]
    pub stale_secs: u64,

    /// Responses shorter than this many bytes are treated as failed fetches
    #[arg(long, env = "EDUGATE_MIN_PAYLOAD_BYTES", default_value = "1000000")]
    pub min_payload_bytes: usize,

    /// Rows requested in the single page; must exceed the number of sections
    #[arg(long, env = "EDUGATE_PAGE_ROWS", default_value = "4000")]
    pub page_rows: u32,

    /// HTTP timeout in seconds for each portal request
    #[arg(long, env = "EDUGATE_TIMEOUT_SECS", default_value = "60")]
    pub timeout_secs: u64,

    /// Where `check` writes the exported timetable
    #[arg(long, env = "EDUGATE_EXPORT", default_value = "data/subjects_list.json")]
    pub export: PathBuf,

    /// Favorites file used by the bot
    #[arg(long, env = "EDUGATE_FAVORITES", default_value = "data/favorites.json")]
    pub favorites: PathBuf,

    /// Web dashboard port (only used in start mode)
    #[arg(long, env = "EDUGATE_PORT", default_value = "3000")]
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Config {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            url: self.url.clone(),
            min_payload_bytes: self.min_payload_bytes,
            page_rows: self.page_rows,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            bail!(
                "Invalid URL '{}': must start with http:// or https://",
                self.url
            );
        }

        if self.stale_secs == 0 {
            bail!("Invalid staleness threshold: --stale-secs must be at least 1");
        }

        if self.min_payload_bytes == 0 {
            bail!("Invalid payload threshold: --min-payload-bytes must be greater than 0");
        }

        if self.page_rows == 0 {
            bail!("Invalid page size: --page-rows must be greater than 0");
        }

        if self.timeout_secs == 0 {
            bail!("Invalid timeout: --timeout-secs must be at least 1");
        }

        Ok(())
    }
}

/// Validate the Telegram token for the start command
pub fn validate_telegram_token(token: &str) -> Result<()> {
    let token = token.trim();
    if token.len() < 40 || !token.contains(':') {
        bail!(
            "Telegram token looks invalid ({} characters).\n\
             Set TELE_TOKEN in your .env file to the token issued by @BotFather.",
            token.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            url: "https://example.com/timetable".to_string(),
            stale_secs: 20,
            min_payload_bytes: 1_000_000,
            page_rows: 4000,
            timeout_secs: 60,
            export: PathBuf::from("data/subjects_list.json"),
            favorites: PathBuf::from("data/favorites.json"),
            port: 3000,
            verbose: false,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let config = Config {
            url: "edugate.jadara.edu.jo".to_string(),
            ..config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        assert!(Config { stale_secs: 0, ..config() }.validate().is_err());
        assert!(Config { min_payload_bytes: 0, ..config() }.validate().is_err());
        assert!(Config { page_rows: 0, ..config() }.validate().is_err());
        assert!(Config { timeout_secs: 0, ..config() }.validate().is_err());
    }

    #[test]
    fn test_session_config() {
        let session = config().session();
        assert_eq!(session.url, "https://example.com/timetable");
        assert_eq!(session.min_payload_bytes, 1_000_000);
        assert_eq!(session.page_rows, 4000);
        assert_eq!(session.timeout, Duration::from_secs(60));
        assert_eq!(config().stale_after(), Duration::from_secs(20));
    }

    #[test]
    fn test_defaults_from_cli() {
        let cli = Cli::try_parse_from(["edugatebot", "get", "185103", "2"]).unwrap();
        match cli.command {
            Command::Get {
                config,
                id,
                section,
                from_file,
            } => {
                assert_eq!(id, "185103");
                assert!(from_file.is_none());
                assert_eq!(section.as_deref(), Some("2"));
                assert_eq!(config.url, DEFAULT_URL);
                assert_eq!(config.stale_secs, 20);
                assert_eq!(config.min_payload_bytes, 1_000_000);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_search_from_file() {
        let cli = Cli::try_parse_from([
            "edugatebot",
            "search",
            "--from-file",
            "data/subjects_list.json",
            "Calculus",
        ])
        .unwrap();
        match cli.command {
            Command::Search {
                name, from_file, ..
            } => {
                assert_eq!(name, "Calculus");
                assert_eq!(from_file, Some(PathBuf::from("data/subjects_list.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validate_telegram_token() {
        assert!(validate_telegram_token("").is_err());
        assert!(validate_telegram_token("123:short").is_err());
        assert!(
            validate_telegram_token("1234567890:AAH-abcdefghijklmnopqrstuvwxyz0123456").is_ok()
        );
    }
}
