//! # quizpilot
//!
//! Autonomous quiz-funnel walker. Points a real browser at a marketing
//! funnel, classifies each screen into a small set of archetypes, picks a
//! plausible progressing action, and keeps going until it hits the paywall
//! or runs out of budget — no per-site scripting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quizpilot::{Config, FunnelDriver, RotationCursor};
//!
//! # #[tokio::main]
//! # async fn main() -> quizpilot::Result<()> {
//! let config = Config::load("configs/example.yaml")?;
//! let driver = FunnelDriver::new(config.clone(), RotationCursor::new()).await?;
//! for url in &config.urls {
//!     let summary = driver.run(url).await?;
//!     println!("{}: paywall={}", url, summary.reached_paywall);
//! }
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod evidence;
pub mod observe;
pub mod popups;

pub use actions::{ActionOutcome, RotationCursor, StrategyOutcome};
pub use classify::{Archetype, Classification, Classifier};
pub use config::{BrowserConfig, Config, EvidenceConfig, Limits, Profile};
pub use driver::{FunnelDriver, ProgressGuard, RunSummary, StopReason};
pub use observe::{PageElement, PageSnapshot};

/// Result type for quizpilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during config loading or a funnel run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(eoka::Error),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser session closed: {0}")]
    SessionClosed(String),
}

impl Error {
    /// Wrap a browser error, promoting session-terminated conditions to
    /// [`Error::SessionClosed`] so the driver can abort the run instead of
    /// treating it as one more flaky interaction.
    pub(crate) fn from_browser(err: eoka::Error) -> Self {
        if is_session_closed(&err) {
            Error::SessionClosed(err.to_string())
        } else {
            Error::Browser(err)
        }
    }
}

/// Whether a browser error means the session itself is gone (tab or browser
/// closed externally, transport dropped) rather than a flaky interaction.
pub fn is_session_closed(err: &eoka::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    [
        "target closed",
        "session closed",
        "browser closed",
        "connection closed",
        "connection reset",
        "websocket",
        "target detached",
        "no such target",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
urls:
  - "https://quiz.example.com/start"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.urls.len(), 1);
        assert!(!config.browser.headless);
        assert_eq!(config.limits.max_steps, 25);
        assert_eq!(config.limits.post_email_max_steps, 40);
        assert_eq!(config.limits.no_action_limit, 2);
        assert_eq!(config.limits.nav_retries, 1);
    }

    #[test]
    fn test_parse_browser_config() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
browser:
  headless: true
  proxy: "http://localhost:8080"
  user_agent: "Custom UA"
  viewport:
    width: 1920
    height: 1080
"#;
        let config = Config::parse(yaml).unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.proxy, Some("http://localhost:8080".into()));
        assert_eq!(config.browser.user_agent, Some("Custom UA".into()));
        let viewport = config.browser.viewport.unwrap();
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
    }

    #[test]
    fn test_parse_limits_overrides() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
limits:
  max_steps: 10
  post_email_max_steps: 30
  same_fingerprint_limit: 5
  settle_ms: 500
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.limits.max_steps, 10);
        assert_eq!(config.limits.post_email_max_steps, 30);
        assert_eq!(config.limits.same_fingerprint_limit, 5);
        assert_eq!(config.limits.settle_ms, 500);
        // untouched fields keep their defaults
        assert_eq!(config.limits.no_action_limit, 2);
        assert_eq!(config.limits.transition_timeout_ms, 4000);
    }

    #[test]
    fn test_parse_profile() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
profile:
  name: "Jamie Doe"
  email: "jamie@example.com"
  age: 42
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.profile.name, "Jamie Doe");
        assert_eq!(config.profile.email, "jamie@example.com");
        assert_eq!(config.profile.age, 42);
        assert_eq!(config.profile.height_cm, 175); // default survives
    }

    #[test]
    fn test_validation_empty_urls() {
        let result = Config::parse("urls: []");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least one"));
    }

    #[test]
    fn test_validation_bad_scheme() {
        let result = Config::parse("urls: [\"ftp://quiz.example.com\"]");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_zero_max_steps() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
limits:
  max_steps: 0
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_steps"));
    }

    #[test]
    fn test_validation_post_email_budget_smaller() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
limits:
  max_steps: 20
  post_email_max_steps: 10
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("post_email_max_steps"));
    }

    #[test]
    fn test_validation_fingerprint_limit_too_low() {
        let yaml = r#"
urls: ["https://quiz.example.com"]
limits:
  same_fingerprint_limit: 1
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_urls() {
        let config =
            Config::from_urls(vec!["https://quiz.example.com/a".into()]).unwrap();
        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.limits.max_steps, 25);
    }

    #[test]
    fn test_from_urls_empty() {
        assert!(Config::from_urls(vec![]).is_err());
    }

    #[test]
    fn test_load_example_config() {
        let config = Config::load("configs/example.yaml").unwrap();
        assert!(!config.urls.is_empty());
        assert!(config.browser.headless);
    }
}
