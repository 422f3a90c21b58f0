//! Configuration types.
//!
//! The relay is driven by a single YAML file. Parsing uses serde; the
//! structural invariants that serde cannot express (rule predicates,
//! recipient lists) are checked once by [`Config::validate`] so that the
//! matching and delivery code never has to re-validate.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Interval sentinel: run a single cycle and exit instead of looping.
pub const RUN_ONCE: i64 = -1;

/// Top-level relay configuration, immutable after load.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub paperless: PaperlessConfig,
    pub email: EmailConfig,
    /// Minutes between processing cycles, or [`RUN_ONCE`].
    pub run_every_minutes: i64,
}

/// Document backend connection and routing rules.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaperlessConfig {
    /// Base URL of the instance, with trailing slash (e.g. `https://docs.example.com/`).
    pub instance_url: String,
    /// API token, sent as `Authorization: Token <token>`.
    pub token: SecretString,
    /// Documents carrying this tag are candidates for delivery.
    pub queue_tag: String,
    /// Tag added to a document once it has been delivered.
    pub processed_tag: String,
    /// Download the original rendition instead of the archived one.
    #[serde(default)]
    pub download_original: bool,
    /// Prefer the backend's media filename for the attachment when present.
    #[serde(default)]
    pub use_custom_filename: bool,
    /// Delivery rules, evaluated in declaration order.
    pub rules: Vec<RuleConfig>,
}

/// A single delivery rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,
    /// Tag names that must all be present on a matching document.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Exact correspondent name the document must resolve to, if set.
    #[serde(default)]
    pub correspondent: Option<String>,
    /// Exact document type name the document must resolve to, if set.
    #[serde(default)]
    pub document_type: Option<String>,
    /// Exact storage path name the document must resolve to, if set.
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Envelope + To header recipients.
    pub recipients: Vec<String>,
    /// Envelope-only recipients, never written to any header.
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Subject template override; empty/absent falls back to `email.subject`.
    #[serde(default)]
    pub subject: Option<String>,
    /// Body template override; empty/absent falls back to `email.body`.
    #[serde(default)]
    pub body: Option<String>,
}

/// SMTP connection strategy. Any other literal fails at parse time,
/// before a socket is ever opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Dial an implicit-TLS socket (typically port 465).
    Tls,
    /// Dial plaintext, then upgrade via the STARTTLS command (typically 587).
    Starttls,
}

/// Outbound SMTP configuration and global message templates.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// Envelope sender and From header address.
    pub from_address: String,
    pub server: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub username: String,
    pub password: SecretString,
    /// Default subject template (see template token vocabulary).
    pub subject: String,
    /// Default HTML body template.
    pub body: String,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants serde cannot: every rule declares at least one
    /// predicate and at least one recipient, and scalar fields are non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("paperless.instance_url", &self.paperless.instance_url),
            ("paperless.queue_tag", &self.paperless.queue_tag),
            ("paperless.processed_tag", &self.paperless.processed_tag),
            ("email.from_address", &self.email.from_address),
            ("email.server", &self.email.server),
            ("email.subject", &self.email.subject),
            ("email.body", &self.email.body),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must not be empty".into(),
                });
            }
        }

        if !self.paperless.instance_url.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "paperless.instance_url".into(),
                message: "must end with a trailing slash".into(),
            });
        }

        if self.run_every_minutes != RUN_ONCE && self.run_every_minutes < 1 {
            return Err(ConfigError::InvalidValue {
                key: "run_every_minutes".into(),
                message: format!("must be >= 1 or {RUN_ONCE} (run once)"),
            });
        }

        for rule in &self.paperless.rules {
            rule.validate()?;
        }

        Ok(())
    }
}

impl RuleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidRule {
                name: self.name.clone(),
                reason: "rule name must not be empty".into(),
            });
        }
        let has_predicate = !self.tags.is_empty()
            || self.correspondent.is_some()
            || self.document_type.is_some();
        if !has_predicate {
            return Err(ConfigError::InvalidRule {
                name: self.name.clone(),
                reason: "rule must declare at least one of tags, correspondent or document_type"
                    .into(),
            });
        }
        if self.recipients.is_empty() {
            return Err(ConfigError::InvalidRule {
                name: self.name.clone(),
                reason: "rule must declare at least one recipient".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_yaml() -> String {
        r#"
paperless:
  instance_url: "https://docs.example.com/"
  token: "secret-token"
  queue_tag: "outbox"
  processed_tag: "sent"
  rules:
    - name: "Accounting"
      tags: ["invoice"]
      recipients: ["ap@example.com"]
email:
  from_address: "relay@example.com"
  server: "smtp.example.com"
  port: 465
  connection_type: tls
  username: "relay"
  password: "hunter2"
  subject: "Document %document_title%"
  body: "<p>Document %document_id%</p>"
run_every_minutes: 5
"#
        .to_string()
    }

    #[test]
    fn parses_and_validates_base_config() {
        let config: Config = serde_yaml::from_str(&base_yaml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.email.connection_type, ConnectionType::Tls);
        assert_eq!(config.paperless.rules.len(), 1);
    }

    #[test]
    fn load_reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(base_yaml().as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.run_every_minutes, 5);
    }

    #[test]
    fn rejects_unknown_connection_type_literal() {
        let yaml = base_yaml().replace("connection_type: tls", "connection_type: ssl");
        let err = serde_yaml::from_str::<Config>(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn accepts_starttls_literal() {
        let yaml = base_yaml().replace("connection_type: tls", "connection_type: starttls");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.email.connection_type, ConnectionType::Starttls);
    }

    #[test]
    fn rejects_rule_without_predicates() {
        let yaml = base_yaml().replace("tags: [\"invoice\"]", "tags: []");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn storage_path_alone_is_not_a_qualifying_predicate() {
        let yaml = base_yaml().replace(
            "tags: [\"invoice\"]",
            "tags: []\n      storage_path: \"Archive\"",
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn correspondent_alone_is_a_qualifying_predicate() {
        let yaml = base_yaml().replace(
            "tags: [\"invoice\"]",
            "tags: []\n      correspondent: \"ACME\"",
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn rejects_rule_without_recipients() {
        let yaml = base_yaml().replace(
            "recipients: [\"ap@example.com\"]",
            "recipients: []",
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn rejects_zero_interval() {
        let yaml = base_yaml().replace("run_every_minutes: 5", "run_every_minutes: 0");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn run_once_sentinel_is_valid() {
        let yaml = base_yaml().replace("run_every_minutes: 5", "run_every_minutes: -1");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run_every_minutes, RUN_ONCE);
    }

    #[test]
    fn rejects_instance_url_without_trailing_slash() {
        let yaml = base_yaml().replace(
            "instance_url: \"https://docs.example.com/\"",
            "instance_url: \"https://docs.example.com\"",
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
