//! Breaker settings and their sources.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{DEFAULT_RESET_AFTER_MINUTES, DEFAULT_THRESHOLD};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Threshold must be greater than 0 (got {0})")]
    InvalidThreshold(u32),

    #[error("Reset duration must be greater than 0")]
    ZeroResetAfter,

    #[error("Invalid reset duration '{0}' (expected minutes or a value like 90s, 5m, 1h 30m)")]
    InvalidResetAfter(String),

    #[error("Trip callback must be asynchronous")]
    BlockingTripCallback,

    #[error("Invalid value for environment variable {name}: '{value}'")]
    InvalidEnvVar { name: &'static str, value: String },

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How long a tripped command stays tripped.
///
/// A bare integer means minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAfter {
    Minutes(u64),
    Duration(Duration),
}

impl ResetAfter {
    /// Normalizes to a [`Duration`].
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        match self {
            Self::Minutes(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
            Self::Duration(duration) => duration,
        }
    }
}

impl Default for ResetAfter {
    fn default() -> Self {
        Self::Minutes(DEFAULT_RESET_AFTER_MINUTES)
    }
}

impl From<u64> for ResetAfter {
    fn from(minutes: u64) -> Self {
        Self::Minutes(minutes)
    }
}

impl From<Duration> for ResetAfter {
    fn from(duration: Duration) -> Self {
        Self::Duration(duration)
    }
}

impl FromStr for ResetAfter {
    type Err = ConfigError;

    /// Parses `"5"` (minutes) or space-separated parts such as `"90s"`,
    /// `"1h 30m"`, `"500ms"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResetAfter(s.to_owned());
        let trimmed = s.trim();

        if let Ok(minutes) = trimmed.parse::<u64>() {
            return Ok(Self::Minutes(minutes));
        }

        let mut total = Duration::ZERO;
        let mut parts = 0;
        for part in trimmed.split_whitespace() {
            let split = part.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
            let (number, unit) = part.split_at(split);
            let value: u64 = number.parse().map_err(|_| invalid())?;

            let piece = match unit {
                "ms" => Duration::from_millis(value),
                "s" => Duration::from_secs(value),
                "m" => Duration::from_secs(value.saturating_mul(60)),
                "h" => Duration::from_secs(value.saturating_mul(3600)),
                _ => return Err(invalid()),
            };
            total = total.saturating_add(piece);
            parts += 1;
        }

        if parts == 0 {
            return Err(invalid());
        }
        Ok(Self::Duration(total))
    }
}

impl fmt::Display for ResetAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.as_duration()))
    }
}

/// Formats a duration in the form [`ResetAfter`] parses.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.subsec_millis();
    let secs = duration.as_secs();

    let mut parts = Vec::new();
    if secs >= 3600 {
        parts.push(format!("{}h", secs / 3600));
    }
    if secs % 3600 >= 60 {
        parts.push(format!("{}m", (secs % 3600) / 60));
    }
    if secs % 60 > 0 {
        parts.push(format!("{}s", secs % 60));
    }
    if millis > 0 {
        parts.push(format!("{millis}ms"));
    }

    if parts.is_empty() {
        "0s".to_owned()
    } else {
        parts.join(" ")
    }
}

/// Process-wide settings of one breaker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that trip a command.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// How long a tripped command stays tripped.
    #[serde(
        default = "default_reset_after",
        deserialize_with = "deserialize_reset_after",
        serialize_with = "serialize_reset_after"
    )]
    pub reset_after: Duration,

    /// Whether to also watch the hybrid command error surface.
    #[serde(default = "default_hybrid_support")]
    pub hybrid_support: bool,
}

const fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

const fn default_reset_after() -> Duration {
    ResetAfter::Minutes(DEFAULT_RESET_AFTER_MINUTES).as_duration()
}

const fn default_hybrid_support() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResetAfter {
    Minutes(u64),
    Text(String),
}

fn deserialize_reset_after<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let reset_after = match RawResetAfter::deserialize(deserializer)? {
        RawResetAfter::Minutes(minutes) => ResetAfter::Minutes(minutes),
        RawResetAfter::Text(text) => text.parse().map_err(D::Error::custom)?,
    };
    Ok(reset_after.as_duration())
}

fn serialize_reset_after<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            reset_after: default_reset_after(),
            hybrid_support: default_hybrid_support(),
        }
    }
}

impl BreakerSettings {
    /// Sets the reset duration, normalizing minutes.
    pub fn set_reset_after(&mut self, reset_after: impl Into<ResetAfter>) {
        self.reset_after = reset_after.into().as_duration();
    }

    /// Reads settings from environment variables, keeping defaults for
    /// the ones that are not set.
    ///
    /// Reads `BREAKER_THRESHOLD`, `BREAKER_RESET_AFTER` and `BREAKER_HYBRID`.
    pub fn from_env_with_defaults() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(value) = lookup("BREAKER_THRESHOLD") {
            settings.threshold = value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: "BREAKER_THRESHOLD",
                value,
            })?;
        }

        if let Some(value) = lookup("BREAKER_RESET_AFTER") {
            let reset_after: ResetAfter = value.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: "BREAKER_RESET_AFTER",
                value,
            })?;
            settings.set_reset_after(reset_after);
        }

        if let Some(value) = lookup("BREAKER_HYBRID") {
            settings.hybrid_support = parse_bool(&value).ok_or(ConfigError::InvalidEnvVar {
                name: "BREAKER_HYBRID",
                value,
            })?;
        }

        Ok(settings)
    }

    /// Loads settings from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Checks that the threshold and reset duration are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.reset_after.is_zero() {
            return Err(ConfigError::ZeroResetAfter);
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BreakerSettings::default();
        assert_eq!(settings.threshold, 3);
        assert_eq!(settings.reset_after, Duration::from_secs(60));
        assert!(settings.hybrid_support);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_integer_reset_after_means_minutes() {
        let mut settings = BreakerSettings::default();
        settings.set_reset_after(5_u64);
        assert_eq!(settings.reset_after, Duration::from_secs(300));

        settings.set_reset_after(Duration::from_secs(5));
        assert_eq!(settings.reset_after, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_reset_after() {
        assert_eq!("5".parse::<ResetAfter>().unwrap(), ResetAfter::Minutes(5));
        assert_eq!(
            "90s".parse::<ResetAfter>().unwrap().as_duration(),
            Duration::from_secs(90)
        );
        assert_eq!(
            "1h 30m".parse::<ResetAfter>().unwrap().as_duration(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            "250ms".parse::<ResetAfter>().unwrap().as_duration(),
            Duration::from_millis(250)
        );
        assert!("".parse::<ResetAfter>().is_err());
        assert!("5x".parse::<ResetAfter>().is_err());
        assert!("m".parse::<ResetAfter>().is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1s 500ms");
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let settings = BreakerSettings {
            threshold: 0,
            ..BreakerSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidThreshold(0))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_reset_after() {
        let settings = BreakerSettings {
            reset_after: Duration::ZERO,
            ..BreakerSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::ZeroResetAfter)));
    }

    #[test]
    fn test_deserialize_settings() {
        let settings: BreakerSettings =
            serde_json::from_str(r#"{"threshold": 5, "reset_after": 2}"#).unwrap();
        assert_eq!(settings.threshold, 5);
        assert_eq!(settings.reset_after, Duration::from_secs(120));
        assert!(settings.hybrid_support);

        let settings: BreakerSettings =
            serde_json::from_str(r#"{"reset_after": "45s", "hybrid_support": false}"#).unwrap();
        assert_eq!(settings.threshold, 3);
        assert_eq!(settings.reset_after, Duration::from_secs(45));
        assert!(!settings.hybrid_support);

        assert!(serde_json::from_str::<BreakerSettings>(r#"{"reset_after": "soon"}"#).is_err());
    }

    #[test]
    fn test_serialize_round_trips_reset_after() {
        let mut settings = BreakerSettings::default();
        settings.set_reset_after(Duration::from_secs(90));

        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains(r#""reset_after":"1m 30s""#));
        assert_eq!(serde_json::from_str::<BreakerSettings>(&json).unwrap(), settings);
    }

    fn env(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, value)| (*name, (*value).to_owned()))
            .collect();
        move |name: &'static str| vars.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let settings = BreakerSettings::from_lookup(env(&[])).unwrap();
        assert_eq!(settings, BreakerSettings::default());

        let settings = BreakerSettings::from_lookup(env(&[
            ("BREAKER_THRESHOLD", " 5 "),
            ("BREAKER_RESET_AFTER", "30s"),
            ("BREAKER_HYBRID", "no"),
        ]))
        .unwrap();
        assert_eq!(settings.threshold, 5);
        assert_eq!(settings.reset_after, Duration::from_secs(30));
        assert!(!settings.hybrid_support);

        let settings =
            BreakerSettings::from_lookup(env(&[("BREAKER_RESET_AFTER", "2")])).unwrap();
        assert_eq!(settings.reset_after, Duration::from_secs(120));
    }

    #[test]
    fn test_env_rejects_invalid_values() {
        let error = BreakerSettings::from_lookup(env(&[("BREAKER_THRESHOLD", "three")]))
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidEnvVar { name: "BREAKER_THRESHOLD", ref value } if value == "three"
        ));

        let error = BreakerSettings::from_lookup(env(&[("BREAKER_RESET_AFTER", "soon")]))
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidEnvVar { name: "BREAKER_RESET_AFTER", .. }
        ));

        let error =
            BreakerSettings::from_lookup(env(&[("BREAKER_HYBRID", "maybe")])).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidEnvVar { name: "BREAKER_HYBRID", .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"threshold": 4, "reset_after": "1h 30m"}}"#).unwrap();

        let settings = BreakerSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.threshold, 4);
        assert_eq!(settings.reset_after, Duration::from_secs(5400));
        assert!(settings.hybrid_support);
    }

    #[test]
    fn test_load_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = BreakerSettings::load_from_file(dir.path().join("breaker.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ threshold: ").unwrap();
        let malformed = BreakerSettings::load_from_file(file.path());
        assert!(matches!(malformed, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
