//! Configuration for pools and the container.
//!
//! Pool settings can be built in code, read from string properties using the
//! conventional keys (`MaxSize`, `StrictPooling`, `AccessTimeout`, ...), overlaid
//! from environment variables, or deserialized with serde when the `config`
//! feature is enabled.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, ContainerResult, FaultClass};

/// A configuration value that can be various types
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(untagged))]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    /// Try to convert to string
    pub fn as_str(&self) -> ContainerResult<&str> {
        match self {
            ConfigValue::String(s) => Ok(s),
            other => Err(ContainerError::InvalidConfig(format!("{} is not a string", other))),
        }
    }

    /// Try to convert to integer
    pub fn as_i64(&self) -> ContainerResult<i64> {
        match self {
            ConfigValue::Integer(i) => Ok(*i),
            other => Err(ContainerError::InvalidConfig(format!("{} is not an integer", other))),
        }
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> ContainerResult<bool> {
        match self {
            ConfigValue::Boolean(b) => Ok(*b),
            other => Err(ContainerError::InvalidConfig(format!("{} is not a boolean", other))),
        }
    }

    /// Integers are milliseconds; strings use the duration grammar of [`parse_duration`].
    pub fn as_duration(&self) -> ContainerResult<Duration> {
        match self {
            ConfigValue::Integer(ms) if *ms >= 0 => Ok(Duration::from_millis(*ms as u64)),
            ConfigValue::String(s) => parse_duration(s),
            other => Err(ContainerError::InvalidConfig(format!("{} is not a duration", other))),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Boolean(b) => write!(f, "{}", b),
            ConfigValue::Integer(i) => write!(f, "{}", i),
            ConfigValue::Float(x) => write!(f, "{}", x),
            ConfigValue::String(s) => f.write_str(s),
        }
    }
}

/// Trait for configuration sources
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Get a configuration value by key
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// List all available keys
    fn keys(&self) -> Vec<String>;
}

/// Environment variable configuration source
///
/// Keys are upper-cased and joined to the prefix with an underscore, so
/// `MaxSize` under prefix `calculator` reads `CALCULATOR_MAXSIZE`.
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }

    fn env_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        env::var(self.env_key(key)).ok().map(|value| {
            if let Ok(int_val) = value.parse::<i64>() {
                ConfigValue::Integer(int_val)
            } else if let Ok(float_val) = value.parse::<f64>() {
                ConfigValue::Float(float_val)
            } else if let Ok(bool_val) = value.parse::<bool>() {
                ConfigValue::Boolean(bool_val)
            } else {
                ConfigValue::String(value)
            }
        })
    }

    fn keys(&self) -> Vec<String> {
        env::vars()
            .filter_map(|(key, _)| match &self.prefix {
                Some(prefix) => {
                    let head = format!("{}_", prefix.to_uppercase());
                    key.strip_prefix(&head).map(|rest| rest.to_lowercase())
                }
                None => Some(key.to_lowercase()),
            })
            .collect()
    }
}

/// Case-insensitive string properties, as handed to services at `init`.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{PoolConfig, ServiceProperties};
/// use std::time::Duration;
///
/// let mut props = ServiceProperties::new();
/// props.set("MaxSize", "4");
/// props.set("accesstimeout", "1 hour and 30 minutes");
///
/// let config = PoolConfig::from_properties(&props).unwrap();
/// assert_eq!(config.max_size, 4);
/// assert_eq!(config.access_timeout, Duration::from_secs(90 * 60));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceProperties {
    values: HashMap<String, String>,
}

impl ServiceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, replacing any value stored under the same key in any case.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies every key the source provides over the current values.
    pub fn overlay(&mut self, source: &dyn ConfigSource) -> &mut Self {
        for key in source.keys() {
            if let Some(value) = source.get(&key) {
                self.set(&key, value.to_string());
            }
        }
        self
    }

    pub fn get_usize(&self, key: &str) -> ContainerResult<Option<usize>> {
        self.parse_with(key, |raw| raw.parse::<usize>().map_err(|e| e.to_string()))
    }

    pub fn get_f64(&self, key: &str) -> ContainerResult<Option<f64>> {
        self.parse_with(key, |raw| raw.parse::<f64>().map_err(|e| e.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> ContainerResult<Option<bool>> {
        self.parse_with(key, |raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        })
    }

    pub fn get_duration(&self, key: &str) -> ContainerResult<Option<Duration>> {
        match self.get(key) {
            Some(raw) => parse_duration(raw)
                .map(Some)
                .map_err(|e| ContainerError::InvalidConfig(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn parse_with<V>(&self, key: &str, parse: impl Fn(&str) -> Result<V, String>) -> ContainerResult<Option<V>> {
        match self.get(key) {
            Some(raw) => parse(raw.trim())
                .map(Some)
                .map_err(|e| ContainerError::InvalidConfig(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ServiceProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = ServiceProperties::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Parses a human-readable duration.
///
/// Accepts a bare number (milliseconds), a number with a unit (`"2s"`,
/// `"500 milliseconds"`, `"5 minutes"`), and compound forms joined by `and`
/// or commas (`"1 hour and 30 minutes"`).
///
/// # Examples
///
/// ```rust
/// use ferrous_container::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("1 hour and 30 minutes").unwrap(), Duration::from_secs(5400));
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(text: &str) -> ContainerResult<Duration> {
    let invalid = || ContainerError::InvalidConfig(format!("invalid duration '{}'", text));

    let normalized = text.trim().to_ascii_lowercase().replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().filter(|t| *t != "and").collect();
    if tokens.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let split = token.find(|c: char| !c.is_ascii_digit()).unwrap_or(token.len());
        if split == 0 {
            return Err(invalid());
        }
        let amount: u64 = token[..split].parse().map_err(|_| invalid())?;
        let unit = if split < token.len() {
            &token[split..]
        } else if i + 1 < tokens.len() && tokens[i + 1].starts_with(|c: char| c.is_ascii_alphabetic()) {
            i += 1;
            tokens[i]
        } else {
            "ms"
        };
        let millis_per_unit: u64 = match unit {
            "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => 1,
            "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
            "m" | "min" | "mins" | "minute" | "minutes" => 60_000,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000,
            "d" | "day" | "days" => 86_400_000,
            _ => return Err(invalid()),
        };
        let millis = amount.checked_mul(millis_per_unit).ok_or_else(invalid)?;
        total = total.checked_add(Duration::from_millis(millis)).ok_or_else(invalid)?;
        i += 1;
    }
    Ok(total)
}

/// Pool sizing and eviction settings.
///
/// Zero `max_age` or `idle_timeout` disables that eviction rule.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct PoolConfig {
    /// Upper bound on pooled instances
    pub max_size: usize,
    /// Instances kept through idle eviction and replaced when aged
    pub min_size: usize,
    /// When false, checkouts beyond `max_size` create overdraft instances instead of waiting
    pub strict: bool,
    #[cfg_attr(feature = "config", serde(with = "duration_serde"))]
    pub access_timeout: Duration,
    #[cfg_attr(feature = "config", serde(with = "duration_serde"))]
    pub max_age: Duration,
    #[cfg_attr(feature = "config", serde(with = "duration_serde"))]
    pub idle_timeout: Duration,
    #[cfg_attr(feature = "config", serde(with = "duration_serde"))]
    pub sweep_interval: Duration,
    /// Replace instances retired for age instead of letting the pool shrink
    pub replace_aged: bool,
    /// Replace instances retired by `flush`
    pub replace_flushed: bool,
    /// Spreads replacement creation times across `max_age` by this factor
    pub max_age_offset: Option<f64>,
    /// Construct `min_size` instances when the container is built
    pub prefill: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 0,
            strict: true,
            access_timeout: Duration::from_secs(30),
            max_age: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            sweep_interval: Duration::from_secs(5 * 60),
            replace_aged: false,
            replace_flushed: false,
            max_age_offset: None,
            prefill: false,
        }
    }
}

impl PoolConfig {
    /// Property keys understood by [`PoolConfig::from_properties`].
    pub const KEYS: [&'static str; 11] = [
        "MaxSize",
        "MinSize",
        "StrictPooling",
        "AccessTimeout",
        "MaxAge",
        "IdleTimeout",
        "SweepInterval",
        "ReplaceAged",
        "ReplaceFlushed",
        "MaxAgeOffset",
        "Prefill",
    ];

    /// Builds a configuration from defaults overridden by `props`, then validates it.
    pub fn from_properties(props: &ServiceProperties) -> ContainerResult<Self> {
        let mut config = PoolConfig::default();
        config.apply(props)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields present in `props`. Does not validate.
    pub fn apply(&mut self, props: &ServiceProperties) -> ContainerResult<()> {
        if let Some(v) = props.get_usize("MaxSize")? {
            self.max_size = v;
        }
        if let Some(v) = props.get_usize("MinSize")? {
            self.min_size = v;
        }
        if let Some(v) = props.get_bool("StrictPooling")? {
            self.strict = v;
        }
        if let Some(v) = props.get_duration("AccessTimeout")? {
            self.access_timeout = v;
        }
        if let Some(v) = props.get_duration("MaxAge")? {
            self.max_age = v;
        }
        if let Some(v) = props.get_duration("IdleTimeout")? {
            self.idle_timeout = v;
        }
        if let Some(v) = props.get_duration("SweepInterval")? {
            self.sweep_interval = v;
        }
        if let Some(v) = props.get_bool("ReplaceAged")? {
            self.replace_aged = v;
        }
        if let Some(v) = props.get_bool("ReplaceFlushed")? {
            self.replace_flushed = v;
        }
        if let Some(v) = props.get_f64("MaxAgeOffset")? {
            self.max_age_offset = if v > 0.0 { Some(v) } else { None };
        }
        if let Some(v) = props.get_bool("Prefill")? {
            self.prefill = v;
        }
        Ok(())
    }

    /// Checks the sizing and timeout rules.
    pub fn validate(&self) -> ContainerResult<()> {
        if self.max_size == 0 {
            return Err(ContainerError::InvalidConfig("max_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(ContainerError::InvalidConfig(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if !self.max_age.is_zero() && !self.idle_timeout.is_zero() && self.idle_timeout > self.max_age {
            return Err(ContainerError::InvalidConfig(format!(
                "idle_timeout {:?} exceeds max_age {:?}",
                self.idle_timeout, self.max_age
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ContainerError::InvalidConfig("sweep_interval must be non-zero".into()));
        }
        if let Some(offset) = self.max_age_offset {
            if !offset.is_finite() || offset < 0.0 {
                return Err(ContainerError::InvalidConfig(format!("max_age_offset {} is not a positive factor", offset)));
            }
        }
        Ok(())
    }
}

/// Container-wide settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ContainerConfig {
    /// Principal recorded for calls whose context carries none
    pub default_principal: Option<String>,
    /// Class of faults that are neither declared application faults nor raised as system faults
    pub default_fault_class: FaultClass,
    /// Pool settings for components registered without their own
    pub pool: PoolConfig,
    /// How long `Container::shutdown` waits for each pool to drain
    #[cfg_attr(feature = "config", serde(with = "duration_serde"))]
    pub shutdown_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            default_principal: None,
            default_fault_class: FaultClass::Application,
            pool: PoolConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ContainerConfig {
    /// Reads `DefaultPrincipal`, `DefaultFaultClass`, `ShutdownTimeout` and the pool keys.
    pub fn from_properties(props: &ServiceProperties) -> ContainerResult<Self> {
        let mut config = ContainerConfig::default();
        if let Some(principal) = props.get("DefaultPrincipal") {
            config.default_principal = Some(principal.to_string());
        }
        if let Some(class) = props.get("DefaultFaultClass") {
            config.default_fault_class = match class.trim().to_ascii_lowercase().as_str() {
                "application" => FaultClass::Application,
                "system" => FaultClass::System,
                other => {
                    return Err(ContainerError::InvalidConfig(format!("DefaultFaultClass: unknown class '{}'", other)))
                }
            };
        }
        if let Some(timeout) = props.get_duration("ShutdownTimeout")? {
            config.shutdown_timeout = timeout;
        }
        config.pool.apply(props)?;
        config.pool.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with environment variables under `prefix`.
    pub fn from_env(prefix: &str) -> ContainerResult<Self> {
        let mut props = ServiceProperties::new();
        props.overlay(&EnvironmentConfigSource::with_prefix(prefix));
        Self::from_properties(&props)
    }

    /// Parses a JSON document; missing fields keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_json(json: &str) -> ContainerResult<Self> {
        let config: ContainerConfig =
            serde_json::from_str(json).map_err(|e| ContainerError::InvalidConfig(e.to_string()))?;
        config.pool.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "config")]
mod duration_serde {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => super::parse_duration(&text).map_err(D::Error::custom),
        }
    }
}
