use ferrous_container::config::parse_duration;
use ferrous_container::{
    ConfigSource, ConfigValue, ContainerConfig, ContainerError, EnvironmentConfigSource, FaultClass, PoolConfig,
    ServiceProperties,
};
use serial_test::serial;
use std::env;
use std::time::Duration;

// ===== Environment Variables =====

struct EnvGuard(&'static [&'static str]);

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in self.0 {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn environment_overrides_pool_defaults() {
    let _guard = EnvGuard(&["ORDERS_MAXSIZE", "ORDERS_STRICTPOOLING", "ORDERS_ACCESSTIMEOUT", "ORDERS_DEFAULTPRINCIPAL"]);
    env::set_var("ORDERS_MAXSIZE", "25");
    env::set_var("ORDERS_STRICTPOOLING", "false");
    env::set_var("ORDERS_ACCESSTIMEOUT", "2 seconds");
    env::set_var("ORDERS_DEFAULTPRINCIPAL", "batch");

    let config = ContainerConfig::from_env("orders").unwrap();
    assert_eq!(config.pool.max_size, 25);
    assert!(!config.pool.strict);
    assert_eq!(config.pool.access_timeout, Duration::from_secs(2));
    assert_eq!(config.default_principal.as_deref(), Some("batch"));
    assert_eq!(config.pool.min_size, 0);
}

#[test]
#[serial]
fn environment_values_are_typed() {
    let _guard = EnvGuard(&["TYPED_COUNT", "TYPED_RATIO", "TYPED_ENABLED", "TYPED_NAME"]);
    env::set_var("TYPED_COUNT", "7");
    env::set_var("TYPED_RATIO", "0.5");
    env::set_var("TYPED_ENABLED", "true");
    env::set_var("TYPED_NAME", "primary");

    let source = EnvironmentConfigSource::with_prefix("typed");
    assert_eq!(source.get("count"), Some(ConfigValue::Integer(7)));
    assert_eq!(source.get("Ratio"), Some(ConfigValue::Float(0.5)));
    assert_eq!(source.get("enabled"), Some(ConfigValue::Boolean(true)));
    assert_eq!(source.get("name"), Some(ConfigValue::String("primary".into())));
    assert_eq!(source.get("missing"), None);

    let mut keys = source.keys();
    keys.sort();
    assert_eq!(keys, vec!["count", "enabled", "name", "ratio"]);
}

#[test]
#[serial]
fn invalid_environment_values_are_rejected() {
    let _guard = EnvGuard(&["BROKEN_MINSIZE", "BROKEN_MAXSIZE"]);
    env::set_var("BROKEN_MINSIZE", "8");
    env::set_var("BROKEN_MAXSIZE", "4");

    let err = ContainerConfig::from_env("broken").unwrap_err();
    assert!(matches!(err, ContainerError::InvalidConfig(_)));
}

// ===== Properties =====

#[test]
fn property_keys_are_case_insensitive() {
    let mut props = ServiceProperties::new();
    props.set("MAXSIZE", "6").set("minsize", "2").set("IdleTimeout", "30s").set("MaxAge", "5 minutes");

    let config = PoolConfig::from_properties(&props).unwrap();
    assert_eq!(config.max_size, 6);
    assert_eq!(config.min_size, 2);
    assert_eq!(config.idle_timeout, Duration::from_secs(30));
    assert_eq!(config.max_age, Duration::from_secs(300));
}

#[test]
fn idle_timeout_longer_than_max_age_is_rejected() {
    let mut props = ServiceProperties::new();
    props.set("MaxAge", "1 minute").set("IdleTimeout", "2 minutes");
    assert!(matches!(PoolConfig::from_properties(&props), Err(ContainerError::InvalidConfig(_))));
}

#[test]
fn malformed_numbers_are_reported() {
    let mut props = ServiceProperties::new();
    props.set("MaxSize", "lots");
    assert!(PoolConfig::from_properties(&props).is_err());
}

#[test]
fn container_properties_parse_fault_class() {
    let mut props = ServiceProperties::new();
    props.set("DefaultFaultClass", "System").set("ShutdownTimeout", "1500");
    let config = ContainerConfig::from_properties(&props).unwrap();
    assert_eq!(config.default_fault_class, FaultClass::System);
    assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));

    props.set("DefaultFaultClass", "catastrophic");
    assert!(ContainerConfig::from_properties(&props).is_err());
}

// ===== Durations =====

#[test]
fn duration_strings() {
    assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("500 milliseconds").unwrap(), Duration::from_millis(500));
    assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
    assert_eq!(parse_duration("5 minutes").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1 hour and 30 minutes").unwrap(), Duration::from_secs(5400));
    assert!(parse_duration("soon").is_err());
    assert!(parse_duration("").is_err());
}

#[test]
fn config_values_convert_by_kind() {
    assert_eq!(ConfigValue::Integer(12).as_i64().unwrap(), 12);
    assert!(ConfigValue::Boolean(true).as_bool().unwrap());
    assert_eq!(ConfigValue::Integer(1500).as_duration().unwrap(), Duration::from_millis(1500));
    assert_eq!(ConfigValue::String("3 seconds".into()).as_duration().unwrap(), Duration::from_secs(3));

    assert!(matches!(ConfigValue::Integer(-1).as_duration(), Err(ContainerError::InvalidConfig(_))));
    assert!(ConfigValue::String("yes".into()).as_bool().is_err());
    assert!(ConfigValue::Float(0.5).as_i64().is_err());
}

// ===== JSON =====

#[cfg(feature = "config")]
#[test]
fn json_overrides_keep_defaults() {
    let config = ContainerConfig::from_json(
        r#"{
            "default_fault_class": "system",
            "pool": { "max_size": 3, "access_timeout": "750 milliseconds", "idle_timeout": 1000 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.default_fault_class, FaultClass::System);
    assert_eq!(config.pool.max_size, 3);
    assert_eq!(config.pool.access_timeout, Duration::from_millis(750));
    assert_eq!(config.pool.idle_timeout, Duration::from_secs(1));
    assert!(config.pool.strict);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
}

#[cfg(feature = "config")]
#[test]
fn json_with_invalid_pool_is_rejected() {
    let err = ContainerConfig::from_json(r#"{ "pool": { "max_size": 0 } }"#).unwrap_err();
    assert!(matches!(err, ContainerError::InvalidConfig(_)));
}
