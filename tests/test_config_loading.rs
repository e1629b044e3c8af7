//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use mqtt_rpc_bridge::config::{ConfigError, GatewayConfig};
use mqtt_rpc_bridge::rpc::DispatcherSettings;
use mqtt_rpc_bridge::transport::DeliveryGuarantee;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "dentistimo"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "MQTT_USER"
password_env = "MQTT_PASS"
client_id_prefix = "gw"
qos = "at_most_once"
keep_alive_secs = 30

[rpc]
default_timeout_ms = 3000
subscribe_timeout_ms = 1500

[health]
enabled = false
port = 9090
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.gateway.id, "api-gateway");
    assert_eq!(config.gateway.domain, "dentistimo");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USER"));
    assert_eq!(config.mqtt.password_env.as_deref(), Some("MQTT_PASS"));
    assert_eq!(config.client_id_prefix(), "gw");
    assert_eq!(config.mqtt.qos, DeliveryGuarantee::AtMostOnce);
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.rpc.default_timeout(), Duration::from_millis(3000));
    assert_eq!(config.rpc.subscribe_timeout(), Duration::from_millis(1500));
    assert!(!config.health.enabled);
    assert_eq!(config.health.port, 9090);
}

#[test]
fn test_config_defaults_for_optional_sections() {
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "dentistimo"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.client_id_prefix(), "api-gateway");
    assert_eq!(config.mqtt.qos, DeliveryGuarantee::AtLeastOnce);
    assert_eq!(config.rpc.default_timeout(), Duration::from_secs(5));
    assert!(config.health.enabled);
    assert_eq!(config.health.port, 8080);
}

#[test]
fn test_dispatcher_settings_follow_config() {
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "clinic/eu"

[mqtt]
broker_url = "mqtt://localhost:1883"
qos = "at_most_once"

[rpc]
default_timeout_ms = 750
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();
    let settings = DispatcherSettings::from_config(&config);

    assert_eq!(settings.domain, "clinic/eu");
    assert_eq!(settings.default_timeout, Duration::from_millis(750));
    assert_eq!(settings.guarantee, DeliveryGuarantee::AtMostOnce);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = GatewayConfig::load_from_file(std::path::Path::new("/nonexistent/gateway.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[gateway\nid = ");
    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section_fails() {
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "dentistimo"
"#,
    );
    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        ("bad id!", "dentistimo", "5000"),
        ("api-gateway", "dentistimo/#", "5000"),
        ("api-gateway", "", "5000"),
        ("api-gateway", "dentistimo", "0"),
    ];

    for (id, domain, timeout) in cases {
        let temp_file = write_config(&format!(
            r#"
[gateway]
id = "{id}"
domain = "{domain}"

[mqtt]
broker_url = "mqtt://localhost:1883"

[rpc]
default_timeout_ms = {timeout}
"#
        ));
        assert!(
            GatewayConfig::load_from_file(temp_file.path()).is_err(),
            "config with id={id:?} domain={domain:?} timeout={timeout} should be rejected"
        );
    }
}

#[test]
fn test_credentials_resolve_from_named_env_vars() {
    std::env::set_var("RPC_BRIDGE_TEST_USER", "gateway-user");
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "dentistimo"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "RPC_BRIDGE_TEST_USER"
password_env = "RPC_BRIDGE_TEST_PASS_UNSET"
"#,
    );

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.get_mqtt_username().as_deref(), Some("gateway-user"));
    assert_eq!(config.get_mqtt_password(), None);
}

#[test]
fn test_config_round_trips_through_show() {
    let temp_file = write_config(
        r#"
[gateway]
id = "api-gateway"
domain = "dentistimo"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );
    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = GatewayConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
