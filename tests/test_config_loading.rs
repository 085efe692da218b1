//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use mqtt_agent::config::{AgentConfig, ConfigError, EnqueuePolicy};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[agent]
max_connections = 4
pending_acks_max = 8
subscriptions_max = 3
queue_capacity = 50
queue_wait_ms = 250
process_loop_timeout_ms = 20
enqueue_policy = "block"
enqueue_block_ms = 500

[mqtt]
broker_url = "mqtt://broker.local:1884"
client_id = "gateway-1"
keep_alive_secs = 30
clean_session = false
connect_timeout_ms = 2000
network_buffer_size = 4096
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.agent.max_connections, 4);
    assert_eq!(config.agent.pending_acks_max, 8);
    assert_eq!(config.agent.subscriptions_max, 3);
    assert_eq!(config.agent.queue_capacity, 50);
    assert_eq!(config.agent.queue_wait(), Duration::from_millis(250));
    assert_eq!(config.agent.process_loop_timeout(), Duration::from_millis(20));
    assert_eq!(config.agent.enqueue_policy, EnqueuePolicy::Block);
    assert_eq!(config.agent.enqueue_block(), Duration::from_millis(500));
    assert_eq!(config.mqtt.broker_url, "mqtt://broker.local:1884");
    assert_eq!(config.mqtt.client_id.as_deref(), Some("gateway-1"));
    assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));
    assert!(!config.mqtt.clean_session);
    assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(2));
    assert_eq!(config.mqtt.network_buffer_size, 4096);
}

#[test]
fn test_config_applies_defaults_when_agent_section_missing() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.agent.max_connections, 2);
    assert_eq!(config.agent.pending_acks_max, 20);
    assert_eq!(config.agent.subscriptions_max, 10);
    assert_eq!(config.agent.queue_capacity, 25);
    assert_eq!(config.agent.queue_wait(), Duration::from_secs(1));
    assert_eq!(config.agent.process_loop_timeout(), Duration::ZERO);
    assert_eq!(config.agent.enqueue_policy, EnqueuePolicy::FailFast);
    assert_eq!(config.agent.subscription_filter_max_len, 100);
    assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(60));
    assert!(config.mqtt.clean_session);
    assert_eq!(config.mqtt.network_buffer_size, 1024);
    assert!(config.mqtt.client_id.is_none());
}

#[test]
fn test_config_generates_client_id_when_absent() {
    let config = AgentConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    )
    .unwrap();

    let first = config.mqtt.client_id_or_generate();
    let second = config.mqtt.client_id_or_generate();

    assert!(first.starts_with("mqtt-agent-"));
    assert_ne!(first, second);
}

#[test]
fn test_config_returns_error_when_mqtt_section_missing() {
    let temp_file = write_config(
        r#"
[agent]
queue_capacity = 10
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_invalid_toml_syntax() {
    let temp_file = write_config("[mqtt\nbroker_url = ");

    let result = AgentConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_unknown_enqueue_policy() {
    let result = AgentConfig::from_toml_str(
        r#"
[agent]
enqueue_policy = "drop_oldest"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_missing_file() {
    let result = AgentConfig::load_from_file(Path::new("/nonexistent/agent.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_rejects_zero_capacities() {
    for field in [
        "max_connections",
        "pending_acks_max",
        "subscriptions_max",
        "queue_capacity",
        "subscription_filter_max_len",
    ] {
        let content = format!(
            "[agent]\n{field} = 0\n\n[mqtt]\nbroker_url = \"mqtt://localhost:1883\"\n"
        );

        let result = AgentConfig::from_toml_str(&content);

        assert!(
            matches!(&result, Err(ConfigError::InvalidConfig(message)) if message.contains(field)),
            "{field} = 0 should be rejected, got {result:?}"
        );
    }
}

#[test]
fn test_config_rejects_empty_broker_url() {
    let result = AgentConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "  "
"#,
    );

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_tiny_network_buffer() {
    let result = AgentConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
network_buffer_size = 8
"#,
    );

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_credentials_resolved_from_environment() {
    let config = AgentConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "MQTT_AGENT_IT_USER"
password_env = "MQTT_AGENT_IT_PASS"
"#,
    )
    .unwrap();

    std::env::set_var("MQTT_AGENT_IT_USER", "device");
    std::env::set_var("MQTT_AGENT_IT_PASS", "hunter2");

    assert_eq!(config.get_mqtt_username().as_deref(), Some("device"));
    assert_eq!(config.get_mqtt_password().as_deref(), Some("hunter2"));
    assert_eq!(
        config.resolve_credentials().unwrap(),
        Some(("device".to_string(), "hunter2".to_string()))
    );

    std::env::remove_var("MQTT_AGENT_IT_USER");
    std::env::remove_var("MQTT_AGENT_IT_PASS");
}

#[test]
fn test_missing_credential_env_var_is_reported() {
    let config = AgentConfig::from_toml_str(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "MQTT_AGENT_IT_UNSET_USER"
"#,
    )
    .unwrap();

    let result = config.resolve_credentials();

    assert!(matches!(
        result,
        Err(ConfigError::EnvVarNotFound(name)) if name == "MQTT_AGENT_IT_UNSET_USER"
    ));
}

#[test]
fn test_config_round_trips_through_toml() {
    let original = AgentConfig::from_toml_str(
        r#"
[agent]
queue_capacity = 7

[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "round-trip"
"#,
    )
    .unwrap();

    let rendered = toml::to_string_pretty(&original).unwrap();
    let reparsed = AgentConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(reparsed, original);
}
