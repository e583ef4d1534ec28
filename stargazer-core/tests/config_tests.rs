//! Configuration loading, validation and discovery integration tests.
//! Every test passes an explicit env lookup so the process environment never leaks in.

use std::collections::HashMap;
use std::time::Duration;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use stargazer_core::{
    config::{self, list_config_files, DEFAULT_AGENT_TYPE, DEFAULT_BASE_URL, DEFAULT_RETRY_COUNT},
    discover, load_system_config_with_env, BrokerAuth, ConfigError, PrefixFormat, SyncDirection,
};

const FULL: &str = r#"
sync:
  direction: broker_to_directory
  intervalSeconds: 15
  heartbeatSeconds: 45
directory:
  baseUrl: http://127.0.0.1:8080/hypermedia/
  apiKey: api-key-123
  agentId: agent-id-123
  middlewareId: middleware-id-123
broker:
  bootstrapServers:
    - 127.0.0.1:9092
  auth:
    plain:
      username: svc
      password: pw
"#;

fn no_env(_: &str) -> Option<String> {
    None
}

// ---------------------------------------------------------------------------
// 1. Successful load
// ---------------------------------------------------------------------------

#[test]
fn loads_full_unit() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("billing.yaml");
    file.write_str(FULL).expect("write");

    let cfg = load_system_config_with_env(file.path(), &no_env).expect("load");
    assert_eq!(cfg.name(), "billing");
    assert_eq!(cfg.direction, SyncDirection::BrokerToDirectory);
    assert_eq!(cfg.sync_interval, Duration::from_secs(15));
    assert_eq!(cfg.heartbeat_interval, Duration::from_secs(45));
    assert_eq!(cfg.directory.base_url, "http://127.0.0.1:8080/hypermedia");
    assert_eq!(cfg.directory.retry_count, DEFAULT_RETRY_COUNT);
    assert_eq!(cfg.agent_type, DEFAULT_AGENT_TYPE);
    assert_eq!(cfg.prefix_format, PrefixFormat::default());
    assert_eq!(cfg.broker.bootstrap_servers, vec!["127.0.0.1:9092"]);
    assert_eq!(
        cfg.broker.auth,
        BrokerAuth::Plain {
            username: "svc".into(),
            password: "pw".into()
        }
    );
}

#[test]
fn defaults_fill_optional_keys() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("minimal.yml");
    file.write_str(
        "sync: {direction: directory_to_broker}\n\
         directory: {apiKey: k, agentId: a, middlewareId: m}\n\
         broker: {bootstrapServers: [\"b:9092\"]}\n",
    )
    .expect("write");

    let cfg = load_system_config_with_env(file.path(), &no_env).expect("load");
    assert_eq!(cfg.directory.base_url, DEFAULT_BASE_URL);
    assert_eq!(cfg.sync_interval, config::DEFAULT_SYNC_INTERVAL);
    assert_eq!(cfg.broker.auth, BrokerAuth::None);
}

#[test]
fn custom_prefix_format_is_read() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("ax.yaml");
    file.write_str(
        "sync:\n  direction: broker_to_directory\n  prefixFormat: {length: 3, start: a}\n\
         directory: {apiKey: k, agentId: a, middlewareId: m}\n\
         broker: {bootstrapServers: [\"b:9092\"]}\n",
    )
    .expect("write");

    let cfg = load_system_config_with_env(file.path(), &no_env).expect("load");
    assert_eq!(cfg.prefix_format.length, 3);
    assert_eq!(cfg.prefix_format.start, "a");
    assert_eq!(cfg.prefix_format.end, ".", "unset marker keeps its default");
}

#[test]
fn env_supplies_secrets_missing_from_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("secretless.yaml");
    file.write_str(
        "sync: {direction: broker_to_directory}\n\
         directory: {agentId: a, middlewareId: m}\n\
         broker: {bootstrapServers: [\"b:9092\"]}\n",
    )
    .expect("write");

    let env: HashMap<&str, &str> = [
        ("DIRECTORY_APIKEY", "env-key"),
        ("BROKER_AUTH_OAUTH_TOKEN", "env-token"),
    ]
    .into_iter()
    .collect();
    let cfg = load_system_config_with_env(file.path(), &|k| env.get(k).map(|v| v.to_string()))
        .expect("load");
    assert_eq!(cfg.directory.api_key, "env-key");
    assert_eq!(
        cfg.broker.auth,
        BrokerAuth::OAuth {
            token: "env-token".into()
        }
    );
}

// ---------------------------------------------------------------------------
// 2. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("broken.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("broken.yaml"));
}

#[test]
fn missing_key_is_named() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("nokey.yaml");
    file.write_str(
        "sync: {direction: broker_to_directory}\n\
         directory: {apiKey: k, agentId: a}\n\
         broker: {bootstrapServers: [\"b:9092\"]}\n",
    )
    .expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingKey { key: "directory.middlewareId", .. }),
        "got: {err}"
    );
}

#[test]
fn empty_file_reports_first_missing_key() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("empty.yaml");
    file.write_str("").expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingKey { key: "sync.direction", .. }),
        "got: {err}"
    );
}

#[test]
fn unknown_direction_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("dir.yaml");
    file.write_str(&FULL.replace("broker_to_directory", "kafka_to_starlify"))
        .expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDirection { .. }), "got: {err}");
    assert!(err.to_string().contains("kafka_to_starlify"));
}

#[test]
fn zero_interval_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("zero.yaml");
    file.write_str(&FULL.replace("intervalSeconds: 15", "intervalSeconds: 0"))
        .expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(
        matches!(err, ConfigError::InvalidValue { key: "sync.intervalSeconds", .. }),
        "got: {err}"
    );
}

#[test]
fn prefix_format_with_conflicting_markers_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("tiny.yaml");
    file.write_str(&FULL.replace(
        "  heartbeatSeconds: 45\n",
        "  heartbeatSeconds: 45\n  prefixFormat: {length: 1, start: e, end: \".\"}\n",
    ))
    .expect("write");

    let err = load_system_config_with_env(file.path(), &no_env).unwrap_err();
    assert!(
        matches!(err, ConfigError::InvalidValue { key: "sync.prefixFormat", .. }),
        "got: {err}"
    );
}

// ---------------------------------------------------------------------------
// 3. Discovery
// ---------------------------------------------------------------------------

#[test]
fn discover_single_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("one.yaml");
    file.write_str(FULL).expect("write");

    let found = discover(file.path()).expect("discover");
    assert_eq!(found, vec![file.path().to_path_buf()]);
}

#[test]
fn discover_directory_is_sorted_and_filtered() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("zeta.yaml").write_str(FULL).expect("write");
    dir.child("alpha.yml").write_str(FULL).expect("write");
    dir.child("README.md").write_str("# notes").expect("write");
    dir.child("nested").create_dir_all().expect("mkdir");
    dir.child("nested/inner.yaml").write_str(FULL).expect("write");

    let found = discover(dir.path()).expect("discover");
    let names: Vec<_> = found
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["alpha.yml", "zeta.yaml"]);
}

#[test]
fn discover_missing_path_errors() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = discover(&dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }));
    assert!(err.to_string().contains("nope"));
}

#[test]
fn discover_empty_directory_errors_but_listing_does_not() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("notes.txt").write_str("x").expect("write");

    let err = discover(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Empty { .. }));
    assert!(list_config_files(dir.path()).expect("list").is_empty());
    dir.child("notes.txt").assert(predicate::path::exists());
}
