//! Configuration loading and priority resolution
//!
//! Uses serial_test: tests that touch POLYCITY_* environment variables run
//! one at a time.

use polycity_common::config::{
    load_toml_config, resolve_optional, resolve_store_path, write_toml_config, TomlConfig,
    ENV_CONFIG_PATH, ENV_STORE_PATH,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_toml_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_malformed_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("polycity.toml");
    std::fs::write(&path, "store_path = [not toml").unwrap();
    assert!(load_toml_config(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_config_path_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    let mut config = TomlConfig::default();
    config.workers.convert = 7;
    write_toml_config(&config, &path).unwrap();

    env::set_var(ENV_CONFIG_PATH, &path);
    let loaded = load_toml_config(None);
    env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(loaded.unwrap().workers.convert, 7);
}

#[test]
#[serial]
fn test_store_path_priority() {
    let mut toml = TomlConfig::default();
    toml.store_path = Some(PathBuf::from("/toml/store.db"));

    env::set_var(ENV_STORE_PATH, "/env/store.db");
    assert_eq!(
        resolve_store_path(Some(Path::new("/cli/store.db")), &toml),
        PathBuf::from("/cli/store.db")
    );
    assert_eq!(resolve_store_path(None, &toml), PathBuf::from("/env/store.db"));

    env::remove_var(ENV_STORE_PATH);
    assert_eq!(resolve_store_path(None, &toml), PathBuf::from("/toml/store.db"));

    let fallback = resolve_store_path(None, &TomlConfig::default());
    assert!(fallback.ends_with("coordination.db"));
}

#[test]
#[serial]
fn test_optional_setting_priority_skips_blank_values() {
    env::set_var("POLYCITY_TEST_KEY", "from-env");
    assert_eq!(
        resolve_optional(Some("from-cli"), "POLYCITY_TEST_KEY", Some("from-toml")).as_deref(),
        Some("from-cli")
    );
    assert_eq!(
        resolve_optional(Some("  "), "POLYCITY_TEST_KEY", Some("from-toml")).as_deref(),
        Some("from-env")
    );

    env::remove_var("POLYCITY_TEST_KEY");
    assert_eq!(
        resolve_optional(None, "POLYCITY_TEST_KEY", Some("from-toml")).as_deref(),
        Some("from-toml")
    );
    assert_eq!(resolve_optional(None, "POLYCITY_TEST_KEY", Some("")), None);
}
