//! Config loading and defaults integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use chain_steward::config::{Config, ConfigError};
use chain_steward::node::STOP_GRACE_PERIOD;
use tempfile::TempDir;

#[test]
fn test_default_config_values() {
    let config = Config::default();

    assert!(config.steward.data_dir.ends_with(".chain-steward"));
    assert_eq!(config.steward.moniker, "chain-steward");
    assert!(!config.steward.include_testnets);

    assert_eq!(config.supervisor.stop_grace(), Duration::from_secs(10));
    assert_eq!(config.supervisor.stop_grace(), STOP_GRACE_PERIOD);
    assert_eq!(config.supervisor.reap_interval(), Duration::from_secs(1));

    assert_eq!(config.build.git, "git");
    assert_eq!(config.build.go, "go");
    assert_eq!(config.build.make, "make");
    assert!(config.build.gopath.is_none());

    assert_eq!(config.state_sync.trust_offset, 2000);
    assert_eq!(config.state_sync.discovery_time, "30s");
    assert_eq!(config.gas.default_minimum_gas_price, "0.0025stake");

    assert_eq!(config.logs.max_chars, 200_000);
    assert_eq!(config.logs.retain_chars, 190_000);

    assert!(config.api.enabled);
    assert_eq!(config.api.http_port, 8080);
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
[steward]
data_dir = "/var/lib/chain-steward"
registry_path = "/srv/chain-registry"
moniker = "rack-07"
include_testnets = true

[supervisor]
stop_grace_secs = 30
reap_interval_secs = 5

[build]
git = "/usr/local/bin/git"
go = "/usr/local/go/bin/go"
make = "gmake"
gopath = "/opt/gopath"

[state_sync]
trust_offset = 500
discovery_time = "45s"
rpc_timeout_secs = 10

[gas]
default_minimum_gas_price = "0.01uatom"

[logs]
max_chars = 1000
retain_chars = 800

[api]
enabled = false
http_port = 9090
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");

    assert_eq!(config.steward.data_dir, PathBuf::from("/var/lib/chain-steward"));
    assert_eq!(config.steward.registry_path, PathBuf::from("/srv/chain-registry"));
    assert_eq!(config.steward.moniker, "rack-07");
    assert!(config.steward.include_testnets);

    assert_eq!(config.supervisor.stop_grace(), Duration::from_secs(30));
    assert_eq!(config.supervisor.reap_interval(), Duration::from_secs(5));

    assert_eq!(config.build.make, "gmake");
    assert_eq!(config.build.gopath, Some(PathBuf::from("/opt/gopath")));
    assert_eq!(config.build.gopath_bin(), PathBuf::from("/opt/gopath/bin"));

    assert_eq!(config.state_sync.trust_offset, 500);
    assert_eq!(config.state_sync.rpc_timeout_secs, 10);
    assert_eq!(config.gas.default_minimum_gas_price, "0.01uatom");
    assert_eq!(config.logs.max_chars, 1000);
    assert!(!config.api.enabled);
    assert_eq!(config.api.http_port, 9090);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config: Config = toml::from_str(
        r#"
[supervisor]
stop_grace_secs = 3
"#,
    )
    .expect("valid TOML");

    assert_eq!(config.supervisor.stop_grace(), Duration::from_secs(3));
    assert_eq!(config.supervisor.reap_interval(), Duration::from_secs(1));
    assert_eq!(config.state_sync.trust_offset, 2000);
    assert_eq!(config.api.http_port, 8080);
}

#[test]
fn test_zero_reap_interval_is_clamped() {
    let config: Config = toml::from_str("[supervisor]\nreap_interval_secs = 0\n").unwrap();
    assert_eq!(config.supervisor.reap_interval(), Duration::from_secs(1));
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let config = Config::load(Path::new("/nonexistent/path/to/chain-steward.toml")).unwrap();
    assert_eq!(config.api.http_port, 8080);
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chain-steward.toml");
    std::fs::write(&path, "[steward]\nmoniker = \"from-file\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.steward.moniker, "from-file");
}

#[test]
fn test_invalid_toml_returns_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "this is not valid { toml }}}").unwrap();

    let result = Config::load(&path);
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn test_default_data_dir_is_absolute_without_home() {
    let saved = std::env::var_os("HOME");
    std::env::remove_var("HOME");
    let data_dir = Config::default().steward.data_dir;
    if let Some(home) = saved {
        std::env::set_var("HOME", home);
    }

    assert!(data_dir.is_absolute(), "{}", data_dir.display());
    assert!(data_dir.ends_with(".chain-steward"));
}
