//! Loading provider settings from the environment and templates from disk.

use std::time::Duration;

use camino::Utf8PathBuf;
use kiln::config::DEFAULT_ENDPOINT;
use kiln::test_support::EnvGuard;
use kiln::{BuildConfig, ConfigError, ProviderConfig, SshConfig};
use tempfile::TempDir;

fn isolated_home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn home_str(home: &TempDir) -> String {
    home.path()
        .to_str()
        .unwrap_or_else(|| panic!("temp path should be utf8: {}", home.path().display()))
        .to_owned()
}

#[tokio::test]
async fn provider_settings_come_from_hcloud_variables() {
    let home = isolated_home();
    let home_path = home_str(&home);
    let _guard = EnvGuard::set_vars(&[
        ("HOME", Some(home_path.as_str())),
        ("XDG_CONFIG_HOME", Some(home_path.as_str())),
        ("HCLOUD_TOKEN", Some("hc-token-example")),
        ("HCLOUD_POLL_INTERVAL_MS", Some("250")),
        ("HCLOUD_ENDPOINT", None),
    ])
    .await;

    let config = ProviderConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("provider config loads: {err}"));

    assert_eq!(config.token, "hc-token-example");
    assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    config
        .validate()
        .unwrap_or_else(|err| panic!("loaded config validates: {err}"));
}

#[tokio::test]
async fn ssh_settings_fall_back_to_defaults() {
    let home = isolated_home();
    let home_path = home_str(&home);
    let _guard = EnvGuard::set_vars(&[
        ("HOME", Some(home_path.as_str())),
        ("XDG_CONFIG_HOME", Some(home_path.as_str())),
        ("KILN_SSH_USER", Some("builder")),
        ("KILN_SSH_PORT", None),
    ])
    .await;

    let config =
        SshConfig::load_without_cli_args().unwrap_or_else(|err| panic!("ssh config loads: {err}"));

    assert_eq!(config.user, "builder");
    assert_eq!(config.port, 22);
    assert_eq!(config.ssh_bin, "ssh");
}

#[test]
fn template_file_loads_with_generated_names() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(dir.path().join("web.json"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    std::fs::write(
        &path,
        r#"{
            "location": "hel1",
            "server_type": "cax11",
            "image_filter": {"with_selector": ["os=debian"], "most_recent": true},
            "snapshot_labels": {"role": "web"},
            "provisioners": ["apt-get update"]
        }"#,
    )
    .unwrap_or_else(|err| panic!("write template: {err}"));

    let config = BuildConfig::load(&path).unwrap_or_else(|err| panic!("template loads: {err}"));

    assert!(config.server_name.starts_with("kiln-"));
    assert!(config.snapshot_name.starts_with("kiln-"));
    assert_eq!(config.image, None);
    assert_eq!(config.snapshot_labels.get("role").map(String::as_str), Some("web"));
    assert_eq!(config.provisioners, vec![String::from("apt-get update")]);
}

#[test]
fn template_problems_are_reported_together() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(dir.path().join("broken.json"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    std::fs::write(
        &path,
        r#"{
            "server_type": "cx22",
            "image": "debian-12",
            "image_filter": {"with_selector": ["a=b"]}
        }"#,
    )
    .unwrap_or_else(|err| panic!("write template: {err}"));

    let err = BuildConfig::load(&path).expect_err("template is invalid");

    let ConfigError::Invalid { ref problems } = err else {
        panic!("expected aggregated validation error, got {err}");
    };
    assert_eq!(problems.first().map(String::as_str), Some("location is required"));
    assert_eq!(problems.len(), 2, "unexpected problems: {problems:?}");
}
