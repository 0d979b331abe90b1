// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) {
    std::fs::write(dir.path().join("config.toml"), body).unwrap();
}

#[test]
#[serial]
fn defaults_apply_with_a_minimal_file() {
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
            [gce]
            project = "proj-1"
            zone = "us-central1-a"
            bucket = "fleet-artifacts"
        "#,
    );

    let cfg = Config::load(dir.path().to_path_buf()).unwrap();
    assert_eq!(cfg.backend, Backend::Gce);
    assert_eq!(cfg.poll_interval_ms, 15_000);
    assert_eq!(cfg.heartbeat_grace_ms, 600_000);
    assert_eq!(cfg.create_retries, 3);
    assert_eq!(cfg.socket_path, dir.path().join("fleetd.sock"));
    assert_eq!(cfg.registry_dir, dir.path().join("registry"));
    assert_eq!(cfg.optional_secrets, vec!["github-token".to_string()]);
}

#[test]
#[serial]
fn auth_secret_is_always_required() {
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
            required_secrets = ["anthropic-api-key"]

            [gce]
            project = "p"
            zone = "z"
            bucket = "b"
        "#,
    );

    let cfg = Config::load(dir.path().to_path_buf()).unwrap();
    assert!(cfg.required_secrets.iter().any(|n| n == AUTH_SECRET));
    // Not duplicated when already listed.
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
            required_secrets = ["anthropic-api-key", "fleet-auth-token"]

            [gce]
            project = "p"
            zone = "z"
            bucket = "b"
        "#,
    );
    let cfg = Config::load(dir.path().to_path_buf()).unwrap();
    assert_eq!(cfg.required_secrets.iter().filter(|n| *n == AUTH_SECRET).count(), 1);
}

#[test]
#[serial]
fn kubernetes_backend_parses_its_section() {
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
            backend = "kubernetes"
            poll_interval_ms = 5000
            control_plane_url = "http://10.0.0.1:7777"

            [k8s]
            namespace = "agents"
            image = "fleet-agent:latest"
        "#,
    );

    let cfg = Config::load(dir.path().to_path_buf()).unwrap();
    assert_eq!(cfg.backend, Backend::Kubernetes);
    assert_eq!(cfg.poll_interval_ms, 5000);
    assert_eq!(cfg.control_plane_url, "http://10.0.0.1:7777");
    let k8s = cfg.k8s.as_ref().unwrap();
    assert_eq!(k8s.namespace, "agents");
    assert_eq!(k8s.image, "fleet-agent:latest");
    assert_eq!(cfg.objects_dir(), dir.path().join("objects"));
}

#[test]
#[serial]
fn missing_backend_section_is_rejected() {
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    let dir = TempDir::new().unwrap();
    write_config(&dir, r#"backend = "kubernetes""#);
    assert!(matches!(
        Config::load(dir.path().to_path_buf()),
        Err(ConfigError::MissingBackendSection(Backend::Kubernetes))
    ));

    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Config::load(dir.path().to_path_buf()),
        Err(ConfigError::MissingBackendSection(Backend::Gce))
    ));
}

#[test]
#[serial]
fn env_overrides_poll_interval() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
            poll_interval_ms = 60000

            [gce]
            project = "p"
            zone = "z"
            bucket = "b"
        "#,
    );

    std::env::set_var("FLEET_POLL_INTERVAL_MS", "250");
    let cfg = Config::load(dir.path().to_path_buf()).unwrap();
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    assert_eq!(cfg.poll_interval_ms, 250);
}

#[test]
#[serial]
fn malformed_toml_is_a_parse_error() {
    std::env::remove_var("FLEET_POLL_INTERVAL_MS");
    let dir = TempDir::new().unwrap();
    write_config(&dir, "backend = [not toml");
    assert!(matches!(Config::load(dir.path().to_path_buf()), Err(ConfigError::Parse(_))));
}
