use std::sync::Mutex;

use tempfile::NamedTempFile;

use sitewatch_kernel::config::SitewatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SITEWATCH_CONFIG",
        "SITEWATCH_DB_PATH",
        "SITEWATCH_MEDIA_DIR",
        "SITEWATCH_ZONES_PATH",
        "SITEWATCH_MODEL_PATH",
        "SITEWATCH_CONFIDENCE_THRESHOLD",
        "SITEWATCH_SOURCE_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "floor3.db",
        "media_dir": "/var/lib/sitewatch/media",
        "zones_path": "/etc/sitewatch/zones.json",
        "cameras": [
            { "id": "dock-north", "url": "stub://dock", "target_fps": 15, "width": 1280, "height": 720 },
            { "id": "press-line" }
        ],
        "engine": {
            "model_path": "/opt/models/person.onnx",
            "input_size": 416,
            "confidence_threshold": 0.6,
            "class_names": ["person", "forklift"]
        },
        "suppression_window_ms": 2500,
        "features": {
            "privacy_blur": { "enabled": false }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SITEWATCH_CONFIG", file.path());
    std::env::set_var("SITEWATCH_DB_PATH", "override.db");
    std::env::set_var("SITEWATCH_CONFIDENCE_THRESHOLD", "0.75");

    let cfg = SitewatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.media_dir, "/var/lib/sitewatch/media");
    assert_eq!(
        cfg.zones_path.as_deref().unwrap().to_str().unwrap(),
        "/etc/sitewatch/zones.json"
    );

    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].id, "dock-north");
    assert_eq!(cfg.cameras[0].url, "stub://dock");
    assert_eq!(cfg.cameras[0].target_fps, 15);
    assert_eq!(cfg.cameras[0].width, 1280);
    // Unspecified camera fields fall back to defaults.
    assert_eq!(cfg.cameras[1].id, "press-line");
    assert!(cfg.cameras[1].url.starts_with("stub://"));
    assert_eq!(cfg.cameras[1].width, 640);

    assert_eq!(
        cfg.engine.model_path.as_deref().unwrap().to_str().unwrap(),
        "/opt/models/person.onnx"
    );
    assert_eq!(cfg.engine.input_size, 416);
    assert!((cfg.engine.confidence_threshold - 0.75).abs() < 1e-6);
    assert_eq!(cfg.engine.class_names, vec!["person", "forklift"]);

    assert_eq!(cfg.suppression_window_ms, 2500);
    assert!(!cfg.features["privacy_blur"].enabled);

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SitewatchConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "sitewatch.db");
    assert_eq!(cfg.cameras.len(), 1);
    assert!(cfg.cameras[0].url.starts_with("stub://"));
    assert!(cfg.engine.model_path.is_none());
    assert_eq!(cfg.engine.class_names, vec!["person"]);

    clear_env();
}

#[test]
fn invalid_configs_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for bad in [
        r#"{ "cameras": [] }"#,
        r#"{ "cameras": [ { "id": "a" }, { "id": "a" } ] }"#,
        r#"{ "cameras": [ { "id": "a", "width": 0 } ] }"#,
        r#"{ "engine": { "confidence_threshold": 1.5 } }"#,
        r#"{ "engine": { "input_size": 0 } }"#,
    ] {
        let mut file = NamedTempFile::new().expect("temp config");
        std::io::Write::write_all(&mut file, bad.as_bytes()).expect("write config");
        std::env::set_var("SITEWATCH_CONFIG", file.path());
        assert!(SitewatchConfig::load().is_err(), "accepted bad config: {bad}");
    }

    clear_env();
}
