use super::*;
use serde_json::json;
use std::path::Path;

fn base_registry() -> ParameterRegistry {
    let mut registry = ParameterRegistry::new();
    register_base_options(&mut registry);
    register_system_options(&mut registry);
    registry
}

fn minimal_raw() -> RawParameters {
    let mut raw = RawParameters::new();
    raw.set("CASE", "data");
    raw.set("MODEL_INIT", "models/init");
    raw.set("DATA", "/archive/data");
    raw
}

#[test]
fn test_resolve_applies_defaults_and_paths() {
    let registry = base_registry();
    let params = registry
        .resolve(&minimal_raw(), Path::new("/runs/a"))
        .unwrap();

    assert_eq!(params.get_str("CASE"), Some("data"));
    assert!(params.get_bool("SAVEMODEL"));
    assert!(!params.get_bool("SAVEKERNELS"));
    assert_eq!(params.get_int("NTASK"), Some(1));
    assert_eq!(params.get_path("WORKDIR"), Some(Path::new("/runs/a")));
    assert_eq!(params.get_path("SCRATCH"), Some(Path::new("/runs/a/scratch")));
    assert_eq!(
        params.get_path("MODEL_INIT"),
        Some(Path::new("/runs/a/models/init"))
    );
    assert_eq!(params.get_path("DATA"), Some(Path::new("/archive/data")));
    assert!(params.get_str("RESUME_FROM").is_none());
}

#[test]
fn test_relative_workdir_anchors_other_paths() {
    let registry = base_registry();
    let mut raw = minimal_raw();
    raw.set("WORKDIR", "campaign");

    let params = registry.resolve(&raw, Path::new("/home/user")).unwrap();
    assert_eq!(
        params.get_path("OUTPUT"),
        Some(Path::new("/home/user/campaign/output"))
    );
}

#[test]
fn test_validate_reports_every_problem() {
    let registry = base_registry();
    let mut raw = RawParameters::new();
    raw.set("NTASK", "many");
    raw.set("SAVEMODEL", "perhaps");

    let err = registry.validate(&raw, Path::new("/tmp")).unwrap_err();
    assert!(err.is_configuration());
    let message = err.to_string();
    assert!(message.contains("4 parameter problem(s)"), "{}", message);
    assert!(message.contains("CASE: required parameter is not set"));
    assert!(message.contains("MODEL_INIT: required path is not set"));
    assert!(message.contains("NTASK: expected integer"));
    assert!(message.contains("SAVEMODEL: expected boolean"));
}

#[test]
fn test_cross_checks_run_after_types() {
    let registry = base_registry();
    let mut raw = RawParameters::new();
    raw.set("CASE", "synthetic");
    raw.set("MODEL_INIT", "init");
    raw.set("SYSTEM", "condor");

    let err = registry.resolve(&raw, Path::new("/tmp")).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("MODEL_TRUE: CASE == synthetic requires MODEL_TRUE"));
    assert!(message.contains("DATA: one of DATA or MODEL_TRUE must be set"));
    assert!(message.contains("SYSTEM: must be one of"));
}

#[test]
fn test_bool_and_number_coercion() {
    let registry = base_registry();
    let mut raw = minimal_raw();
    raw.set("SAVEKERNELS", "YES");
    raw.set("SAVETRACES", 1);
    raw.set("TASKTIME", 2);
    raw.set("NTASK", "12");

    let params = registry.resolve(&raw, Path::new("/tmp")).unwrap();
    assert!(params.get_bool("SAVEKERNELS"));
    assert!(params.get_bool("SAVETRACES"));
    assert_eq!(params.get_float("TASKTIME"), Some(2.0));
    assert_eq!(
        params.get_minutes("TASKTIME"),
        Some(std::time::Duration::from_secs(120))
    );
    assert_eq!(params.require_count("NTASK").unwrap(), 12);
}

#[test]
fn test_redeclare_replaces_in_place() {
    let mut registry = base_registry();
    let position = registry
        .specs()
        .iter()
        .position(|s| s.name == "CASE")
        .unwrap();

    registry.declare(
        ParamSpec::par("CASE", ParamType::Str)
            .default("data")
            .doc("relaxed"),
    );

    assert_eq!(registry.specs()[position].name, "CASE");
    assert!(!registry.get("CASE").unwrap().required);
    assert_eq!(
        registry.specs().iter().filter(|s| s.name == "CASE").count(),
        1
    );

    let mut raw = minimal_raw();
    raw.set("CASE", serde_json::Value::Null);
    let params = registry.resolve(&raw, Path::new("/tmp")).unwrap();
    assert_eq!(params.get_str("CASE"), Some("data"));
}

#[test]
fn test_parse_yaml_normalizes_keys_and_nulls() {
    let raw = RawParameters::parse_yaml(
        "case: data\nRESUME_FROM:\nNTASK: 4\nSAVEAS: vector\n",
    )
    .unwrap();

    assert_eq!(raw.get("CASE"), Some(&json!("data")));
    assert!(raw.get("RESUME_FROM").is_none());
    assert_eq!(raw.get("NTASK"), Some(&json!(4)));
    assert_eq!(raw.len(), 3);
}

#[test]
fn test_parse_toml() {
    let raw = RawParameters::parse_toml("CASE = \"synthetic\"\nNTASK = 3\nSAVEMODEL = false\n")
        .unwrap();
    assert_eq!(raw.get("CASE"), Some(&json!("synthetic")));
    assert_eq!(raw.get("NTASK"), Some(&json!(3)));
    assert_eq!(raw.get("SAVEMODEL"), Some(&json!(false)));
}

#[test]
fn test_parse_yaml_rejects_garbage() {
    let err = RawParameters::parse_yaml("- just\n- a list\n").unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_env_overrides() {
    let mut raw = minimal_raw();
    raw.merge_env_from(vec![
        ("TOMOFLOW_PAR_NTASK".to_string(), "16".to_string()),
        ("TOMOFLOW_PAR_".to_string(), "ignored".to_string()),
        ("HOME".to_string(), "/home/user".to_string()),
    ]);

    assert_eq!(raw.get("NTASK"), Some(&json!("16")));
    assert!(raw.get("HOME").is_none());

    let params = base_registry().resolve(&raw, Path::new("/tmp")).unwrap();
    assert_eq!(params.get_int("NTASK"), Some(16));
}

#[tokio::test]
async fn test_load_missing_file() {
    let err = RawParameters::load(Path::new("/definitely/not/here.yaml"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), crate::error::ErrorCode::CONFIG_NOT_FOUND);
}

#[tokio::test]
async fn test_load_toml_by_extension() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("parameters.toml");
    tokio::fs::write(&path, "CASE = \"data\"\n").await.unwrap();

    let raw = RawParameters::load(&path).await.unwrap();
    assert_eq!(raw.get("CASE"), Some(&json!("data")));
}
