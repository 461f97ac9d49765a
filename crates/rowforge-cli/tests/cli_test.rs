use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_init_validate_and_preview() {
    let dir = tempfile::tempdir().unwrap();

    // Init project
    cargo_bin_cmd!("rowforge")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .success();

    // Verify generated files exist
    assert!(dir.path().join("rowforge.yaml").exists());
    assert!(dir.path().join("schemas/invoice.yaml").exists());
    assert!(dir.path().join("configs/global.yaml").exists());
    assert!(dir.path().join("data/documents.jsonl").exists());

    let config = dir.path().join("rowforge.yaml");
    let config = config.to_str().unwrap();

    // The starter project validates cleanly
    cargo_bin_cmd!("rowforge")
        .args(["--config", config, "validate"])
        .assert()
        .success();

    // Preview the sample documents
    let output = cargo_bin_cmd!("rowforge")
        .args(["--config", config, "preview"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&output).unwrap();

    // doc-1 and doc-2 share INV-001, doc-3 is INV-002
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["rowKey"], "INV-001");
    assert_eq!(rows[0]["fieldValues"]["vendor"], "Acme Corp");
    // 100.00 + 19.00, integral result rendered as an integer
    assert_eq!(rows[0]["fieldValues"]["total"], 119);
    assert_eq!(rows[0]["sourceDocumentIds"].as_array().unwrap().len(), 2);
    assert_eq!(rows[1]["rowKey"], "INV-002");
}

#[test]
fn test_init_refuses_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    cargo_bin_cmd!("rowforge")
        .args(["init", path])
        .assert()
        .success();
    cargo_bin_cmd!("rowforge")
        .args(["init", path])
        .assert()
        .failure();
}

#[test]
fn test_validate_fails_on_broken_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    cargo_bin_cmd!("rowforge")
        .args(["init", path])
        .assert()
        .success();

    // A rule with no source fields is structurally invalid
    let broken = r#"id: broken
name: Broken config
scope: GLOBAL
templateId: invoice
rules:
  - sourceFields: []
    targetField: vendor
    transformType: DIRECT
"#;
    std::fs::write(dir.path().join("configs/broken.yaml"), broken).unwrap();

    let config = dir.path().join("rowforge.yaml");
    cargo_bin_cmd!("rowforge")
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation failed"));
}

#[test]
fn test_validate_reports_uncovered_required_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    cargo_bin_cmd!("rowforge")
        .args(["init", path])
        .assert()
        .success();

    // Require a field no rule populates
    let schema = r#"- name: invoiceNumber
  dataType: string
  isRequired: true
- name: approverEmail
  dataType: string
  isRequired: true
"#;
    std::fs::write(dir.path().join("schemas/invoice.yaml"), schema).unwrap();

    let config = dir.path().join("rowforge.yaml");
    cargo_bin_cmd!("rowforge")
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .failure();
}

#[test]
fn test_lookup_import_emits_rule_snippet() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("vendors.csv");
    std::fs::write(&csv_path, "key,value\nACME,Acme Corporation\nGLBX,Globex\n").unwrap();

    let output = cargo_bin_cmd!("rowforge")
        .args([
            "lookup",
            "import",
            csv_path.to_str().unwrap(),
            "--source",
            "vendorCode",
            "--target",
            "vendor",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let rules: Vec<serde_yaml::Value> = serde_yaml::from_slice(&output).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["transformType"], "LOOKUP");
    assert_eq!(rules[0]["targetField"], "vendor");
    assert_eq!(
        rules[0]["transformParams"]["table"][0]["key"],
        "ACME"
    );
}

#[test]
fn test_lookup_import_rejects_duplicate_keys() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("dupes.csv");
    std::fs::write(&csv_path, "key,value\nACME,One\nacme,Two\n").unwrap();

    cargo_bin_cmd!("rowforge")
        .args([
            "lookup",
            "import",
            csv_path.to_str().unwrap(),
            "--source",
            "vendorCode",
            "--target",
            "vendor",
            "--case-insensitive",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate lookup key"));
}
