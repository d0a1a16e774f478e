use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn qah_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_qah"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("policy.md"),
        "# Discounts\n\nDiscount code SAVE20 grants 20% off.\n\nCodes cannot be combined.",
    )
    .unwrap();
    fs::write(
        files_dir.join("ui.txt"),
        "Apply button is labeled 'Apply'.\nThe code field sits above the order total.",
    )
    .unwrap();
    fs::write(
        files_dir.join("checkout.html"),
        "<html><body><h1>Checkout</h1><input id=\"discount\"><button id=\"apply\">Apply</button></body></html>",
    )
    .unwrap();
    fs::write(files_dir.join("logo.png"), [0u8, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[index]
path = "{}/kb"

[chunking]
max_chars = 200
overlap_chars = 40

[embedding]
provider = "hash"
dims = 128
"#,
        root.display()
    );

    let config_path = config_dir.join("qah.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_qah(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = qah_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run qah binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_status_before_build() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_qah(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert!(stdout.contains("not built"));
}

#[test]
fn test_build_status_search() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, ok) = run_qah(&config, &["build", files.to_str().unwrap()]);
    assert!(ok, "build failed: {}", stderr);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("skipped (unsupported): logo.png"));
    assert!(stdout.trim_end().ends_with("ok"));
    assert!(tmp.path().join("kb").join("index.sqlite").is_file());

    let (stdout, _, ok) = run_qah(&config, &["status"]);
    assert!(ok);
    assert!(stdout.contains("Status:      built"));
    assert!(stdout.contains("hash-bow-v1"));

    let (stdout, stderr, ok) = run_qah(&config, &["search", "discount code SAVE20", "--k", "2"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["));
    assert!(stdout.contains("policy.md"));
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_build_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, ok) = run_qah(&config, &["build", "--dry-run", files.to_str().unwrap()]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("build (dry-run)"));
    assert!(stdout.contains("estimated chunks:"));
    assert!(!tmp.path().join("kb").exists());
}

#[test]
fn test_search_before_build_fails_with_hint() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_qah(&config, &["search", "discount"]);
    assert!(!ok);
    assert!(stderr.contains("qah build"));
}

#[test]
fn test_generate_with_disabled_model_fails() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");
    let (_, stderr, ok) = run_qah(&config, &["build", files.to_str().unwrap()]);
    assert!(ok, "build failed: {}", stderr);

    let (stdout, stderr, ok) = run_qah(&config, &["generate", "cases", "discount codes"]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains("test_case_generation failed"));
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("qah.toml");
    fs::write(
        &config_path,
        "[index]\npath = \"./kb\"\n[chunking]\nmax_chars = 50\noverlap_chars = 60\n",
    )
    .unwrap();
    let (_, stderr, ok) = run_qah(&config_path, &["status"]);
    assert!(!ok);
    assert!(stderr.contains("overlap_chars"));
}
