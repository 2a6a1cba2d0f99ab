// Exercises the compiled binary's argument handling. Nothing here needs a
// browser: --print-config exits before connecting.

use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

#[test]
fn print_config_reflects_overrides() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = dir.path().join("config.json");

    let output = Command::cargo_bin("spritetyper")?
        .args(["--print-config", "--round-duration-ms", "20000", "-c"])
        .arg(&config)
        .output()?;
    assert!(output.status.success());

    let printed: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(printed["round_duration_ms"], 20_000);
    assert_eq!(printed["refresh_interval_ms"], 600_000);
    assert_eq!(printed["active_color"], "rgb(255, 255, 255)");
    Ok(())
}

#[test]
fn print_config_reads_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{ "completion_settle_ms": 2000 }"#)?;

    let output = Command::cargo_bin("spritetyper")?
        .arg("--print-config")
        .arg("--config")
        .arg(&config)
        .output()?;
    assert!(output.status.success());

    let printed: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(printed["completion_settle_ms"], 2_000);
    assert_eq!(printed["round_duration_ms"], 15_000);
    Ok(())
}

#[test]
fn missing_devtools_url_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("spritetyper")?.assert().failure();
    Ok(())
}
