use std::io::Write;
use std::path::Path;
use std::process::Output;

use tempfile::{NamedTempFile, TempDir};

/// Run the binary with quiet logs and no ambient config
async fn run_cli(args: &[&str], envs: &[(&str, &str)], cwd: &Path) -> Output {
    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_vcompress"));
    command
        .args(args)
        .current_dir(cwd)
        .env_remove("VCOMPRESS_CONFIG")
        .env("RUST_LOG", "error")
        .env("NO_COLOR", "1")
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().await.expect("Failed to run vcompress")
}

/// Config whose ffmpeg binary cannot exist
fn broken_engine_config(work_dir: &Path) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[engine]
ffmpeg_path = "/nonexistent/bin/ffmpeg"
work_dir = "{}"
"#,
        work_dir.display()
    )
    .unwrap();
    file.flush().unwrap();
    file
}

fn input_file(dir: &Path) -> String {
    let path = dir.join("clip.mp4");
    std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn test_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&["/nonexistent/clip.mp4"], &[], dir.path()).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read input"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_unsupported_resolution_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = input_file(dir.path());
    let output = run_cli(&[&input, "--resolution", "360"], &[], dir.path()).await;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("480, 720, 1080"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_engine_load_failure_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let input = input_file(dir.path());
    let config = broken_engine_config(&dir.path().join("work"));
    let config_path = config.path().display().to_string();

    let output = run_cli(&[&input, "--config", &config_path], &[], dir.path()).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FFmpeg not found"), "stderr: {}", stderr);
    assert!(!dir.path().join("compressed_video.mp4").exists());
}

#[tokio::test]
async fn test_config_from_environment() {
    let dir = TempDir::new().unwrap();
    let input = input_file(dir.path());
    let config = broken_engine_config(&dir.path().join("work"));
    let config_path = config.path().display().to_string();

    let output = run_cli(&[&input], &[("VCOMPRESS_CONFIG", &config_path)], dir.path()).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FFmpeg not found"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_env_override_without_config_file() {
    let dir = TempDir::new().unwrap();
    let input = input_file(dir.path());
    let work_dir = dir.path().join("work").display().to_string();

    let output = run_cli(
        &[&input],
        &[
            ("VCOMPRESS_ENGINE__FFMPEG_PATH", "/nonexistent/bin/ffmpeg"),
            ("VCOMPRESS_ENGINE__WORK_DIR", &work_dir),
        ],
        dir.path(),
    )
    .await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FFmpeg not found"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = input_file(dir.path());
    std::fs::write(
        dir.path().join("vcompress.toml"),
        "[engine]\ntimeout_secs = 0\n",
    )
    .unwrap();

    let output = run_cli(&[&input], &[], dir.path()).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timeout_secs"), "stderr: {}", stderr);
}
