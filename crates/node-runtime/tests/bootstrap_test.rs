//! Bootstrap from flags and a config file.

use clap::Parser;
use node_runtime::{load_config, Args};
use std::io::Write;
use std::time::Duration;

fn qc_env_unset() -> bool {
    ["QC_CONSOLE_LISTEN", "QC_CONSOLE_API_KEY", "QC_LOG_LEVEL"]
        .iter()
        .all(|name| std::env::var_os(name).is_none())
}

#[test]
fn test_flags_override_config_file() {
    if !qc_env_unset() {
        return;
    }
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "error_output = \"command-line\"\n\n[session]\npoll_interval = \"250ms\"\n\n[socket]\napi_key = \"file-key\""
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let args = Args::try_parse_from([
        "node-runtime",
        "--config",
        &path,
        "--webapi",
        "127.0.0.1:9911",
        "--apikey",
        "flag-key",
    ])
    .unwrap();
    let config = load_config(&args).unwrap();

    assert_eq!(config.session.poll_interval, Duration::from_millis(250));
    assert!(config.socket.enabled);
    assert_eq!(config.socket.listen.port(), 9911);
    assert_eq!(config.socket.api_key.as_deref(), Some("flag-key"));
}

#[test]
fn test_invalid_config_rejected() {
    if !qc_env_unset() {
        return;
    }
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[transfer]\nchunk_size = 0").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let args = Args::try_parse_from(["node-runtime", "--config", &path]).unwrap();
    assert!(load_config(&args).is_err());
}

#[test]
fn test_defaults_without_flags() {
    if !qc_env_unset() {
        return;
    }
    let args = Args::try_parse_from(["node-runtime"]).unwrap();
    let config = load_config(&args).unwrap();
    assert!(!config.socket.enabled);
    assert_eq!(config.log_level, "info");
}
