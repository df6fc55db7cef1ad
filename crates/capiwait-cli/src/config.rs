//! Client configuration from flags, environment and an optional file
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `CAPIWAIT_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config` / in-cluster)
//!
//! Wait tunables start from the defaults, are overlaid by `--config <file>`
//! (JSON, camelCase keys) and finally by individual flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use capiwait_client::ClusterClientConfig;

use crate::{Error, GlobalArgs, Result};

const CAPIWAIT_KUBECONFIG_ENV: &str = "CAPIWAIT_KUBECONFIG";

/// Resolve a kubeconfig path using the priority chain
///
/// Returns `None` to let kube-rs pick its defaults.
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    match std::env::var(CAPIWAIT_KUBECONFIG_ENV) {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => None,
    }
}

/// Parse "90", "90s", "30m" or "2h"
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("invalid duration unit '{}' in '{}'", other, raw)),
    };
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", raw))
}

fn load_file(path: &Path) -> Result<ClusterClientConfig> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::config_file(path, e.to_string()))?;
    serde_json::from_str(&data).map_err(|e| Error::config_file(path, e.to_string()))
}

/// Build the client configuration for this invocation
pub fn client_config(args: &GlobalArgs) -> Result<ClusterClientConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_file(path)?,
        None => ClusterClientConfig::default(),
    };
    if let Some(timeout) = args.operation_timeout {
        config.operation_timeout = timeout;
    }
    if args.single_node_clusters {
        config.single_node_clusters = true;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::bare_seconds("90", 90)]
    #[case::seconds("45s", 45)]
    #[case::minutes("30m", 1800)]
    #[case::hours("2h", 7200)]
    fn durations_parse(#[case] raw: &str, #[case] secs: u64) {
        assert_eq!(parse_duration(raw).unwrap(), Duration::from_secs(secs));
    }

    #[rstest]
    #[case::empty("")]
    #[case::unit_only("m")]
    #[case::unknown_unit("5d")]
    fn bad_durations_are_rejected(#[case] raw: &str) {
        assert!(parse_duration(raw).is_err());
    }

    #[test]
    fn overflowing_duration_is_rejected() {
        let err = parse_duration("18446744073709551615h").unwrap_err();
        assert_eq!(err, "duration '18446744073709551615h' is too large");
    }

    #[test]
    fn oversized_timeout_flag_fails_validation() {
        let args = GlobalArgs {
            operation_timeout: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let err = client_config(&args).unwrap_err();
        assert!(err.to_string().contains("does not fit in a duration"), "{err}");
    }

    #[test]
    fn explicit_kubeconfig_wins() {
        let path = resolve_kubeconfig(Some(Path::new("/tmp/mgmt.yaml")));
        assert_eq!(path, Some(PathBuf::from("/tmp/mgmt.yaml")));
    }

    #[test]
    fn flags_override_defaults() {
        let args = GlobalArgs {
            operation_timeout: Some(Duration::from_secs(600)),
            single_node_clusters: true,
            ..Default::default()
        };
        let config = client_config(&args).unwrap();
        assert_eq!(config.operation_timeout, Duration::from_secs(600));
        assert!(config.single_node_clusters);
        assert_eq!(config.stall_poll_interval, Duration::from_secs(15));
    }

    #[test]
    fn config_file_overlays_defaults() {
        let path = std::env::temp_dir().join(format!("capiwait-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"operationTimeout": 120, "upgradeStartDelay": 5}"#).unwrap();
        let args = GlobalArgs {
            config: Some(path.clone()),
            ..Default::default()
        };

        let config = client_config(&args).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.operation_timeout, Duration::from_secs(120));
        assert_eq!(config.upgrade_start_delay, Duration::from_secs(5));
        assert_eq!(config.check_cluster_interval, Duration::from_secs(10));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/nonexistent/capiwait.json")),
            ..Default::default()
        };
        let err = client_config(&args).unwrap_err();
        assert!(err.to_string().starts_with("failed to read config file /nonexistent/capiwait.json"));
    }
}
