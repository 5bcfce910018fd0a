//! Defaults for every knob of the submitter and the parsers used at the CLI boundary

use std::env;
use std::path::PathBuf;

pub const DEFAULT_BUCKET: &str = "ldbc-snb-datagen-store";
pub const DEFAULT_INSTANCE_TYPE: &str = "r6gd.2xlarge";
pub const DEFAULT_MASTER_INSTANCE_TYPE: &str = "r6gd.2xlarge";
pub const DEFAULT_AZ: &str = "us-east-2c";
pub const DEFAULT_EMR_RELEASE: &str = "emr-6.15.0";
pub const DEFAULT_MAIN_CLASS: &str = "ldbc.snb.datagen.LdbcDatagen";
pub const DEFAULT_CATALOG_PATH: &str = "Amazon EC2 Instance Comparison.csv";

pub const DEFAULT_SF_PER_WORKER: f64 = 3e3;
pub const DEFAULT_SF_PER_PARTITION: f64 = 10.0;
pub const DEFAULT_MIN_WORKERS: u32 = 1;
pub const DEFAULT_MAX_WORKERS: u32 = 1000;
pub const DEFAULT_MIN_PARTITIONS: u32 = 1;

/// The reference table shipped next to the executable. Falls back to the
/// working directory when the executable location is unknown.
pub fn default_catalog_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CATALOG_PATH)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH))
}

/// Parse a `key=value` pair. Only the first `=` splits, so values may contain `=`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_sits_next_to_executable() {
        let path = default_catalog_path();
        let exe_dir = env::current_exe().unwrap().parent().unwrap().to_path_buf();

        assert!(path.is_absolute());
        assert_eq!(path, exe_dir.join(DEFAULT_CATALOG_PATH));
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("spark.executor.memoryOverhead=4g"),
            Ok(("spark.executor.memoryOverhead".to_string(), "4g".to_string()))
        );
        assert_eq!(
            parse_key_val(" a =b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert_eq!(parse_key_val("k="), Ok(("k".to_string(), String::new())));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val(" =v").is_err());
    }
}
