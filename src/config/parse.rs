use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate config from a YAML string
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN)
        .map_err(|e| ConfigError::Validation(format!("invalid env pattern: {}", e)))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.partition.path = expand_tilde(&config.partition.path);
    config.storage.path = expand_tilde(&config.storage.path);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_partition(&config.partition, &mut errors);
    validate_intake(&config.intake, &mut errors);

    if config.reaper.inactivity_threshold.is_zero() {
        errors.push("reaper.inactivity_threshold must be greater than zero".to_string());
    }
    if config.reaper.idle_interval.is_zero() {
        errors.push("reaper.idle_interval must be greater than zero".to_string());
    }

    if let SinkConfig::Http(http) = &config.sink {
        if http.url.trim().is_empty() {
            errors.push("sink.url cannot be empty".to_string());
        } else if !(http.url.starts_with("http://") || http.url.starts_with("https://")) {
            errors.push(format!(
                "sink.url must be an http:// or https:// URL, got '{}'",
                http.url
            ));
        }
    }

    if let Some(web) = &config.web {
        if web.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "web.listen must be a socket address like 127.0.0.1:7410, got '{}'",
                web.listen
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_partition(partition: &PartitionConfig, errors: &mut Vec<String>) {
    if partition.id.trim().is_empty() {
        errors.push("partition.id cannot be empty".to_string());
    }
    if partition.path.as_os_str().is_empty() {
        errors.push("partition.path cannot be empty".to_string());
    }
    if partition.max_batch_size == 0 {
        errors.push("partition.max_batch_size must be at least 1".to_string());
    }
    if partition.poll_interval.is_zero() {
        errors.push("partition.poll_interval must be greater than zero".to_string());
    }
}

fn validate_intake(intake: &IntakeConfig, errors: &mut Vec<String>) {
    if intake.content_type.trim().is_empty() {
        errors.push("intake.content_type cannot be empty".to_string());
    }
    if intake.content_type_property.trim().is_empty() {
        errors.push("intake.content_type_property cannot be empty".to_string());
    }
    if intake.identity_property.trim().is_empty() {
        errors.push("intake.identity_property cannot be empty".to_string());
    }
    if let Some(module) = &intake.module_property {
        if module.trim().is_empty() {
            errors.push(
                "intake.module_property cannot be empty (omit it or set it to null)".to_string(),
            );
        } else if module == &intake.identity_property {
            errors.push(format!(
                "intake.module_property and intake.identity_property are both '{}'",
                module
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
partition:
  id: "0"
  path: /tmp/partition-0.jsonl
sink:
  type: log
storage:
  path: /tmp/scanfold.duckdb
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.partition.start, ReadStart::Beginning);
        assert!(!config.partition.follow);
        assert_eq!(config.partition.max_batch_size, 100);
        assert_eq!(config.reaper.inactivity_threshold, Duration::from_secs(3600));
        assert!(config.tracking.deduplicate);
        assert_eq!(config.intake.identity_property, "iothub-connection-device-id");
        assert!(config.web.is_none());
    }

    #[test]
    fn test_durations_are_humantime() {
        let yaml = format!("{}reaper:\n  inactivity_threshold: 15m\n  idle_interval: 5s\n", MINIMAL);
        let config = parse_config(&yaml).unwrap();

        assert_eq!(config.reaper.inactivity_threshold, Duration::from_secs(900));
        assert_eq!(config.reaper.idle_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let yaml = r#"
partition:
  id: ""
  path: /tmp/partition-0.jsonl
  max_batch_size: 0
reaper:
  inactivity_threshold: 0s
sink:
  type: http
  url: ftp://registry
storage:
  path: /tmp/scanfold.duckdb
web:
  listen: not-an-address
"#;

        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => {
                assert_eq!(errors.len(), 5, "{:?}", errors);
                assert!(errors.iter().any(|e| e.contains("partition.id")));
                assert!(errors.iter().any(|e| e.contains("max_batch_size")));
                assert!(errors.iter().any(|e| e.contains("inactivity_threshold")));
                assert!(errors.iter().any(|e| e.contains("sink.url")));
                assert!(errors.iter().any(|e| e.contains("web.listen")));
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_sink_type_fails_to_parse() {
        let yaml = MINIMAL.replace("type: log", "type: carrier_pigeon");
        assert!(matches!(parse_config(&yaml), Err(ConfigError::YamlParse(_))));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = MINIMAL.replace("/tmp/partition-0.jsonl", "$env{SCANFOLD_TEST_UNSET_DIR}/p0");
        match parse_config(&yaml) {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("SCANFOLD_TEST_UNSET_DIR"));
            }
            other => panic!("expected env var error, got {:?}", other),
        }
    }

    #[test]
    fn test_module_property_can_be_disabled() {
        let yaml = format!("{}intake:\n  module_property: null\n", MINIMAL);
        let config = parse_config(&yaml).unwrap();
        assert!(config.intake.module_property.is_none());
    }
}
