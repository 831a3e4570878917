//! Configuration file handling.
//!
//! Looks for `.config/dredge.styx` in a start directory or any of its parents.
//! Configuration only selects defaults (schema name, naming knobs); a
//! reference datamodel is always passed explicitly.

pub use dredge_config::{Config, NamingConfig};

use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = ".config/dredge.styx";

/// Load configuration, searching up from the current directory.
pub fn load() -> Result<(Config, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from(&cwd)
}

/// Load configuration, searching up from `start`.
pub fn load_from(start: &Path) -> Result<(Config, PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let config = parse(&content)?;

    tracing::debug!(path = %config_path.display(), schema = config.schema(), "loaded config");

    Ok((config, config_path))
}

/// Parse the contents of a config file.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    facet_styx::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/dredge.styx found in the start directory or any parent")]
    NotFound,

    #[error("failed to read .config/dredge.styx: {0}")]
    Io(String),

    #[error("failed to parse .config/dredge.styx: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dredge-config-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
schema inventory
naming {
    singularize-models false
    camel-case-fields false
}
"#,
        )
        .unwrap();
        assert_eq!(config.schema(), "inventory");
        assert!(!config.singularize_models());
        assert!(!config.camel_case_fields());
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.schema(), "public");
        assert!(config.singularize_models());
        assert!(config.camel_case_fields());
    }

    #[test]
    fn test_load_searches_parent_directories() {
        let root = scratch_dir("search");
        std::fs::create_dir_all(root.join(".config")).unwrap();
        std::fs::write(root.join(CONFIG_FILE), "schema billing\n").unwrap();
        let nested = root.join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = load_from(&nested).unwrap();
        assert_eq!(config.schema(), "billing");
        assert_eq!(path, root.join(CONFIG_FILE));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let root = scratch_dir("broken");
        std::fs::create_dir_all(root.join(".config")).unwrap();
        std::fs::write(root.join(CONFIG_FILE), "naming {\n").unwrap();

        assert!(matches!(load_from(&root), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
