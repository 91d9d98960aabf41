//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::EtlConfig;
use crate::core::transform::ConceptPrecedence;
use crate::domain::errors::EtlError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`EtlConfig`]
/// 4. Applies environment variable overrides (`PERIOP_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`EtlError::Configuration`] if the file cannot be read or parsed,
/// a referenced environment variable is unset, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use periop_omop::config::loader::load_config;
///
/// let config = load_config("periop-omop.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EtlConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(EtlError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        EtlError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(contents: &str) -> Result<EtlConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: EtlConfig = toml::from_str(&contents)
        .map_err(|e| EtlError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        EtlError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is a valid regex")
    })
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&cap[0], &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(EtlError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        EtlError::Configuration(format!("Invalid value '{value}' for environment variable {name}"))
    })
}

fn env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies environment variable overrides using the `PERIOP_*` prefix
///
/// Variables follow the pattern `PERIOP_<SECTION>_<KEY>`, for example
/// `PERIOP_PROCESSING_BATCH_SIZE` or `PERIOP_SCHEMAS_OMOP`. List values are
/// comma separated.
fn apply_env_overrides(config: &mut EtlConfig) -> Result<()> {
    const PREFIX: &str = "PERIOP_";
    let var = |key: &str| std::env::var(format!("{PREFIX}{key}")).ok();

    // Application
    if let Some(val) = var("APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_override("PERIOP_APPLICATION_DRY_RUN", &val)?;
    }

    // Database
    if let Some(val) = var("DATABASE_CONNECTION_STRING") {
        config.database.connection_string = super::secret_string(val);
    }
    if let Some(val) = var("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections =
            parse_override("PERIOP_DATABASE_MAX_CONNECTIONS", &val)?;
    }
    if let Some(val) = var("DATABASE_STATEMENT_TIMEOUT_SECONDS") {
        config.database.statement_timeout_seconds =
            parse_override("PERIOP_DATABASE_STATEMENT_TIMEOUT_SECONDS", &val)?;
    }

    // Schemas
    if let Some(val) = var("SCHEMAS_OMOP") {
        config.schemas.omop = val;
    }
    if let Some(val) = var("SCHEMAS_PREOP") {
        config.schemas.preop = val;
    }
    if let Some(val) = var("SCHEMAS_INTRAOP") {
        config.schemas.intraop = val;
    }
    if let Some(val) = var("SCHEMAS_POSTOP") {
        config.schemas.postop = val;
    }

    // Processing
    if let Some(val) = var("PROCESSING_BATCH_SIZE") {
        config.processing.batch_size = parse_override("PERIOP_PROCESSING_BATCH_SIZE", &val)?;
    }
    if let Some(val) = var("PROCESSING_KEY_BASE") {
        config.processing.key_base = parse_override("PERIOP_PROCESSING_KEY_BASE", &val)?;
    }
    if let Some(val) = var("PROCESSING_CONCEPT_PRECEDENCE") {
        config.processing.concept_precedence = val
            .parse::<ConceptPrecedence>()
            .map_err(EtlError::Configuration)?;
    }

    // Entity selection
    if let Some(val) = var("ETL_TABLES") {
        config.etl.tables = env_list(&val);
    }

    // Logging
    if let Some(val) = var("LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_override("PERIOP_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Some(val) = var("LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[database]
connection_string = "postgresql://etl:pw@localhost:5432/cdm"
"#;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("PERIOP_TEST_SUBST_VAR", "test_value");
        let input = "password = \"${PERIOP_TEST_SUBST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
        std::env::remove_var("PERIOP_TEST_SUBST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("PERIOP_TEST_MISSING_VAR");
        let input = "password = \"${PERIOP_TEST_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("PERIOP_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        std::env::remove_var("PERIOP_TEST_COMMENTED_VAR");
        let input = "# password = \"${PERIOP_TEST_COMMENTED_VAR}\"";
        assert!(substitute_env_vars(input).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[application]
log_level = "debug"

[database]
connection_string = "postgresql://etl:pw@localhost:5432/cdm"

[schemas]
omop = "cdm"

[processing]
batch_size = 500
concept_precedence = "lookup_first"

[vocabularies]
measurement = ["PASAR_LAB", "PASAR_VITALS"]

[etl]
tables = ["measurement"]

[[scripts]]
target = "visit_occurrence"
files = ["visit_occurrence/insert.sql"]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.schemas.omop, "cdm");
        assert_eq!(config.schemas.preop, "preop");
        assert_eq!(config.processing.batch_size, 500);
        assert_eq!(
            config.processing.concept_precedence,
            ConceptPrecedence::LookupFirst
        );
        assert_eq!(config.vocabularies.measurement.len(), 2);
        assert_eq!(config.etl.tables, vec!["measurement".to_string()]);
        assert!(config.script_for("visit_occurrence").is_some());
    }

    #[test]
    fn test_parse_config_rejects_invalid_values() {
        let toml_content = format!("{MINIMAL}\n[processing]\nbatch_size = 0\n");
        let err = parse_config(&toml_content).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_parse_config_requires_database() {
        assert!(parse_config("[application]\nlog_level = \"info\"\n").is_err());
    }

    #[test]
    fn test_env_list() {
        assert_eq!(
            env_list("person, measurement,,observation "),
            vec!["person", "measurement", "observation"]
        );
    }

    #[test]
    fn test_parse_override_error_names_variable() {
        let err = parse_override::<u64>("PERIOP_PROCESSING_BATCH_SIZE", "many").unwrap_err();
        assert!(err.to_string().contains("PERIOP_PROCESSING_BATCH_SIZE"));
    }
}
