/// Engine configuration, built once at startup and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Worker tasks processed concurrently.
    pub worker_concurrency: usize,

    /// How often the worker polls for queued tasks (in milliseconds).
    pub poll_interval_ms: u64,

    /// Import page size when the run profile does not set one.
    pub import_page_size: u32,

    /// Pending exports per connector call.
    pub export_batch_size: usize,

    /// Operation budget of one expression evaluation.
    pub expression_max_operations: u64,

    /// `tracing` filter directive for the worker binary.
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            poll_interval_ms: 1000,
            import_page_size: 500,
            export_batch_size: 100,
            expression_max_operations: 50_000,
            log_filter: "info,idsync=debug".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let defaults = Self::default();

        let worker_concurrency =
            parse_or(&reader, "IDSYNC_WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "IDSYNC_WORKER_CONCURRENCY".into(),
                "must be at least 1".into(),
            ));
        }

        let poll_interval_ms =
            parse_or(&reader, "IDSYNC_POLL_INTERVAL_MS", defaults.poll_interval_ms)?;
        let import_page_size =
            parse_or(&reader, "IDSYNC_IMPORT_PAGE_SIZE", defaults.import_page_size)?;
        let export_batch_size =
            parse_or(&reader, "IDSYNC_EXPORT_BATCH_SIZE", defaults.export_batch_size)?;
        if export_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "IDSYNC_EXPORT_BATCH_SIZE".into(),
                "must be at least 1".into(),
            ));
        }
        let expression_max_operations = parse_or(
            &reader,
            "IDSYNC_EXPRESSION_MAX_OPERATIONS",
            defaults.expression_max_operations,
        )?;

        let log_filter = reader("IDSYNC_LOG_FILTER").unwrap_or(defaults.log_filter);

        Ok(Self {
            worker_concurrency,
            poll_interval_ms,
            import_page_size,
            export_batch_size,
            expression_max_operations,
            log_filter,
        })
    }
}

fn parse_or<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match reader(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;

    /// Create a reader closure from a HashMap (no global env mutation).
    fn make_reader(vars: HashMap<&str, &str>) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_reader(make_reader(HashMap::new())).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.import_page_size, 500);
        assert_eq!(config.export_batch_size, 100);
        assert_eq!(config.expression_max_operations, 50_000);
        assert_eq!(config.log_filter, "info,idsync=debug");
    }

    #[test]
    fn test_custom_values() {
        let reader = make_reader(HashMap::from([
            ("IDSYNC_WORKER_CONCURRENCY", "8"),
            ("IDSYNC_POLL_INTERVAL_MS", "250"),
            ("IDSYNC_IMPORT_PAGE_SIZE", "50"),
            ("IDSYNC_EXPORT_BATCH_SIZE", "10"),
            ("IDSYNC_EXPRESSION_MAX_OPERATIONS", "1000"),
            ("IDSYNC_LOG_FILTER", "warn"),
        ]));

        let config = SyncConfig::from_reader(reader).unwrap();
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.import_page_size, 50);
        assert_eq!(config.export_batch_size, 10);
        assert_eq!(config.expression_max_operations, 1000);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_invalid_number_names_key() {
        let reader = make_reader(HashMap::from([("IDSYNC_IMPORT_PAGE_SIZE", "lots")]));
        let err = SyncConfig::from_reader(reader).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(..)));
        assert!(err.to_string().contains("IDSYNC_IMPORT_PAGE_SIZE"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let reader = make_reader(HashMap::from([("IDSYNC_WORKER_CONCURRENCY", "0")]));
        let err = SyncConfig::from_reader(reader).unwrap_err();
        assert!(err.to_string().contains("IDSYNC_WORKER_CONCURRENCY"));
    }
}
