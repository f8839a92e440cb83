use crate::core::{CrudError, IsolationLevel, Result};
use crate::transaction::TransactionPlan;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const URL_SCHEME: &str = "memory://";

/// Store context configuration
///
/// Names the backing store and the transaction defaults routers built on
/// this context use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Name of the process-wide store
    pub database: String,

    /// Default isolation level for transactions
    pub isolation_level: IsolationLevel,

    /// Default attempt budget for transactions
    pub retry_count: u32,

    /// Default base backoff delay, in milliseconds
    pub retry_delay_ms: Option<u64>,
}

impl ContextConfig {
    /// Create a new context configuration
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            isolation_level: IsolationLevel::default(),
            retry_count: 1,
            retry_delay_ms: None,
        }
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the default isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the default retry count
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the default base retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Parse from connection string
    ///
    /// Format: "memory://database?isolation=serializable&retry_count=3&retry_delay_ms=50"
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ContextConfig::from_url("memory://orders?retry_count=5")?;
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix(URL_SCHEME).ok_or_else(|| {
            CrudError::Configuration(format!("URL must start with '{}'", URL_SCHEME))
        })?;

        let (database, query) = match rest.split_once('?') {
            Some((database, query)) => (database, Some(query)),
            None => (rest, None),
        };
        if database.is_empty() || database.contains('/') {
            return Err(CrudError::Configuration(format!(
                "Invalid database name in URL '{}'",
                url
            )));
        }

        let mut config = Self::new(database);
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                CrudError::Configuration(format!("Invalid URL parameter '{}'", pair))
            })?;
            match name {
                "isolation" => {
                    config.isolation_level = value
                        .parse()
                        .map_err(|_| CrudError::Configuration(format!("Invalid isolation level '{}'", value)))?;
                }
                "retry_count" => {
                    config.retry_count = value
                        .parse()
                        .map_err(|_| CrudError::Configuration(format!("Invalid retry_count '{}'", value)))?;
                }
                "retry_delay_ms" => {
                    config.retry_delay_ms = Some(value.parse().map_err(|_| {
                        CrudError::Configuration(format!("Invalid retry_delay_ms '{}'", value))
                    })?);
                }
                other => {
                    return Err(CrudError::Configuration(format!(
                        "Unknown URL parameter '{}'",
                        other
                    )));
                }
            }
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        let mut url = format!(
            "{}{}?isolation={}&retry_count={}",
            URL_SCHEME, self.database, self.isolation_level, self.retry_count
        );
        if let Some(delay) = self.retry_delay_ms {
            url.push_str(&format!("&retry_delay_ms={}", delay));
        }
        url
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(CrudError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }

        if self.retry_count == 0 {
            return Err(CrudError::Configuration(
                "retry_count must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Default plan for transactions run through routers on this context.
    pub fn transaction_plan(&self) -> TransactionPlan {
        let plan = TransactionPlan::new()
            .isolation_level(self.isolation_level)
            .retry_count(self.retry_count);
        match self.retry_delay_ms {
            Some(ms) => plan.retry_delay(Duration::from_millis(ms)),
            None => plan,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new("crudroute")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.database, "crudroute");
        assert_eq!(config.isolation_level, IsolationLevel::RepeatableRead);
        assert_eq!(config.retry_count, 1);
        assert_eq!(config.retry_delay_ms, None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ContextConfig::new("orders")
            .isolation_level(IsolationLevel::Serializable)
            .retry_count(4)
            .retry_delay(Duration::from_millis(25));

        assert_eq!(config.database, "orders");
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert_eq!(config.retry_count, 4);
        assert_eq!(config.retry_delay_ms, Some(25));
    }

    #[test]
    fn test_from_url() {
        let config = ContextConfig::from_url(
            "memory://inventory?isolation=read_committed&retry_count=3&retry_delay_ms=50",
        )
        .unwrap();

        assert_eq!(config.database, "inventory");
        assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay_ms, Some(50));
    }

    #[test]
    fn test_from_url_defaults() {
        let config = ContextConfig::from_url("memory://plain").unwrap();
        assert_eq!(config, ContextConfig::new("plain"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(ContextConfig::from_url("postgres://db").is_err());
        assert!(ContextConfig::from_url("memory://").is_err());
        assert!(ContextConfig::from_url("memory://db?retry_count=many").is_err());
        assert!(ContextConfig::from_url("memory://db?isolation=chaos").is_err());
        assert!(ContextConfig::from_url("memory://db?colour=blue").is_err());
    }

    #[test]
    fn test_to_url_parses_back() {
        let config = ContextConfig::new("ledger")
            .isolation_level(IsolationLevel::Snapshot)
            .retry_count(2)
            .retry_delay(Duration::from_millis(10));

        assert_eq!(ContextConfig::from_url(&config.to_url()).unwrap(), config);
    }

    #[test]
    fn test_validate() {
        assert!(ContextConfig::new("db").validate().is_ok());
        assert!(ContextConfig::new("").validate().is_err());
        assert!(ContextConfig::new("db").retry_count(0).validate().is_err());
    }

    #[test]
    fn test_transaction_plan_carries_defaults() {
        let plan = ContextConfig::new("db")
            .isolation_level(IsolationLevel::ReadUncommitted)
            .retry_count(3)
            .retry_delay(Duration::from_millis(40))
            .transaction_plan();

        assert_eq!(plan.isolation_level, IsolationLevel::ReadUncommitted);
        assert_eq!(plan.retry_count, 3);
        assert_eq!(plan.base_delay(), Duration::from_millis(40));
    }

    #[test]
    fn test_serde_round_trip_with_missing_fields() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"database":"files","retry_count":2}"#).unwrap();
        assert_eq!(config.database, "files");
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.isolation_level, IsolationLevel::RepeatableRead);
    }
}
