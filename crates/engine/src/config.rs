use serde::{Deserialize, Serialize};
use stepgate_storage::ConnectionConfig;

pub const DEFAULT_MAX_BATCH_ROWS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied to every connection opened through the engine.
    pub connection: ConnectionConfig,
    /// Upper bound on rows returned by a single `multi_step`.
    pub max_batch_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_batch_rows: DEFAULT_MAX_BATCH_ROWS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let partial = rmp_serde::to_vec_named(&Partial { max_batch_rows: 25 })?;
        let config: EngineConfig = rmp_serde::from_slice(&partial)?;
        assert_eq!(config.max_batch_rows, 25);
        assert_eq!(config.connection, ConnectionConfig::default());
        Ok(())
    }

    #[derive(Serialize)]
    struct Partial {
        max_batch_rows: usize,
    }
}
