use serde::Deserialize;
use serde::Serialize;

use crate::Fairness;
use crate::Result;

/// Fairness policy of blocking searches.
///
/// FIFO makes entries found by the storage scan take precedence over writes
/// that arrive while the scan runs. It is opt-in, globally or per entry type.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SearchConfig {
    /// Apply FIFO fairness to every type
    #[serde(default)]
    pub fifo_default: bool,

    /// Entry types that use FIFO fairness even when `fifo_default` is off
    #[serde(default)]
    pub fifo_types: Vec<String>,
}

impl SearchConfig {
    /// Fairness for a search whose templates name `type_name` (`None` for
    /// an untyped template)
    pub fn fairness_for(
        &self,
        type_name: Option<&str>,
    ) -> Fairness {
        let listed = type_name.is_some_and(|t| self.fifo_types.iter().any(|f| f == t));
        if self.fifo_default || listed {
            Fairness::Fifo
        } else {
            Fairness::Plain
        }
    }

    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
