//! Rule name registry for one whole-build configuration.
//!
//! Callers create a registry once per configuration and pass it to every
//! rule evaluation; there is no process-wide instance.

use std::collections::HashMap;

use crate::error::ErrorKind;

/// Tracks which module directory first defined each rule name.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, String>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for a rule defined in `module_dir`.
    pub fn register(&mut self, name: &str, module_dir: &str) -> Result<(), ErrorKind> {
        if let Some(first) = self.rules.get(name) {
            return Err(ErrorKind::DuplicateRule {
                name: name.to_string(),
                first_module_dir: first.clone(),
            });
        }
        self.rules.insert(name.to_string(), module_dir.to_string());
        Ok(())
    }

    /// Returns `true` if a rule with this name has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rule has been registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
