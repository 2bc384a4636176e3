//! Manager configuration.

/// How a weak observation is attached to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Register the target itself with the host
    Direct,
    /// Register a companion object that lives exactly as long as the target.
    ///
    /// The reclamation signal arrives for the companion, after direct targets
    /// reclaimed in the same collection.
    Companion,
    /// Direct when the host allows it, companion otherwise
    #[default]
    Auto,
}

/// Configuration for a [`WeakManager`](crate::WeakManager)
///
/// # Examples
///
/// ```
/// use weakref::{Strategy, WeakConfig};
///
/// let config = WeakConfig::default()
///     .with_name("sessions")
///     .with_strategy(Strategy::Companion);
/// assert_eq!(config.name, "sessions");
/// assert_eq!(config.strategy, Strategy::Companion);
/// ```
#[derive(Debug, Clone)]
pub struct WeakConfig {
    /// Label used in log output
    ///
    /// Default: `"default"`
    pub name: String,
    /// Default: [`Strategy::Auto`]
    pub strategy: Strategy,
}

impl Default for WeakConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            strategy: Strategy::Auto,
        }
    }
}

impl WeakConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}
