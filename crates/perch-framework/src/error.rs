use miette::Diagnostic;
use thiserror::Error;

/// Framework error type. Construction errors are fatal; the running
/// pipeline never produces these (runtime failures travel as `Status`).
#[derive(Error, Debug, Diagnostic)]
pub enum FrameworkError {
    /// A plugin name was registered (or enabled) twice
    #[error("plugin \"{name}\" already registered")]
    #[diagnostic(
        code(perch::framework::already_registered),
        help("Each plugin name may appear once in the registry and once per extension point")
    )]
    AlreadyRegistered { name: String },

    /// A plugin appeared more than once in the plugin config list
    #[error("repeated config for plugin \"{name}\"")]
    #[diagnostic(
        code(perch::framework::repeated_config),
        help("Provide at most one config blob per plugin")
    )]
    RepeatedConfig { name: String },

    /// An enabled plugin is missing from the registry
    #[error("plugin \"{name}\" is not registered")]
    #[diagnostic(
        code(perch::framework::not_registered),
        help("Register the plugin factory before enabling it in a profile")
    )]
    NotRegistered { name: String },

    /// An enabled plugin does not implement the extension point it is
    /// listed under
    #[error("plugin \"{name}\" does not implement the {extension_point} capability")]
    #[diagnostic(
        code(perch::framework::missing_capability),
        help("List plugins only under extension points they implement")
    )]
    MissingCapability {
        name: String,
        extension_point: &'static str,
    },

    /// A plugin factory returned an error
    #[error("initializing plugin \"{name}\": {message}")]
    #[diagnostic(
        code(perch::framework::factory_failed),
        help("Check the plugin's config blob against its expected argument type")
    )]
    FactoryFailed { name: String, message: String },

    /// A CycleState read missed
    #[error("no state found for key \"{key}\"")]
    #[diagnostic(
        code(perch::framework::state_key_not_found),
        help("The stage that writes this key did not run, or wrote a different type")
    )]
    StateKeyNotFound { key: String },
}

/// Result type alias for framework operations
pub type Result<T> = std::result::Result<T, FrameworkError>;

impl FrameworkError {
    /// Create an AlreadyRegistered error
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    /// Create a RepeatedConfig error
    pub fn repeated_config(name: impl Into<String>) -> Self {
        Self::RepeatedConfig { name: name.into() }
    }

    /// Create a NotRegistered error
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    /// Create a MissingCapability error
    pub fn missing_capability(name: impl Into<String>, extension_point: &'static str) -> Self {
        Self::MissingCapability {
            name: name.into(),
            extension_point,
        }
    }

    /// Create a FactoryFailed error
    pub fn factory_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FactoryFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a StateKeyNotFound error
    pub fn state_key_not_found(key: impl Into<String>) -> Self {
        Self::StateKeyNotFound { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_error_messages() {
        let err = FrameworkError::already_registered("NodeResourcesFit");
        assert!(err.to_string().contains("already registered"));

        let err = FrameworkError::repeated_config("NodeResourcesFit");
        assert!(err.to_string().contains("repeated config for plugin"));

        let err = FrameworkError::missing_capability("NoScore", "Score");
        assert!(err.to_string().contains("Score capability"));
    }
}
