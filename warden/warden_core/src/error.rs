//! Error types for the Warden tenant host.
//!
//! Errors are organized by subsystem. The root error type, `Error`, wraps each
//! subsystem error so callers can match on the kind they care about while
//! still propagating everything with `?`.

use thiserror::Error;

/// Root error type for the Warden host.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration. Fatal to the current attempt.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Isolation boundary errors
    #[error("Isolation error: {0}")]
    Isolation(#[from] IsolationError),

    /// Lifecycle phase errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Errors raised by the value model while running tenant code
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// General runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
///
/// These are never retried: the caller has to fix the tenant or the
/// framework configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The tenant exports no usable `bootstrap`/`mount`/`unmount` triple
    #[error("You need to export lifecycle functions in {0} entry")]
    MissingLifecycles(String),

    /// Two sandbox options that cannot be combined
    #[error("{0} can not be used with {1}")]
    IncompatibleOptions(String, String),

    /// The mount container could not be found
    #[error("Target container with {container} not existed {context}")]
    MissingContainer {
        /// The container selector or description
        container: String,
        /// Which phase was looking for it
        context: String,
    },

    /// The tenant wrapper element could not be found
    #[error("Wrapper element for {0} is not existed")]
    MissingWrapper(String),

    /// A configuration value could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// A configuration value is semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Isolation boundary errors.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// The virtual global handle was used after its boundary was dropped
    #[error("Global environment for {0} is no longer alive")]
    GlobalDropped(String),

    /// A side-effect patcher could not install itself
    #[error("Patcher {patcher} failed for {tenant}: {reason}")]
    PatchFailed {
        /// Patcher name
        patcher: String,
        /// Tenant instance name
        tenant: String,
        /// Cause
        reason: String,
    },
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A step in a lifecycle phase failed; the remaining steps were skipped
    #[error("{phase} step {step} of {tenant} failed: {source}")]
    PhaseFailed {
        /// Tenant instance name
        tenant: String,
        /// Phase name (`load`, `bootstrap`, `mount`, `unmount`, `update`)
        phase: String,
        /// Zero-based index of the failing step
        step: usize,
        /// Cause
        #[source]
        source: Box<Error>,
    },

    /// The requested transition is not valid from the current state
    #[error("Tenant {tenant} can not {action} while {state}")]
    InvalidState {
        /// Tenant instance name
        tenant: String,
        /// Requested action
        action: String,
        /// Current state
        state: String,
    },

    /// The asset-loading collaborator failed
    #[error("Failed to load assets of {0}: {1}")]
    AssetLoadFailed(String, String),

    /// Tenant code threw while it was evaluated
    #[error("Tenant {0} failed to evaluate: {1}")]
    ExecutionFailed(String, String),

    /// A lifecycle function returned an error
    #[error("Tenant {0} rejected: {1}")]
    Rejected(String, String),
}

/// Type errors raised by the value model.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// A native function was invoked with a receiver it does not accept
    #[error("Illegal invocation of {0}")]
    IllegalInvocation(String),

    /// A non-callable value was called
    #[error("{0} is not a function")]
    NotCallable(String),

    /// An async function was called synchronously
    #[error("{0} is async and must be awaited")]
    AsyncCall(String),

    /// A read or write hit a property that refuses it
    #[error("Cannot {action} property {key}")]
    PropertyRejected {
        /// `define`, `assign` or `delete`
        action: String,
        /// Property key
        key: String,
    },

    /// A value had the wrong type
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        actual: String,
    },
}

/// Result type used throughout Warden.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let config_error = ConfigError::MissingLifecycles("alpha".to_string());
        let error: Error = config_error.into();

        match error {
            Error::Config(ConfigError::MissingLifecycles(name)) => assert_eq!(name, "alpha"),
            _ => panic!("Expected Config::MissingLifecycles error"),
        }

        let env_error = EnvironmentError::IllegalInvocation("fetch".to_string());
        let error: Error = env_error.into();
        assert_eq!(
            error.to_string(),
            "Environment error: Illegal invocation of fetch"
        );
    }

    #[test]
    fn test_phase_failure_display() {
        let error = LifecycleError::PhaseFailed {
            tenant: "alpha".to_string(),
            phase: "mount".to_string(),
            step: 4,
            source: Box::new(Error::Runtime("boom".to_string())),
        };
        assert_eq!(
            error.to_string(),
            "mount step 4 of alpha failed: Runtime error: boom"
        );
    }
}
