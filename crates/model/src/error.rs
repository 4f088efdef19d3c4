use thiserror::Error;

/// Convenience type alias for results in the topology model.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing, applying or validating topology values.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// A `host:port` string could not be parsed.
    #[error("invalid address '{input}': {reason}")]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A unique identifier could not be parsed.
    #[error("invalid identifier '{input}'")]
    InvalidUid {
        /// The rejected input.
        input: String,
    },

    /// A setting name is not known.
    #[error("unknown setting '{name}'")]
    UnknownSetting {
        /// The unknown name.
        name: String,
    },

    /// A setting value is malformed.
    #[error("invalid value '{value}' for setting {setting}: {reason}")]
    InvalidValue {
        /// The setting name.
        setting: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration string does not follow the setting grammar.
    #[error("invalid configuration '{input}': {reason}")]
    InvalidConfiguration {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation is not permitted on the setting in this scope or cluster phase.
    #[error("illegal operation on '{setting}': {reason}")]
    IllegalOperation {
        /// The setting or configuration.
        setting: String,
        /// Why it is not permitted.
        reason: String,
    },

    /// A stripe or node referenced by name or position does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The cluster failed structural validation.
    #[error("invalid cluster: {0}")]
    Validation(String),
}
