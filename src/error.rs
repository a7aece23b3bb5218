use std::fmt;

/// Router error taxonomy.
///
/// Clonable so a settled task can replay its result to every observer
/// registered after settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Reverse-compiling a path template failed for a parameter.
    ///
    /// Raised when a required parameter is missing or empty, a sequence
    /// is supplied for a non-repeating parameter, or an encoded segment
    /// fails the parameter's own pattern.
    Validation {
        /// The parameter name (or positional index) that failed
        name: String,
        /// Why the parameter was rejected
        reason: String,
    },
    /// Caller misuse that the type system cannot absorb.
    ///
    /// Examples: registering a route with an empty template, or
    /// serializing a bare scalar with no key prefix.
    InvalidArgument(String),
    /// Navigation was attempted before `start()`.
    NotStarted,
    /// A path template produced a matcher that failed to compile.
    Pattern {
        /// The offending template
        template: String,
        /// The underlying regex compile error
        reason: String,
    },
    /// A handler failed or its pending task was rejected.
    Dispatch {
        /// Handler-supplied failure description
        message: String,
    },
    /// No route claimed the path and no not-found handler handled it.
    UnhandledRoute {
        /// The canonical path that went unclaimed
        path: String,
    },
}

impl RouterError {
    /// Shorthand for a [`RouterError::Validation`] failure.
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RouterError::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`RouterError::Dispatch`] failure.
    pub fn dispatch(message: impl Into<String>) -> Self {
        RouterError::Dispatch {
            message: message.into(),
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Validation { name, reason } => {
                write!(f, "invalid value for parameter '{}': {}", name, reason)
            }
            RouterError::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            RouterError::NotStarted => {
                write!(f, "navigation attempted before the router was started")
            }
            RouterError::Pattern { template, reason } => {
                write!(
                    f,
                    "path template '{}' produced an invalid matcher: {}",
                    template, reason
                )
            }
            RouterError::Dispatch { message } => {
                write!(f, "dispatch failed: {}", message)
            }
            RouterError::UnhandledRoute { path } => {
                write!(f, "no route or not-found handler claimed '{}'", path)
            }
        }
    }
}

impl std::error::Error for RouterError {}
