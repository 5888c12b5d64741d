// Error types for the Sprig framework

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors, raised synchronously at the call site
    #[error("Logic error: {0}")]
    Logic(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Circular dependency while resolving \"{0}\"")]
    CircularDependency(String),

    #[error("Service \"{key}\" is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Invalid mount: {0}")]
    InvalidMount(String),

    #[error("Invalid route \"{pattern}\": {reason}")]
    InvalidRoute { pattern: String, reason: String },

    // Routing errors
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed: {message}")]
    MethodNotAllowed { message: String, allowed: Vec<String> },

    // URL generation errors
    #[error("Unknown route name: {0}")]
    UnknownRoute(String),

    #[error("Missing parameter \"{parameter}\" to generate a URL for route \"{route}\"")]
    MissingParameter { route: String, parameter: String },

    #[error("Parameter \"{parameter}\" for route \"{route}\" must match \"{requirement}\" (\"{value}\" given)")]
    InvalidParameter {
        route: String,
        parameter: String,
        requirement: String,
        value: String,
    },

    // Controller errors
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    #[error("Controller for route \"{route}\" requires a value for the \"{argument}\" argument")]
    MissingArgument { route: String, argument: String },

    #[error("The controller must return a response ({0} given)")]
    InvalidControllerResult(String),

    // Explicit aborts from handlers and listeners
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        headers: HashMap<String, String>,
    },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) | Error::ControllerNotFound(_) => 404,
            Error::MethodNotAllowed { .. } => 405,
            Error::Deserialization(_) => 400,
            Error::Http { status, .. } => *status,
            _ => 500,
        }
    }

    /// Headers the error wants on the rendered response
    pub fn headers(&self) -> HashMap<String, String> {
        match self {
            Error::Http { headers, .. } => headers.clone(),
            Error::MethodNotAllowed { allowed, .. } => {
                HashMap::from([("Allow".to_string(), allowed.join(", "))])
            }
            _ => HashMap::new(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Whether this error was raised through [`abort`]
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Http { .. })
    }
}

/// Build a structured HTTP error to be returned from a handler or listener.
///
/// ```
/// use sprig_core::{abort, Error};
///
/// fn guard(authorized: bool) -> Result<(), Error> {
///     if !authorized {
///         return Err(abort(403, "Forbidden", &[]));
///     }
///     Ok(())
/// }
///
/// assert_eq!(guard(false).unwrap_err().status_code(), 403);
/// ```
pub fn abort(status: u16, message: impl Into<String>, headers: &[(&str, &str)]) -> Error {
    Error::Http {
        status,
        message: message.into(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}
