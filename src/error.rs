use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// WAMP error URIs used in ERROR and ABORT messages
pub mod uri {
    pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";
    pub const INVALID_URI: &str = "wamp.error.invalid_uri";
    pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
    pub const PROCEDURE_ALREADY_EXISTS: &str = "wamp.error.procedure_already_exists";
    pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
    pub const NO_SUCH_REALM: &str = "wamp.error.no_such_realm";
    pub const PROTOCOL_VIOLATION: &str = "wamp.error.protocol_violation";
    pub const CANCELED: &str = "wamp.error.canceled";
    pub const NOT_AUTHORIZED: &str = "wamp.error.not_authorized";
    pub const OPERATION_FAILED: &str = "wamp.error.operation_failed";
    pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
    pub const CLOSE_REALM: &str = "wamp.close.close_realm";
    pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Permission denied accessing brightness control at {path}.\n\nTo fix this issue, you can:\n1. Use the logind backend (brightness.backend = \"logind\" in config.toml), which needs no extra permissions\n2. Add a udev rule: Create /etc/udev/rules.d/90-backlight.rules with:\n   SUBSYSTEM==\"backlight\", ACTION==\"add\", RUN+=\"/bin/chgrp video /sys/class/backlight/%k/brightness\", RUN+=\"/bin/chmod g+w /sys/class/backlight/%k/brightness\"\n3. Add {user} to the 'video' group: sudo usermod -a -G video $USER")]
    PermissionDenied { path: PathBuf, user: String },

    #[error("brightness device not available")]
    DeviceNotAvailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error at {location}: {message}")]
    Config { location: String, message: String },

    #[error("Configuration file syntax error: {0}")]
    ConfigSyntax(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Missing dependency for {role}: crate '{crate_name}' is not declared in [dependencies]")]
    MissingDependency { role: String, crate_name: String },

    #[error("IPC communication error: {0}\n\nPossible causes:\n1. Daemon is not running (try: sbs daemon start)\n2. Socket file is stale (try: rm /tmp/screen-brightness-server.sock)\n3. Permission issue with socket file")]
    IpcConnection(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("IPC socket error: {0}")]
    IpcSocket(String),

    #[error("X11 connection error: {0}\n\nNote: pointer control will be disabled. The daemon will continue with reduced functionality.")]
    X11Connection(String),

    #[error("X11 protocol error: {0}")]
    X11Protocol(String),

    #[error("D-Bus error: {0}")]
    DBus(String),

    #[error("{0}")]
    LockUnavailable(String),

    #[error("Service discovery error: {0}")]
    Discovery(String),

    #[error("WAMP protocol error: {0}")]
    Protocol(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("No such procedure: {0}")]
    NoSuchProcedure(String),

    #[error("Procedure already registered: {0}")]
    ProcedureExists(String),

    #[error("No such registration: {0}")]
    NoSuchRegistration(u64),

    #[error("Not authorized to register {0}")]
    NotAuthorized(String),

    #[error("Call canceled: {0}")]
    Canceled(String),

    #[error("{uri}: {message}")]
    Remote { uri: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Component unavailable: {component}\nReason: {reason}")]
    ComponentUnavailable { component: String, reason: String },
}

impl Error {
    /// Create a permission denied error with helpful context
    pub fn permission_denied(path: PathBuf) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "your user".to_string());
        Error::PermissionDenied { path, user }
    }

    /// Create a configuration error with location context
    pub fn config_error(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create an IPC connection error
    pub fn ipc_connection(message: impl Into<String>) -> Self {
        Error::IpcConnection(message.into())
    }

    /// Create an IPC protocol error
    pub fn ipc_protocol(message: impl Into<String>) -> Self {
        Error::IpcProtocol(message.into())
    }

    /// Create an X11 connection error (non-fatal)
    pub fn x11_connection(message: impl Into<String>) -> Self {
        Error::X11Connection(message.into())
    }

    pub fn dbus(message: impl Into<String>) -> Self {
        Error::DBus(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn component_unavailable(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ComponentUnavailable {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable (daemon can continue with degraded functionality)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::X11Connection(_)
                | Error::X11Protocol(_)
                | Error::DBus(_)
                | Error::LockUnavailable(_)
                | Error::DeviceNotAvailable
                | Error::Discovery(_)
                | Error::ComponentUnavailable { .. }
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::ConfigSyntax(_) | Error::ConfigValidation(_)
        )
    }

    /// Check if this error is an IPC error
    pub fn is_ipc_error(&self) -> bool {
        matches!(
            self,
            Error::IpcConnection(_) | Error::IpcProtocol(_) | Error::IpcSocket(_)
        )
    }

    /// The WAMP error URI reported to a caller for this error
    pub fn wamp_uri(&self) -> &str {
        match self {
            Error::InvalidArgument(_) | Error::Parse(_) => uri::INVALID_ARGUMENT,
            Error::InvalidUri(_) => uri::INVALID_URI,
            Error::NoSuchProcedure(_) => uri::NO_SUCH_PROCEDURE,
            Error::ProcedureExists(_) => uri::PROCEDURE_ALREADY_EXISTS,
            Error::NoSuchRegistration(_) => uri::NO_SUCH_REGISTRATION,
            Error::Canceled(_) => uri::CANCELED,
            Error::NotAuthorized(_) => uri::NOT_AUTHORIZED,
            Error::Protocol(_) => uri::PROTOCOL_VIOLATION,
            Error::Remote { uri, .. } => uri,
            _ => uri::OPERATION_FAILED,
        }
    }

    /// Message carried as the first positional argument of an ERROR
    pub fn wamp_message(&self) -> String {
        match self {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
