// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Error types that can be returned by the fault injection hooks
//!
//! Every error here is fatal for the simulated run. Hooks return them to the simulator, which is
//! expected to stop the run instead of continuing with unreliable fault injection state.

use std::{
    fmt::{Display, Formatter},
    panic::Location,
};

/// Result type for fallible operations in this crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The category of a fatal error, independent of its message and raise site
pub enum ErrorKind {
    /// Unreadable or malformed plan or log file, invalid mode, oversized or ambiguous plan
    Configuration,
    /// A memory target lies outside the declared region
    Bounds,
    /// The observed pre-fault value differs from the profiled one
    Consistency,
    /// The event cannot be injected unambiguously
    UnsupportedCase,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Bounds => "bounds",
            ErrorKind::Consistency => "consistency",
            ErrorKind::UnsupportedCase => "unsupported case",
        };
        write!(f, "{name}")
    }
}

#[derive(thiserror::Error, Debug)]
/// Fatal fault injection errors. Each carries the location it was raised from.
pub enum Error {
    #[error("Configuration error: {message} (at {location})")]
    /// A configuration value, plan file or log file could not be used
    Configuration {
        /// What went wrong
        message: String,
        /// Where the error was raised
        location: &'static Location<'static>,
        #[source]
        /// The I/O error that caused this error, if any
        source: Option<std::io::Error>,
    },
    #[error("Bounds error: {message} (at {location})")]
    /// A memory fault target is outside the accessed region
    Bounds {
        /// What went wrong
        message: String,
        /// Where the error was raised
        location: &'static Location<'static>,
    },
    #[error("Consistency error: {message} (at {location})")]
    /// The run diverged from the run the plan was built against
    Consistency {
        /// What went wrong
        message: String,
        /// Where the error was raised
        location: &'static Location<'static>,
    },
    #[error("Unsupported case: {message} (at {location})")]
    /// The event matched a descriptor but cannot be injected
    UnsupportedCase {
        /// What went wrong
        message: String,
        /// Where the error was raised
        location: &'static Location<'static>,
    },
}

impl Error {
    #[track_caller]
    /// Raise a configuration error at the caller's location
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            location: Location::caller(),
            source: None,
        }
    }

    #[track_caller]
    /// Raise a configuration error caused by an I/O failure at the caller's location
    pub fn configuration_io<S: Into<String>>(message: S, source: std::io::Error) -> Self {
        Self::Configuration {
            message: message.into(),
            location: Location::caller(),
            source: Some(source),
        }
    }

    #[track_caller]
    /// Raise a bounds error at the caller's location
    pub fn bounds<S: Into<String>>(message: S) -> Self {
        Self::Bounds {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    /// Raise a consistency error at the caller's location
    pub fn consistency<S: Into<String>>(message: S) -> Self {
        Self::Consistency {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    /// Raise an unsupported case error at the caller's location
    pub fn unsupported_case<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedCase {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Bounds { .. } => ErrorKind::Bounds,
            Error::Consistency { .. } => ErrorKind::Consistency,
            Error::UnsupportedCase { .. } => ErrorKind::UnsupportedCase,
        }
    }

    /// The message the error was raised with
    pub fn message(&self) -> &str {
        match self {
            Error::Configuration { message, .. }
            | Error::Bounds { message, .. }
            | Error::Consistency { message, .. }
            | Error::UnsupportedCase { message, .. } => message,
        }
    }

    /// The source location the error was raised at
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            Error::Configuration { location, .. }
            | Error::Bounds { location, .. }
            | Error::Consistency { location, .. }
            | Error::UnsupportedCase { location, .. } => location,
        }
    }

    /// Single-line fatal report in the form experiment drivers scan simulator output for.
    /// Drivers use the marker to tell a harness failure apart from a fault-induced crash.
    pub fn report(&self) -> String {
        format!(
            "SIMFI_ERROR:::{}:::AT:{}:{}",
            self.message(),
            self.location().file(),
            self.location().line()
        )
    }
}
