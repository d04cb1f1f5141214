//! `CRH_*` environment overrides.
//!
//! [`EnvParser`] reads one variable per call and tags the result with its
//! origin. A value that fails to parse or falls outside its range keeps
//! the caller's default, and the problem is queued so every bad variable
//! can be reported after a single pass.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use super::source::Sourced;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("{var}: '{value}' is not a valid {expected}")]
    Unparsable {
        var: String,
        value: String,
        expected: &'static str,
    },

    #[error("{var}: {value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{var}: unknown log level '{value}'")]
    UnknownLogLevel { var: String, value: String },
}

/// Reads prefixed environment variables, collecting errors as it goes.
#[derive(Debug)]
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::with_prefix("CRH_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Errors queued since the last call.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn lookup(&self, name: &str) -> (String, Option<String>) {
        let var = format!("{}{name}", self.prefix);
        let value = env::var(&var).ok();
        (var, value)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// `None` when unset or set to the empty string.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(Some(value).filter(|v| !v.is_empty()), var),
            (_, None) => Sourced::default_value(None),
        }
    }

    /// A number within `min..=max`.
    pub fn get_in_range<T>(&mut self, name: &str, default: T, min: T, max: T) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) if min <= value && value <= max => Sourced::from_env(value, var),
            Ok(value) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: value.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::Unparsable {
                    var,
                    value: raw,
                    expected: std::any::type_name::<T>(),
                });
                Sourced::default_value(default)
            }
        }
    }

    /// A path, with a leading `~/` expanded to the home directory.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(expand_home(&value), var),
            (_, None) => Sourced::default_value(expand_home(default)),
        }
    }

    /// A tracing level name, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let level = raw.trim().to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.errors.push(EnvError::UnknownLogLevel { var, value: raw });
            Sourced::default_value(default.to_string())
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
