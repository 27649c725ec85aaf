// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Configuration for each fault injection domain
//!
//! Each domain reads four values: a mode and three file paths. The values come from a
//! [`ConfigSource`], which is the process environment in production and a plain map in tests.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env::var,
    fmt::Display,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The two intercepted event domains
pub enum Domain {
    /// Retired instructions, faults target an output register
    Instruction,
    /// Memory accesses, faults target a byte of the backing store
    Memory,
}

impl Domain {
    const AS_STRING: &'static [(&'static str, Self)] =
        &[("insn", Self::Instruction), ("mem", Self::Memory)];

    /// The prefix for configuration keys of this domain
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Domain::Instruction => "SIMFI_INSN_",
            Domain::Memory => "SIMFI_MEM_",
        }
    }

    /// The full configuration key for `suffix` in this domain
    pub fn key(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.key_prefix())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::AS_STRING
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, domain)| *domain)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "Invalid domain {s}. Expected one of {}",
                    Self::AS_STRING
                        .iter()
                        .map(|i| i.0)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = Self::AS_STRING
            .iter()
            .find(|(_, domain)| domain == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Operating mode of a domain, resolved once per run
pub enum Mode {
    #[default]
    /// No mode configured. Events are still counted.
    Disabled,
    /// Append one record per event to the profile log
    Profile,
    /// Replay the plan and corrupt state at the planned events
    Inject,
}

impl Mode {
    const AS_STRING: &'static [(&'static str, Self)] =
        &[("profile", Self::Profile), ("inject", Self::Inject)];

    /// Resolve the mode from an optional configured value. Absence means [`Mode::Disabled`],
    /// anything that is not a known mode is a configuration error.
    pub fn resolve(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(Self::Disabled),
            Some(value) => value.parse(),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    /// Modes are integers on the wire, `0` for profile and `1` for inject. The names are accepted
    /// as well.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();

        match trimmed.parse::<u8>() {
            Ok(0) => Some(Self::Profile),
            Ok(1) => Some(Self::Inject),
            Ok(_) => None,
            Err(_) => Self::AS_STRING
                .iter()
                .find(|(name, _)| *name == trimmed)
                .map(|(_, mode)| *mode),
        }
        .ok_or_else(|| {
            Error::configuration(format!(
                "Invalid run mode {s:?}. Expected 0, 1, {}",
                Self::AS_STRING
                    .iter()
                    .map(|i| i.0)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Disabled => write!(f, "disabled"),
            Mode::Profile => write!(f, "profile"),
            Mode::Inject => write!(f, "inject"),
        }
    }
}

/// A source of raw configuration values
pub trait ConfigSource {
    /// Get the value for `key`, or `None` if it is not set
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Reads configuration values from the process environment
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

#[derive(TypedBuilder, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
/// Raw configuration of one domain. The mode is kept unparsed so that an invalid value only
/// becomes fatal when the domain first needs it.
pub struct Settings {
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    /// The configured mode value, if any
    pub mode: Option<String>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    /// Where profile records are appended
    pub profile_path: Option<PathBuf>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    /// Where the injection plan is read from
    pub plan_path: Option<PathBuf>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    /// Where the outcome record is written
    pub outcome_path: Option<PathBuf>,
}

impl Settings {
    /// Key suffix of the mode value
    pub const MODE: &'static str = "MODE";
    /// Key suffix of the profile log path
    pub const PROFILE_FILE: &'static str = "PROFILE_FILE";
    /// Key suffix of the plan path
    pub const PLAN_FILE: &'static str = "PLAN_FILE";
    /// Key suffix of the outcome path
    pub const OUTCOME_FILE: &'static str = "OUTCOME_FILE";

    /// Read the settings of `domain` from `source`
    pub fn from_source<S: ConfigSource + ?Sized>(domain: Domain, source: &S) -> Self {
        Self {
            mode: source.get(&domain.key(Self::MODE)),
            profile_path: source.get(&domain.key(Self::PROFILE_FILE)).map(PathBuf::from),
            plan_path: source.get(&domain.key(Self::PLAN_FILE)).map(PathBuf::from),
            outcome_path: source.get(&domain.key(Self::OUTCOME_FILE)).map(PathBuf::from),
        }
    }

    /// Read the settings of `domain` from the process environment
    pub fn from_env(domain: Domain) -> Self {
        Self::from_source(domain, &EnvSource)
    }

    /// Read settings from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_to_string(path).map_err(|e| {
            Error::configuration_io(format!("Not able to read settings file {path:?}"), e)
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            Error::configuration(format!("Malformed settings file {path:?}: {e}"))
        })
    }

    /// Resolve the configured mode
    pub fn resolve_mode(&self) -> Result<Mode> {
        Mode::resolve(self.mode.as_deref())
    }

    /// The profile path, which is required in profile mode
    pub fn require_profile_path(&self) -> Result<&Path> {
        self.profile_path
            .as_deref()
            .ok_or_else(|| Error::configuration("Profile mode requires a profile file path"))
    }

    /// The plan path, which is required in inject mode
    pub fn require_plan_path(&self) -> Result<&Path> {
        self.plan_path
            .as_deref()
            .ok_or_else(|| Error::configuration("Inject mode requires a plan file path"))
    }

    /// The outcome path, which is required in inject mode
    pub fn require_outcome_path(&self) -> Result<&Path> {
        self.outcome_path
            .as_deref()
            .ok_or_else(|| Error::configuration("Inject mode requires an outcome file path"))
    }
}
