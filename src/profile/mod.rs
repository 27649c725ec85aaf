// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Profile logs
//!
//! In profile mode every valid event appends one `;` separated line to the domain's profile log.
//! The log is never truncated, so repeated profiling of a deterministic program appends identical
//! blocks of lines. The planner reads the log back through [`ProfileEntry`] to build plans.

use crate::{
    error::{Error, Result},
    plan::{DomainIdentity, FaultDescriptor},
};
use std::{
    fmt::Display,
    fs::{read_to_string, OpenOptions},
    io::Write,
    path::Path,
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

#[derive(Debug, Default)]
/// Append-only profile log shared by concurrent cores. A core holds the log's lock from taking
/// its sequence number until its line is written, so lines never interleave and appear in
/// sequence order.
pub struct ProfileLog {
    lock: Mutex<()>,
}

impl ProfileLog {
    /// Create a profile log
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive use of the log
    pub fn lock(&self) -> Result<ProfileWriter<'_>> {
        self.lock
            .lock()
            .map(ProfileWriter)
            .map_err(|_| Error::configuration("The profile log lock was poisoned"))
    }
}

/// Exclusive access to a [`ProfileLog`]
pub struct ProfileWriter<'a>(MutexGuard<'a, ()>);

impl ProfileWriter<'_> {
    /// Append `line` and a newline to the log at `path`, creating it if needed. The file is opened
    /// and closed for every line so nothing is lost if the simulator is killed.
    pub fn append<L: Display>(&mut self, path: &Path, line: L) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::configuration_io(
                    format!("Not able to open the profiler file {}", path.display()),
                    e,
                )
            })?;

        writeln!(file, "{line}").map_err(|e| {
            Error::configuration_io(
                format!("Not able to write the profiler file {}", path.display()),
                e,
            )
        })
    }
}

/// One parsed line of a domain's profile log
pub trait ProfileEntry: FromStr<Err = Error> + Display {
    /// The identity type of the domain the entry belongs to
    type Identity: DomainIdentity;

    /// The event's sequence number
    fn sequence(&self) -> u64;

    /// The event's identity
    fn identity(&self) -> Self::Identity;

    /// A descriptor that corrupts this event's target with `mask` in a replay of the profiled run
    fn to_descriptor(&self, mask: u64) -> Result<FaultDescriptor<Self::Identity>>;
}

/// Split a profile line into its fields. A trailing separator is tolerated.
pub fn split_fields(line: &str) -> Vec<&str> {
    let line = line.trim_end();
    line.strip_suffix(';').unwrap_or(line).split(';').collect()
}

/// Read every entry of the profile log at `path`
pub fn read_profile<E: ProfileEntry, P: AsRef<Path>>(path: P) -> Result<Vec<E>> {
    let path = path.as_ref();
    let text = read_to_string(path).map_err(|e| {
        Error::configuration_io(
            format!("Not able to read the profiler file {}", path.display()),
            e,
        )
    })?;

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Find the entry with sequence number `sequence` in the profile log at `path`. When the log holds
/// several profiling passes, the first pass wins.
pub fn find_entry<E: ProfileEntry, P: AsRef<Path>>(path: P, sequence: u64) -> Result<E> {
    let path = path.as_ref();

    read_profile::<E, _>(path)?
        .into_iter()
        .find(|entry| entry.sequence() == sequence)
        .ok_or_else(|| {
            Error::configuration(format!(
                "No event {sequence} in profiler file {}",
                path.display()
            ))
        })
}
