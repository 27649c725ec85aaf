// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Outcome records, written once for every fault that is actually applied

use crate::{
    error::{Error, Result},
    plan::{DomainIdentity, FaultDescriptor},
};
use std::{
    fmt::{Display, Formatter},
    fs::{read_to_string, write},
    path::Path,
    sync::Mutex,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// The observed values around an injection followed by the descriptor that caused it, as ordered
/// `key:value` pairs
pub struct OutcomeRecord {
    fields: Vec<(String, String)>,
}

impl OutcomeRecord {
    /// Build a record from the values observed at the target and the matched descriptor
    pub fn new<I: DomainIdentity>(
        observed: Vec<(&'static str, String)>,
        descriptor: &FaultDescriptor<I>,
    ) -> Self {
        Self {
            fields: observed
                .into_iter()
                .chain(I::outcome_fields(descriptor))
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    /// Read a record back from `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path).map_err(|e| {
            Error::configuration_io(
                format!("Not able to read the injection output file {}", path.display()),
                e,
            )
        })?;

        let fields = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| {
                        Error::configuration(format!("Malformed outcome line {line:?}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { fields })
    }

    /// The value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All fields in record order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

impl Display for OutcomeRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.fields {
            writeln!(f, "{key}:{value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
/// Writer for the outcome file. Each write replaces the previous record; writes from concurrent
/// cores are serialized.
pub struct OutcomeLog {
    lock: Mutex<()>,
}

impl OutcomeLog {
    /// Create an outcome writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the file at `path` with `record`
    pub fn write(&self, path: &Path, record: &OutcomeRecord) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::configuration("The outcome file lock was poisoned"))?;

        write(path, record.to_string()).map_err(|e| {
            Error::configuration_io(
                format!("Not able to write the injection output file {}", path.display()),
                e,
            )
        })
    }
}
