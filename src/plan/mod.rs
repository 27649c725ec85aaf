// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Injection plans shared by both domains
//!
//! A plan is a short list of fault descriptors produced by an external planner from a profile
//! log. The on-disk format is whitespace separated: a descriptor count followed by that many
//! records. The record layout is defined by the domain's [`DomainIdentity`].

use crate::{
    config::Domain,
    error::{Error, Result},
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::HashSet,
    fmt::{Debug, Display, Formatter},
    fs::read_to_string,
    hash::Hash,
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};
use tracing::debug;
use typed_builder::TypedBuilder;

/// Maximum number of descriptors a single run may carry
pub const PLAN_CAPACITY: usize = 3;

/// The domain-specific part of a fault descriptor: what an event must look like to be targeted,
/// and how the domain's records are laid out in plan files and outcome records.
pub trait DomainIdentity:
    Clone + Debug + Display + PartialEq + Eq + Hash + Send + Sync + 'static
{
    /// The domain this identity belongs to
    const DOMAIN: Domain;
    /// The number of whitespace separated fields in one plan record
    const RECORD_FIELDS: usize;
    /// Whether a plan may consist of a single record with no count header
    const ACCEPTS_BARE_RECORD: bool = false;

    /// Build a descriptor from exactly [`Self::RECORD_FIELDS`] plan fields
    fn parse_record(fields: &[&str]) -> Result<FaultDescriptor<Self>>;

    /// Check that `descriptor` describes a fault this domain can apply. Every descriptor passes
    /// through here before it becomes part of a plan, however the plan was built.
    fn validate(_descriptor: &FaultDescriptor<Self>) -> Result<()> {
        Ok(())
    }

    /// The plan fields of `descriptor`, in file order
    fn record_fields(descriptor: &FaultDescriptor<Self>) -> Vec<String>;

    /// The `key:value` pairs echoing `descriptor` in an outcome record
    fn outcome_fields(descriptor: &FaultDescriptor<Self>) -> Vec<(&'static str, String)>;
}

#[derive(TypedBuilder, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
/// A single planned fault
pub struct FaultDescriptor<I> {
    /// Sequence number of the event to corrupt
    pub trigger_iteration: u64,
    /// What the event at `trigger_iteration` must look like
    pub identity: I,
    /// Bits to flip in the target
    pub corruption_mask: u64,
    /// The target's value recorded during profiling
    pub expected_prior_value: u64,
    #[builder(default, setter(strip_option))]
    /// Distance from the primary to the secondary cell of a multi-cell upset
    pub secondary_offset: Option<u64>,
    #[builder(default)]
    /// Whether the secondary cell is corrupted as well
    pub multi_cell: bool,
}

impl<I: DomainIdentity> Display for FaultDescriptor<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", I::record_fields(self).join(" "))
    }
}

/// Parse an unsigned plan field, decimal or `0x` prefixed hexadecimal
pub fn parse_number(field: &str, name: &str) -> Result<u64> {
    let parsed = if let Some(hex) = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        field.parse::<u64>()
    };

    parsed.map_err(|e| Error::configuration(format!("Invalid {name} {field:?}: {e}")))
}

/// Parse a boolean plan field
pub fn parse_flag(field: &str, name: &str) -> Result<bool> {
    match field {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(Error::configuration(format!(
            "Invalid {name} {field:?}: expected 0, 1, true or false"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// An ordered, bounded, validated list of fault descriptors. It serializes as the list of its
/// descriptors and deserializes through [`InjectionPlan::new`].
pub struct InjectionPlan<I> {
    descriptors: Vec<FaultDescriptor<I>>,
}

impl<I: DomainIdentity> InjectionPlan<I> {
    /// Validate a list of descriptors into a plan. The list must fit in [`PLAN_CAPACITY`], every
    /// descriptor must pass [`DomainIdentity::validate`], and no two descriptors may target the
    /// same `(trigger_iteration, identity)` pair.
    pub fn new(descriptors: Vec<FaultDescriptor<I>>) -> Result<Self> {
        if descriptors.len() > PLAN_CAPACITY {
            return Err(Error::configuration(format!(
                "The plan has {} faults, more than the maximum number of faults per run: {PLAN_CAPACITY}",
                descriptors.len()
            )));
        }

        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            I::validate(descriptor)?;

            if !seen.insert((descriptor.trigger_iteration, &descriptor.identity)) {
                return Err(Error::configuration(format!(
                    "Ambiguous plan: more than one fault at iteration {} for {}",
                    descriptor.trigger_iteration, descriptor.identity
                )));
            }
        }

        Ok(Self { descriptors })
    }

    /// Parse a plan from its textual form
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = text.split_whitespace().collect::<Vec<_>>();

        if I::ACCEPTS_BARE_RECORD && tokens.len() == I::RECORD_FIELDS {
            return Self::new(vec![I::parse_record(&tokens)?]);
        }

        let (count, records) = tokens
            .split_first()
            .ok_or_else(|| Error::configuration("The plan is empty, expected a fault count"))?;
        let count = parse_number(count, "fault count")?;

        if count > PLAN_CAPACITY as u64 {
            return Err(Error::configuration(format!(
                "The plan has {count} faults, more than the maximum number of faults per run: {PLAN_CAPACITY}"
            )));
        }

        let expected = count as usize * I::RECORD_FIELDS;
        if records.len() != expected {
            return Err(Error::configuration(format!(
                "The plan declares {count} faults of {} fields each ({expected} fields) but has {}",
                I::RECORD_FIELDS,
                records.len()
            )));
        }

        Self::new(
            records
                .chunks(I::RECORD_FIELDS)
                .map(I::parse_record)
                .collect::<Result<Vec<_>>>()?,
        )
    }

    /// Read and parse a plan file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path).map_err(|e| {
            Error::configuration_io(
                format!("Not able to read the injection input file {}", path.display()),
                e,
            )
        })?;

        Self::parse(&text)
    }

    /// The descriptor targeting event `sequence` with identity `identity`, if any
    pub fn find(&self, sequence: u64, identity: &I) -> Option<&FaultDescriptor<I>> {
        self.find_by(sequence, |candidate| candidate == identity)
    }

    /// The descriptor targeting event `sequence` whose identity satisfies `matches`. Lets hooks
    /// compare against borrowed event data without building an identity for every event.
    pub fn find_by<F: Fn(&I) -> bool>(
        &self,
        sequence: u64,
        matches: F,
    ) -> Option<&FaultDescriptor<I>> {
        self.descriptors.iter().find(|descriptor| {
            descriptor.trigger_iteration == sequence && matches(&descriptor.identity)
        })
    }

    /// The descriptors in plan order
    pub fn descriptors(&self) -> &[FaultDescriptor<I>] {
        &self.descriptors
    }

    /// The number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the plan has no descriptors
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<I: DomainIdentity> TryFrom<Vec<FaultDescriptor<I>>> for InjectionPlan<I> {
    type Error = Error;

    fn try_from(descriptors: Vec<FaultDescriptor<I>>) -> Result<Self> {
        Self::new(descriptors)
    }
}

impl<I: DomainIdentity + Serialize> Serialize for InjectionPlan<I> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.descriptors.serialize(serializer)
    }
}

impl<'de, I: DomainIdentity + Deserialize<'de>> Deserialize<'de> for InjectionPlan<I> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<FaultDescriptor<I>>::deserialize(deserializer)?
            .try_into()
            .map_err(D::Error::custom)
    }
}

impl<I: DomainIdentity> Display for InjectionPlan<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.descriptors.len())?;
        for descriptor in &self.descriptors {
            writeln!(f, "{descriptor}")?;
        }
        Ok(())
    }
}

/// A plan that is read from disk the first time it is needed and then reused for the rest of
/// the run. Concurrent first callers load it exactly once.
pub struct PlanCell<I> {
    plan: OnceLock<Arc<InjectionPlan<I>>>,
    load_lock: Mutex<()>,
}

impl<I> Default for PlanCell<I> {
    fn default() -> Self {
        Self {
            plan: OnceLock::new(),
            load_lock: Mutex::new(()),
        }
    }
}

impl<I: DomainIdentity> PlanCell<I> {
    /// Create an empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cell that already holds `plan`, so `path` is never read
    pub fn preloaded(plan: InjectionPlan<I>) -> Self {
        let cell = Self::default();
        // A fresh cell is always empty
        let _ = cell.plan.set(Arc::new(plan));
        cell
    }

    /// The cached plan, if it has been loaded
    pub fn get(&self) -> Option<&Arc<InjectionPlan<I>>> {
        self.plan.get()
    }

    /// The cached plan, loading it from `path` if this is the first request. A failed load is not
    /// cached.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<InjectionPlan<I>>> {
        if let Some(plan) = self.plan.get() {
            return Ok(plan.clone());
        }

        let _guard = self
            .load_lock
            .lock()
            .map_err(|_| Error::configuration("The plan load lock was poisoned"))?;

        if let Some(plan) = self.plan.get() {
            return Ok(plan.clone());
        }

        let plan = Arc::new(InjectionPlan::<I>::load(path)?);

        debug!(
            domain = %I::DOMAIN,
            faults = plan.len(),
            "Loaded injection plan from {}",
            path.display()
        );

        Ok(self.plan.get_or_init(|| plan).clone())
    }
}
