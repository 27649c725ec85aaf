// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Instruction domain: register-level faults at instruction retirement
//!
//! The simulator calls [`InstructionInjector::on_instruction_retired`] once per retirement
//! attempt. Each retired instruction is identified by the core that retired it and its decoder
//! label. In inject mode, a matching descriptor flips bits in the single output register the
//! instruction wrote.

use crate::{
    config::Domain,
    error::{Error, Result},
    injector::{Event, FaultInjector},
    plan::{parse_number, DomainIdentity, FaultDescriptor},
    profile::{split_fields, ProfileEntry},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
/// Identity of a retired instruction
pub struct InstructionIdentity {
    /// Hart id of the core that retired the instruction
    pub core_id: u64,
    /// Decoder label of the instruction, e.g. `p.lw`
    pub label: String,
}

impl InstructionIdentity {
    /// Create an identity
    pub fn new<S: Into<String>>(core_id: u64, label: S) -> Self {
        Self {
            core_id,
            label: label.into(),
        }
    }

    fn matches(&self, insn: &RetiredInstruction<'_>) -> bool {
        self.core_id == insn.core_id && self.label == insn.label
    }
}

impl Display for InstructionIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on core {}", self.label, self.core_id)
    }
}

impl DomainIdentity for InstructionIdentity {
    const DOMAIN: Domain = Domain::Instruction;
    // trigger_iteration mask expected_prior core_id label
    const RECORD_FIELDS: usize = 5;

    fn parse_record(fields: &[&str]) -> Result<FaultDescriptor<Self>> {
        let [trigger_iteration, mask, expected, core_id, label] = fields else {
            return Err(Error::configuration(format!(
                "An instruction fault has {} fields, got {}",
                Self::RECORD_FIELDS,
                fields.len()
            )));
        };

        Ok(FaultDescriptor::builder()
            .trigger_iteration(parse_number(trigger_iteration, "trigger iteration")?)
            .identity(Self::new(parse_number(core_id, "core id")?, *label))
            .corruption_mask(parse_number(mask, "corruption mask")?)
            .expected_prior_value(parse_number(expected, "expected register value")?)
            .build())
    }

    fn validate(descriptor: &FaultDescriptor<Self>) -> Result<()> {
        if descriptor.multi_cell || descriptor.secondary_offset.is_some() {
            return Err(Error::configuration(format!(
                "The fault at iteration {} is multi-cell, which only memory faults support",
                descriptor.trigger_iteration
            )));
        }

        Ok(())
    }

    fn record_fields(descriptor: &FaultDescriptor<Self>) -> Vec<String> {
        vec![
            descriptor.trigger_iteration.to_string(),
            descriptor.corruption_mask.to_string(),
            descriptor.expected_prior_value.to_string(),
            descriptor.identity.core_id.to_string(),
            descriptor.identity.label.clone(),
        ]
    }

    fn outcome_fields(descriptor: &FaultDescriptor<Self>) -> Vec<(&'static str, String)> {
        vec![
            ("trigger_iteration", descriptor.trigger_iteration.to_string()),
            ("corruption_mask", descriptor.corruption_mask.to_string()),
            (
                "expected_prior_value",
                descriptor.expected_prior_value.to_string(),
            ),
            ("core_id", descriptor.identity.core_id.to_string()),
            ("label", descriptor.identity.label.clone()),
        ]
    }
}

#[derive(Debug)]
/// A decoded instruction at retirement, borrowed from the simulator for the duration of one
/// hook call
pub struct RetiredInstruction<'a> {
    /// Decoder label
    pub label: &'a str,
    /// Encoded size in bytes
    pub size: u64,
    /// Hart id of the retiring core
    pub core_id: u64,
    /// Values of the output registers the instruction wrote, in decoder order. The hook may
    /// mutate them.
    pub out_regs: &'a mut [u64],
}

fn write_profile_line(
    f: &mut Formatter<'_>,
    sequence: u64,
    label: &str,
    size: u64,
    core_id: u64,
    out_regs: &[u64],
) -> std::fmt::Result {
    write!(f, "{sequence};{label};{size};{core_id};{}", out_regs.len())?;
    for value in out_regs {
        write!(f, ";{value}")?;
    }
    Ok(())
}

struct RetiredLine<'a, 'b> {
    sequence: u64,
    insn: &'a RetiredInstruction<'b>,
}

impl Display for RetiredLine<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_profile_line(
            f,
            self.sequence,
            self.insn.label,
            self.insn.size,
            self.insn.core_id,
            self.insn.out_regs,
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// One line of an instruction profile log:
/// `counter;label;size;core_id;out_reg_count[;reg_value]*`
pub struct InstructionProfileEntry {
    /// Sequence number of the event
    pub sequence: u64,
    /// Decoder label
    pub label: String,
    /// Encoded size in bytes
    pub size: u64,
    /// Hart id of the retiring core
    pub core_id: u64,
    /// Values of the written output registers
    pub out_regs: Vec<u64>,
}

impl Display for InstructionProfileEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_profile_line(
            f,
            self.sequence,
            &self.label,
            self.size,
            self.core_id,
            &self.out_regs,
        )
    }
}

impl FromStr for InstructionProfileEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields = split_fields(s);
        let [sequence, label, size, core_id, count, values @ ..] = fields.as_slice() else {
            return Err(Error::configuration(format!(
                "Malformed instruction profile line {s:?}"
            )));
        };

        let count = parse_number(count, "output register count")? as usize;
        // Older logs always carry every register slot; only the first `count` are meaningful
        let values = values.get(..count).ok_or_else(|| {
            Error::configuration(format!(
                "Instruction profile line {s:?} declares {count} output registers"
            ))
        })?;

        Ok(Self {
            sequence: parse_number(sequence, "counter")?,
            label: label.to_string(),
            size: parse_number(size, "size")?,
            core_id: parse_number(core_id, "core id")?,
            out_regs: values
                .iter()
                .map(|v| parse_number(v, "register value"))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

impl ProfileEntry for InstructionProfileEntry {
    type Identity = InstructionIdentity;

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn identity(&self) -> InstructionIdentity {
        InstructionIdentity::new(self.core_id, self.label.clone())
    }

    fn to_descriptor(&self, mask: u64) -> Result<FaultDescriptor<InstructionIdentity>> {
        let [value] = self.out_regs.as_slice() else {
            return Err(Error::unsupported_case(format!(
                "Event {} ({}) wrote {} output registers, exactly one is required",
                self.sequence,
                self.label,
                self.out_regs.len()
            )));
        };

        Ok(FaultDescriptor::builder()
            .trigger_iteration(self.sequence)
            .identity(self.identity())
            .corruption_mask(mask)
            .expected_prior_value(*value)
            .build())
    }
}

/// Fault injection context of the instruction domain
pub type InstructionInjector = FaultInjector<InstructionIdentity>;

impl FaultInjector<InstructionIdentity> {
    /// Hook called once per retirement attempt. `None` means the instruction was not decoded;
    /// such attempts are not counted.
    pub fn on_instruction_retired(&self, insn: Option<RetiredInstruction<'_>>) -> Result<()> {
        let Some(mut insn) = insn else {
            return Ok(());
        };

        match self.begin_event()? {
            Event::Disabled => Ok(()),
            Event::Profile => self.profile(|sequence| RetiredLine {
                sequence,
                insn: &insn,
            }),
            Event::Inject { sequence } => self.inject_instruction(sequence, &mut insn),
        }
    }

    fn inject_instruction(&self, sequence: u64, insn: &mut RetiredInstruction<'_>) -> Result<()> {
        let plan = self.plan()?;

        let Some(descriptor) = plan.find_by(sequence, |identity| identity.matches(insn)) else {
            return Ok(());
        };

        let label = insn.label;
        let [register] = &mut *insn.out_regs else {
            return Err(Error::unsupported_case(format!(
                "Only instructions writing exactly one output register are supported, inst label:{label} nb_out_reg:{} iteration:{sequence}",
                insn.out_regs.len()
            )));
        };

        let before = *register;
        if before != descriptor.expected_prior_value {
            return Err(Error::consistency(format!(
                "Run diverged from profile at iteration {sequence}: register value before from file {} differs from current {before}",
                descriptor.expected_prior_value
            )));
        }

        *register = before ^ descriptor.corruption_mask;
        let after = *register;

        self.record_injection(
            sequence,
            descriptor,
            vec![
                ("reg_val_before", before.to_string()),
                ("reg_val_after", after.to_string()),
            ],
        )
    }
}
