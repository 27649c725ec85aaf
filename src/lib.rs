// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Deterministic fault injection for ISA simulators
//!
//! # Overview
//!
//! This crate emulates radiation-induced soft errors in a simulated CPU and its memory without
//! physical beam testing. It is linked into a simulator, which calls one hook per event:
//!
//! - [`InstructionInjector::on_instruction_retired`] when an instruction retires
//! - [`MemoryInjector::on_memory_access`] when memory is read or written
//!
//! # Capabilities
//!
//! Each domain runs in one of three modes, selected by the `SIMFI_INSN_MODE` and
//! `SIMFI_MEM_MODE` settings:
//!
//! - Disabled: events are counted and nothing else happens
//! - Profile: every event appends one line to a profile log. Profiling is deterministic, so an
//!   external planner can pick a target event from the log and a bit mask to corrupt it with
//! - Inject: the plan written by the planner is loaded on first use, and the targeted event's
//!   register or memory byte is XORed with the mask. An outcome record is written for each
//!   applied fault
//!
//! Every error is fatal to the run and carries the location it was raised at. See
//! [`error::Error::report`].

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]

pub mod config;
pub mod counter;
pub mod error;
pub mod injector;
pub mod insn;
pub mod mem;
pub mod outcome;
pub mod plan;
pub mod profile;

pub use config::{ConfigSource, Domain, EnvSource, Mode, Settings};
pub use error::{Error, ErrorKind, Result};
pub use injector::FaultInjector;
pub use insn::{InstructionIdentity, InstructionInjector, InstructionProfileEntry, RetiredInstruction};
pub use mem::{MemoryIdentity, MemoryInjector, MemoryProfileEntry};
pub use outcome::OutcomeRecord;
pub use plan::{FaultDescriptor, InjectionPlan, PLAN_CAPACITY};
pub use profile::ProfileEntry;
