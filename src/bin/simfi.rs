// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Planner-side command line tool: derives injection plans from profile logs, validates plans
//! before a campaign, and reads back outcome records

use anyhow::{anyhow, ensure, Result};
use clap::{Parser, Subcommand};
use serde_json::{to_string_pretty, Map, Value};
use simfi::{
    plan::parse_number,
    profile::{find_entry, ProfileEntry},
    Domain, FaultDescriptor, InjectionPlan, InstructionIdentity, InstructionProfileEntry,
    MemoryIdentity, MemoryProfileEntry, OutcomeRecord,
};
use std::{
    io::stderr,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
    registry, Layer,
};

fn parse_u64(value: &str) -> simfi::Result<u64> {
    parse_number(value, "number")
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(short = 'l', long, default_value_t = LevelFilter::WARN)]
    /// Output log level
    ///
    /// Logging level may be set to ERROR, WARN, INFO, DEBUG, or TRACE. Directives in RUST_LOG
    /// take precedence.
    log_level: LevelFilter,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that a plan file would load, and print it in normalized form
    Validate {
        #[arg(short = 'd', long)]
        /// Domain of the plan, 'insn' or 'mem'
        domain: Domain,
        /// Path to the plan file
        plan: PathBuf,
    },
    /// Build a plan targeting profiled events and print it
    ///
    /// Each event is looked up by sequence number in the profile log and the value recorded
    /// there becomes the expected prior value of its fault.
    Derive {
        #[arg(short = 'd', long)]
        /// Domain of the profile log, 'insn' or 'mem'
        domain: Domain,
        #[arg(short = 'p', long)]
        /// Path to the profile log
        profile: PathBuf,
        #[arg(short = 'e', long = "event", required = true, value_parser = parse_u64)]
        /// Sequence number of an event to corrupt. May be repeated.
        events: Vec<u64>,
        #[arg(short = 'm', long, value_parser = parse_u64)]
        /// Bit mask XORed into the target, decimal or 0x prefixed hexadecimal
        mask: u64,
        #[arg(short = 's', long, value_parser = parse_u64)]
        /// Distance to a second corrupted byte (memory domain only)
        secondary_offset: Option<u64>,
    },
    /// Print an outcome record as JSON
    Outcome {
        /// Path to the outcome file
        outcome: PathBuf,
    },
}

fn derive<E: ProfileEntry>(
    profile: &Path,
    events: &[u64],
    derive_one: impl Fn(&E) -> simfi::Result<FaultDescriptor<E::Identity>>,
) -> Result<InjectionPlan<E::Identity>> {
    let descriptors = events
        .iter()
        .map(|event| {
            let entry = find_entry::<E, _>(profile, *event)?;
            debug!("Deriving fault from profiled event {entry}");
            derive_one(&entry)
        })
        .collect::<simfi::Result<Vec<_>>>()?;

    Ok(InjectionPlan::new(descriptors)?)
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Validate { domain, plan } => {
            let text = match domain {
                Domain::Instruction => InjectionPlan::<InstructionIdentity>::load(&plan)?.to_string(),
                Domain::Memory => InjectionPlan::<MemoryIdentity>::load(&plan)?.to_string(),
            };
            info!("Plan {} is valid", plan.display());
            print!("{text}");
        }
        Command::Derive {
            domain,
            profile,
            events,
            mask,
            secondary_offset,
        } => {
            ensure!(
                domain == Domain::Memory || secondary_offset.is_none(),
                "A secondary offset only applies to memory faults"
            );

            let text = match (domain, secondary_offset) {
                (Domain::Instruction, _) => {
                    derive::<InstructionProfileEntry>(&profile, &events, |entry| {
                        entry.to_descriptor(mask)
                    })?
                    .to_string()
                }
                (Domain::Memory, None) => derive::<MemoryProfileEntry>(&profile, &events, |entry| {
                    entry.to_descriptor(mask)
                })?
                .to_string(),
                (Domain::Memory, Some(offset)) => {
                    derive::<MemoryProfileEntry>(&profile, &events, |entry| {
                        entry.to_multi_cell_descriptor(mask, offset)
                    })?
                    .to_string()
                }
            };
            print!("{text}");
        }
        Command::Outcome { outcome } => {
            let record = OutcomeRecord::load(&outcome)?;
            let fields = record
                .fields()
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect::<Map<_, _>>();
            println!("{}", to_string_pretty(&Value::Object(fields))?);
        }
    }

    Ok(())
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    registry()
        .with(
            fmt::layer()
                .pretty()
                .with_writer(stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(args.log_level.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    run(args.command).map_err(|e| match e.downcast::<simfi::Error>() {
        Ok(e) => anyhow!(e.report()),
        Err(e) => e,
    })
}
