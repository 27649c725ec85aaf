// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

use anyhow::{ensure, Result};
use serde_json::{json, Value};
use std::{
    fs::write,
    path::Path,
    process::{Command, Output},
};
use tempfile::tempdir;
use test_log::test;

const INSN_PROFILE: &str = "1;LI;4;0;1;5\n2;ADD;4;1;1;9\n3;SB;4;0;0\n";
const MEM_PROFILE: &str = "1;197;204;64;1;1024\n2;3;204;64;1;1024\n";

fn simfi<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Ok(Command::new(env!("CARGO_BIN_EXE_simfi")).args(args).output()?)
}

/// Run `simfi` and return its stdout, failing if it exits with an error
fn stdout<I, S>(args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = simfi(args)?;
    ensure!(
        output.status.success(),
        "simfi failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8(output.stdout)?)
}

/// Run `simfi` and return its stderr, failing if it succeeds
fn stderr<I, S>(args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = simfi(args)?;
    ensure!(!output.status.success(), "simfi should have failed");
    Ok(String::from_utf8(output.stderr)?)
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<String> {
    let path = dir.join(name);
    write(&path, contents)?;
    Ok(path.display().to_string())
}

#[test]
fn test_derive_instruction_plan() -> Result<()> {
    let dir = tempdir()?;
    let log = write_file(dir.path(), "insn.txt", INSN_PROFILE)?;

    let plan = stdout([
        "derive", "-d", "insn", "-p", log.as_str(), "--event", "1", "--event", "2", "-m", "0x10",
    ])?;
    assert_eq!(plan, "2\n1 16 5 0 LI\n2 16 9 1 ADD\n");

    Ok(())
}

#[test]
fn test_derive_memory_plans() -> Result<()> {
    let dir = tempdir()?;
    let log = write_file(dir.path(), "mem.txt", MEM_PROFILE)?;

    let single = stdout(["derive", "-d", "mem", "-p", log.as_str(), "-e", "1", "-m", "0xff"])?;
    assert_eq!(single, "1\n1 255 197 64 1 1024 0 0\n");

    let multi = stdout([
        "derive", "-d", "mem", "-p", log.as_str(), "-e", "2", "-m", "1", "-s", "100",
    ])?;
    assert_eq!(multi, "1\n2 1 3 64 1 1024 1 100\n");

    Ok(())
}

#[test]
fn test_derive_rejects_invalid_requests() -> Result<()> {
    let dir = tempdir()?;
    let insn = write_file(dir.path(), "insn.txt", INSN_PROFILE)?;
    let mem = write_file(dir.path(), "mem.txt", MEM_PROFILE)?;

    let error = stderr(["derive", "-d", "insn", "-p", insn.as_str(), "-e", "1", "-m", "1", "-s", "4"])?;
    assert!(error.contains("secondary offset only applies to memory faults"), "{error}");

    // The same event twice is an ambiguous plan
    let error = stderr(["derive", "-d", "insn", "-p", insn.as_str(), "-e", "1", "-e", "1", "-m", "1"])?;
    assert!(error.contains("SIMFI_ERROR:::Ambiguous plan"), "{error}");

    let error = stderr([
        "derive", "-d", "mem", "-p", mem.as_str(), "-e", "1", "-e", "2", "-e", "1", "-e", "2",
        "-m", "1",
    ])?;
    assert!(error.contains("maximum number of faults"), "{error}");

    // A store writes no register
    let error = stderr(["derive", "-d", "insn", "-p", insn.as_str(), "-e", "3", "-m", "1"])?;
    assert!(error.contains("exactly one is required"), "{error}");

    let error = stderr(["derive", "-d", "mem", "-p", mem.as_str(), "-e", "1", "-m", "0x100"])?;
    assert!(error.contains("SIMFI_ERROR:::"), "{error}");

    let error = stderr(["derive", "-d", "mem", "-p", mem.as_str(), "-e", "9", "-m", "1"])?;
    assert!(error.contains("No event 9"), "{error}");

    Ok(())
}

#[test]
fn test_validate_normalizes_plans() -> Result<()> {
    let dir = tempdir()?;
    let legacy = write_file(dir.path(), "legacy.txt", "12 1 0xaa 64 4 1024 true 32")?;
    let counted = write_file(dir.path(), "insn-plan.txt", "1\n42 0x10 3 0 ADD")?;

    assert_eq!(
        stdout(["validate", "-d", "mem", legacy.as_str()])?,
        "1\n12 1 170 64 4 1024 1 32\n"
    );
    assert_eq!(
        stdout(["validate", "--domain", "insn", counted.as_str()])?,
        "1\n42 16 3 0 ADD\n"
    );

    // A bare memory record is not an instruction plan
    let error = stderr(["validate", "-d", "insn", legacy.as_str()])?;
    assert!(error.contains("SIMFI_ERROR:::"), "{error}");

    Ok(())
}

#[test]
fn test_outcome_as_json() -> Result<()> {
    let dir = tempdir()?;
    let outcome = write_file(
        dir.path(),
        "outcome.txt",
        "reg_val_before:3\nreg_val_after:19\ntrigger_iteration:42\nlabel:ADD\n",
    )?;

    let value = serde_json::from_str::<Value>(&stdout(["outcome", outcome.as_str()])?)?;
    assert_eq!(
        value,
        json!({
            "reg_val_before": "3",
            "reg_val_after": "19",
            "trigger_iteration": "42",
            "label": "ADD",
        })
    );

    let missing = dir.path().join("missing.txt").display().to_string();
    let error = stderr(["outcome", missing.as_str()])?;
    assert!(error.contains("SIMFI_ERROR:::"), "{error}");

    Ok(())
}
