// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! A small deterministic dual-core machine that drives the hooks the way a simulator does

#![allow(dead_code)]

use anyhow::Result;
use simfi::{
    InstructionInjector, MemoryInjector, Mode, RetiredInstruction, Settings,
};
use std::path::{Path, PathBuf};

pub const MEMORY_SIZE: usize = 1024;
pub const REGISTERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    /// Load immediate
    Li { rd: usize, imm: u64 },
    Add { rd: usize, rs1: usize, rs2: usize },
    /// Load byte
    Lb { rd: usize, addr: usize },
    /// Store byte, writes no register
    Sb { rs: usize, addr: usize },
    /// Store to a device with no backing memory
    Mmio { rs: usize },
    /// Fails to decode
    Illegal,
}

impl Insn {
    fn label(&self) -> &'static str {
        match self {
            Insn::Li { .. } => "LI",
            Insn::Add { .. } => "ADD",
            Insn::Lb { .. } => "LB",
            Insn::Sb { .. } => "SB",
            Insn::Mmio { .. } => "SW",
            Insn::Illegal => "ILLEGAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub regs: Vec<[u64; REGISTERS]>,
    pub memory: Vec<u8>,
}

impl Machine {
    pub fn new(cores: usize) -> Self {
        Self {
            regs: vec![[0; REGISTERS]; cores],
            memory: (0..MEMORY_SIZE).map(|i| (i * 7 % 251) as u8).collect(),
        }
    }

    fn retire(
        &mut self,
        insn: &InstructionInjector,
        core: usize,
        op: &Insn,
        rd: Option<usize>,
        value: u64,
    ) -> simfi::Result<()> {
        let mut out = [value];
        let out_regs: &mut [u64] = if rd.is_some() { &mut out } else { &mut [] };

        insn.on_instruction_retired(Some(RetiredInstruction {
            label: op.label(),
            size: 4,
            core_id: core as u64,
            out_regs,
        }))?;

        if let Some(rd) = rd {
            self.regs[core][rd] = out[0];
        }

        Ok(())
    }

    /// Execute one instruction on `core`, calling the hooks for every event it raises
    pub fn step(
        &mut self,
        insn: &InstructionInjector,
        mem: &MemoryInjector,
        core: usize,
        op: &Insn,
    ) -> simfi::Result<()> {
        let total = self.memory.len() as u64;

        match *op {
            Insn::Li { rd, imm } => self.retire(insn, core, op, Some(rd), imm),
            Insn::Add { rd, rs1, rs2 } => {
                let value = self.regs[core][rs1].wrapping_add(self.regs[core][rs2]);
                self.retire(insn, core, op, Some(rd), value)
            }
            Insn::Lb { rd, addr } => {
                mem.on_memory_access(Some(self.memory.as_mut_slice()), addr as u64, 1, total)?;
                let value = u64::from(self.memory[addr]);
                self.retire(insn, core, op, Some(rd), value)
            }
            Insn::Sb { rs, addr } => {
                mem.on_memory_access(Some(self.memory.as_mut_slice()), addr as u64, 1, total)?;
                self.memory[addr] = self.regs[core][rs] as u8;
                self.retire(insn, core, op, None, 0)
            }
            Insn::Mmio { .. } => {
                mem.on_memory_access(None, 0, 4, 0)?;
                self.retire(insn, core, op, None, 0)
            }
            Insn::Illegal => insn.on_instruction_retired(None),
        }
    }

    pub fn run(
        &mut self,
        insn: &InstructionInjector,
        mem: &MemoryInjector,
        program: &[(usize, Insn)],
    ) -> simfi::Result<()> {
        program
            .iter()
            .try_for_each(|(core, op)| self.step(insn, mem, *core, op))
    }
}

/// The reference workload. The 42nd valid instruction is an `ADD` on core 0 producing 3, and
/// core 1 retires an `ADD` right after it. One instruction in the prefix fails to decode.
pub fn workload() -> Vec<(usize, Insn)> {
    let mut program = Vec::new();

    for k in 0..20 {
        program.push((0, Insn::Li { rd: 1, imm: 1 }));
        program.push((1, Insn::Li { rd: 1, imm: k }));
        if k == 5 {
            program.push((1, Insn::Illegal));
        }
    }

    program.extend([
        (0, Insn::Li { rd: 2, imm: 2 }),
        (0, Insn::Add { rd: 3, rs1: 1, rs2: 2 }),
        (1, Insn::Add { rd: 3, rs1: 1, rs2: 1 }),
        (0, Insn::Sb { rs: 3, addr: 64 }),
        (1, Insn::Lb { rd: 4, addr: 64 }),
        (0, Insn::Add { rd: 5, rs1: 3, rs2: 3 }),
        (0, Insn::Mmio { rs: 5 }),
        (1, Insn::Sb { rs: 3, addr: 10 }),
        (0, Insn::Lb { rd: 6, addr: 10 }),
        (1, Insn::Lb { rd: 7, addr: MEMORY_SIZE - 1 }),
        (0, Insn::Lb { rd: 7, addr: 96 }),
    ]);

    program
}

/// Per-domain file layout inside a scratch directory
pub struct Files {
    pub profile: PathBuf,
    pub plan: PathBuf,
    pub outcome: PathBuf,
}

impl Files {
    pub fn new(dir: &Path, domain: &str) -> Self {
        Self {
            profile: dir.join(format!("{domain}-profile.txt")),
            plan: dir.join(format!("{domain}-plan.txt")),
            outcome: dir.join(format!("{domain}-outcome.txt")),
        }
    }

    pub fn settings(&self, mode: Mode) -> Settings {
        let settings = Settings::builder()
            .profile_path(self.profile.clone())
            .plan_path(self.plan.clone())
            .outcome_path(self.outcome.clone());

        match mode {
            Mode::Disabled => settings.build(),
            Mode::Profile => settings.mode("0").build(),
            Mode::Inject => settings.mode("1").build(),
        }
    }
}

/// Run the workload with each domain in the given mode and return the final machine state
pub fn run_workload(
    dir: &Path,
    insn_mode: Mode,
    mem_mode: Mode,
) -> Result<(Machine, InstructionInjector, MemoryInjector)> {
    let insn = InstructionInjector::new(Files::new(dir, "insn").settings(insn_mode));
    let mem = MemoryInjector::new(Files::new(dir, "mem").settings(mem_mode));
    let mut machine = Machine::new(2);

    machine.run(&insn, &mem, &workload())?;

    Ok((machine, insn, mem))
}
