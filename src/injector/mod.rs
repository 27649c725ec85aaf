// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Per-domain fault injection context
//!
//! A [`FaultInjector`] owns everything one domain needs across a run: the event counter, the
//! lazily resolved mode, the lazily loaded plan and the log writers. The simulator owns one
//! context per domain and passes it by reference to each hook call. The hooks themselves live
//! with their domain in [`crate::insn`] and [`crate::mem`].

use crate::{
    config::{ConfigSource, Mode, Settings},
    counter::EventCounter,
    error::Result,
    outcome::{OutcomeLog, OutcomeRecord},
    plan::{DomainIdentity, FaultDescriptor, InjectionPlan, PlanCell},
    profile::ProfileLog,
};
use std::{
    fmt::Display,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A valid event, by the mode it is dispatched under
pub(crate) enum Event {
    /// Counted, nothing else happens
    Disabled,
    /// Not counted yet: `FaultInjector::profile` counts it while holding the profile log
    Profile,
    /// Counted as event `sequence`
    Inject { sequence: u64 },
}

/// Fault injection context of the domain identified by `I`
pub struct FaultInjector<I: DomainIdentity> {
    settings: Settings,
    mode: OnceLock<Mode>,
    counter: EventCounter,
    plan: PlanCell<I>,
    profile: ProfileLog,
    outcome: OutcomeLog,
    injections: AtomicU64,
    _identity: PhantomData<fn() -> I>,
}

impl<I: DomainIdentity> FaultInjector<I> {
    /// Create a context from explicit settings
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            mode: OnceLock::new(),
            counter: EventCounter::new(),
            plan: PlanCell::new(),
            profile: ProfileLog::new(),
            outcome: OutcomeLog::new(),
            injections: AtomicU64::new(0),
            _identity: PhantomData,
        }
    }

    /// Create a context whose plan is already in memory. The plan path is never read.
    pub fn with_plan(settings: Settings, plan: InjectionPlan<I>) -> Self {
        Self {
            plan: PlanCell::preloaded(plan),
            ..Self::new(settings)
        }
    }

    /// Create a context configured from `source`
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Self {
        Self::new(Settings::from_source(I::DOMAIN, source))
    }

    /// Create a context configured from the process environment
    pub fn from_env() -> Self {
        Self::new(Settings::from_env(I::DOMAIN))
    }

    /// The settings this context was created with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The domain's mode. It is resolved on first use and cached; an invalid value is returned as
    /// an error on every call and never cached.
    pub fn mode(&self) -> Result<Mode> {
        if let Some(mode) = self.mode.get() {
            return Ok(*mode);
        }

        let mode = self.settings.resolve_mode()?;
        debug!(domain = %I::DOMAIN, "Resolved run mode {mode}");

        Ok(*self.mode.get_or_init(|| mode))
    }

    /// The number of valid events seen so far
    pub fn events(&self) -> u64 {
        self.counter.current()
    }

    /// The number of faults applied so far
    pub fn injections(&self) -> u64 {
        self.injections.load(Ordering::SeqCst)
    }

    /// Resolve the mode a valid event is dispatched under. Every valid event is counted exactly
    /// once, even when the mode is invalid, so counts stay aligned across runs in different modes.
    pub(crate) fn begin_event(&self) -> Result<Event> {
        let mode = match self.mode() {
            Ok(mode) => mode,
            Err(e) => {
                self.counter.advance();
                return Err(e);
            }
        };

        Ok(match mode {
            Mode::Disabled => {
                self.counter.advance();
                Event::Disabled
            }
            Mode::Profile => Event::Profile,
            Mode::Inject => Event::Inject {
                sequence: self.counter.advance(),
            },
        })
    }

    /// Count a profiled event and append the line `line` builds from its sequence number
    pub(crate) fn profile<L: Display>(&self, line: impl FnOnce(u64) -> L) -> Result<()> {
        let mut log = self.profile.lock()?;
        let line = line(self.counter.advance());

        trace!(domain = %I::DOMAIN, "Profiling {line}");
        log.append(self.settings.require_profile_path()?, line)
    }

    /// The plan, loaded on first use. Also fails if there is nowhere to record an outcome, so a
    /// fault is never applied without a record of it.
    pub(crate) fn plan(&self) -> Result<Arc<InjectionPlan<I>>> {
        self.settings.require_outcome_path()?;

        if let Some(plan) = self.plan.get() {
            return Ok(plan.clone());
        }

        self.plan.get_or_load(self.settings.require_plan_path()?)
    }

    /// Record an applied fault
    pub(crate) fn record_injection(
        &self,
        sequence: u64,
        descriptor: &FaultDescriptor<I>,
        observed: Vec<(&'static str, String)>,
    ) -> Result<()> {
        self.injections.fetch_add(1, Ordering::SeqCst);

        let record = OutcomeRecord::new(observed, descriptor);
        self.outcome
            .write(self.settings.require_outcome_path()?, &record)?;

        info!(
            domain = %I::DOMAIN,
            sequence,
            mask = descriptor.corruption_mask,
            "Fault injected at {}",
            descriptor.identity
        );

        Ok(())
    }
}
