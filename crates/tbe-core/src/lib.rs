//! TBE Core Library
//!
//! Convergence polling, configuration and the error taxonomy shared by the
//! scenario and the CLI.
//!
//! ## Layer 1 - Waiting on External State
//!
//! Three waits share one poller:
//!
//! - discovery poll: a workflow run appears for a commit
//! - terminal-state poll: that run reaches `completed`
//! - digest-lookup scan: the pushed image shows up in the package listing

pub mod config;
pub mod delay;
pub mod domain;
pub mod obs;
pub mod poll;
pub mod scan;
pub mod tags;
pub mod telemetry;
pub mod waits;

pub use config::{
    AppSettings, CosignSettings, E2eConfig, GitHubSettings, Mode, PollSettings, PollingConfig,
    ScenarioSettings, TrustBootstrap, WorkflowConfig, CI_ENVIRONMENT, DEFAULT_ENVIRONMENT,
};
pub use delay::{Cancelled, Delay};
pub use domain::{E2eError, Result};
pub use obs::{
    emit_poll_attempt, emit_scenario_finished, emit_stage_finished, emit_stage_started,
    emit_verification, scenario_span, ScenarioSpan,
};
pub use poll::{poll_until, PollError, PollPolicy};
pub use scan::find_in_pages;
pub use tags::{find_commit_tag, TagPolicy, TagVerdict};
pub use telemetry::init_tracing;
pub use waits::{
    fetch_run_metadata, find_package_version_by_digest, find_run_for_commit,
    wait_for_run_completion,
};
