//! # vela-executor
//!
//! **Pipeline Build Executor**
//!
//! This crate runs one compiled CI pipeline on a worker: it drives every
//! service, stage and step container through its lifecycle on top of a
//! pluggable container [`Runtime`], streams their logs, hands dynamic
//! outputs from one step to the next, and reports build, step and service
//! state to the control server.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           vela-executor                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                      Engine Trait                           │    │
//! │  │   create → plan → assemble → exec ─┬─ destroy (always)      │    │
//! │  │                          stream ───┘                        │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                       Executor                            │      │
//! │  │  services (detached) │ steps (sequential) │ stages (fan-out)│    │
//! │  │  outputs sidecar │ resource tracker │ stream multiplexer  │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌──────────────────┐      │
//! │  │ Runtime      │  │ ApiClient         │  │ ArtifactStore    │      │
//! │  │ (containers) │  │ (status reports)  │  │ (step artifacts) │      │
//! │  └──────────────┘  └───────────────────┘  └──────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Unit Lifecycle
//!
//! ```text
//!   ┌─────────┐  create  ┌─────────┐  plan  ┌─────────┐  exec  ┌─────────┐
//!   │ (none)  │ ───────► │ Created │ ─────► │ Planned │ ─────► │ Running │
//!   └─────────┘          └─────────┘        └─────────┘        └────┬────┘
//!        │                    │                  │                  │ exit
//!        │ destroy            │ destroy          │ destroy          ▼
//!        │                    ▼                  ▼             ┌─────────┐
//!        └──────────────► ┌───────────┐ ◄──────────────────── │ Exited  │
//!                         │ Destroyed │        destroy         └─────────┘
//!                         └───────────┘
//! ```
//!
//! Destroy is valid from every state, including units that were never
//! planned: their record is rebuilt from the container environment.
//!
//! # Status Resolution
//!
//! | Build status at upload | Error attached | Reported status |
//! |------------------------|----------------|-----------------|
//! | `canceled`             | any            | `canceled`      |
//! | anything else          | yes            | `error`         |
//! | `pending`              | no             | `killed`        |
//! | `failure` / `error`    | no             | unchanged       |
//! | `running`              | no             | `success`       |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vela_executor::{CancelToken, Engine, Executor, MockRuntime};
//!
//! #[tokio::main]
//! async fn main() -> vela_executor::Result<()> {
//!     let executor = Executor::builder()
//!         .build(build)
//!         .pipeline(pipeline)
//!         .repo(repo)
//!         .runtime(Arc::new(MockRuntime::new()))
//!         .finish()?;
//!
//!     let token = CancelToken::new();
//!     let stream = {
//!         let executor = executor.clone();
//!         let token = token.child_token();
//!         tokio::spawn(async move { executor.stream_build(&token).await })
//!     };
//!
//!     executor.create_build(&token).await?;
//!     executor.plan_build(&token).await?;
//!     executor.assemble_build(&token).await?;
//!     let result = executor.exec_build(&token).await;
//!
//!     token.cancel();
//!     let _ = stream.await;
//!     executor.destroy_build(&CancelToken::new()).await?;
//!     result
//! }
//! ```

pub mod api;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod engine;
pub mod environment;
pub mod error;
pub mod executor;
pub mod group;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod runtime;
pub mod signal;
pub mod storage;
pub mod tracker;

pub mod runtimes;

// Re-exports
pub use api::{ApiClient, RecordingClient};
pub use cancel::CancelToken;
pub use config::Settings;
pub use constants::*;
pub use engine::Engine;
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorBuilder, StreamRequest};
pub use group::TaskGroup;
pub use output::{MemorySink, OutputSink, StdoutSink};
pub use pipeline::{Container, Pipeline, PullPolicy, RuleData, Rules, Ruleset, Stage, StepSecret};
pub use record::{Build, Repo, Service, Status, Step};
pub use runtime::{LogStream, Runtime};
pub use runtimes::MockRuntime;
pub use signal::{CompletionGuard, StageMap, StageSignal};
pub use storage::{ArtifactStore, DirectoryStore};
pub use tracker::{Tracked, Tracker};
