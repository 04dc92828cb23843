//! SiteMirror validation
//!
//! Validates synchronized snapshots against the live site and drives the
//! retry loop around synchronization and validation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Orchestrator<S: RoundSteps>                                │
//! │    round: synchronize -> repair (round > 1) -> validate     │
//! │    RetryPolicy::Bounded { max_rounds } | Unbounded          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RoundValidator                                             │
//! │    ├── static analysis (markup, style, script, spelling)    │
//! │    ├── LocalServer::start_settled()                         │
//! │    ├── BrowserEngine::launch()                              │
//! │    ├── accessibility, broken links                          │
//! │    ├── StructuralDiffEngine, VisualDiffEngine               │
//! │    ├── performance / accessibility scoring                  │
//! │    └── browser close, server stop                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod checkers;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod structural;
pub mod validator;
pub mod visual;

pub use browser::{BrowserConfig, BrowserEngine, PageDriver};
pub use error::{ValidateError, ValidateResult};
pub use orchestrator::{Orchestrator, RetryPolicy, RetryState, RoundSteps, RoundSync, SessionOutcome, SessionState};
pub use pipeline::SitePipeline;
pub use server::LocalServer;
pub use structural::{compare_markup, StructuralDiffEngine};
pub use validator::RoundValidator;
pub use visual::{VisualDiff, VisualDiffEngine};
