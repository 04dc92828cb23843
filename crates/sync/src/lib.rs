//! SiteMirror content synchronization
//!
//! Resolves the routes of the live site and keeps the local static mirror
//! in step with it:
//! - [`discovery`] reads the site index, or crawls the home page when the
//!   index is unusable
//! - [`synchronizer`] extracts each live page's primary content and footer
//!   and recomposes them with the shared fragments into a snapshot
//! - [`repair`] applies best-effort fixes to snapshots between rounds

pub mod client;
pub mod discovery;
pub mod error;
pub mod repair;
pub mod synchronizer;

pub use client::HttpFetcher;
pub use discovery::{Discovery, DiscoverySource, RouteDiscovery};
pub use error::{IndexError, SyncError, SyncResult};
pub use repair::{RepairOutcome, Repairer};
pub use synchronizer::{SharedFragments, SyncOutcome, SyncSummary, Synchronizer};
