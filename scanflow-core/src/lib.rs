//! # Scanflow Core
//!
//! Job-graph execution engine behind library scans.
//!
//! ## Overview
//!
//! - **Discovery**: breadth-first, cancellable traversal of a library's
//!   content locations over a pluggable [`scan::FileSystem`]
//! - **Job graph**: immutable stage templates instantiated per scan, with
//!   atomic fan-in so a stage runs once after all of its parents
//! - **Progress**: sampled and time-throttled `JobProgressChanged` heartbeats
//! - **Coordinator**: library resolution, run supervision and cancellation
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scanflow_core::scan::{
//!     InMemoryLibraryRepository, InProcScanEventBus, RealFs, ScanConfig,
//!     ScanCoordinator,
//! };
//! use scanflow_model::{LibraryId, ScanIdentity, ScanRequest, UserId};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn scan_once(
//!     library_id: LibraryId,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = Arc::new(InMemoryLibraryRepository::new());
//!     let bus = Arc::new(InProcScanEventBus::new(1024));
//!     let coordinator = ScanCoordinator::new(
//!         repository,
//!         bus,
//!         Arc::new(RealFs),
//!         ScanConfig::default(),
//!     )?;
//!
//!     let request =
//!         ScanRequest::new(library_id, ScanIdentity::for_user(UserId::new()));
//!     coordinator.scan(request, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Error types shared by every scan module
pub mod error;

/// Discovery, orchestration and configuration of library scans
pub mod scan;

pub use error::{Result, ScanError};
pub use scanflow_model as model;
