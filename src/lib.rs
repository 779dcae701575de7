//! walkeeper - WAL archiving and retention for PostgreSQL
//!
//! This library provides the archive hook and the cleanup tool behind the
//! `walkeeper` binary. Every completed WAL segment is validated, compressed,
//! optionally encrypted and stored exactly once, either in a local directory
//! or an S3-compatible bucket. Cleanup keeps the newest sane base backups and
//! removes older backups together with the WAL they alone needed.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `wal`: WAL file validation and naming
//! - `stage`: Compression and encryption stages chained over byte streams
//! - `sink`: File and object-store archive destinations
//! - `archive`: The per-file archival pipeline
//! - `backup`: Base backup catalog and retention classification
//! - `cleanup`: The cleanup state machine
//! - `crypto`: Builtin AES-256-GCM encryption with Argon2id key derivation
//! - `cli`: Command handlers for the binary
//!
//! # Example
//!
//! ```rust,ignore
//! use walkeeper::archive::ArchivePipeline;
//! use walkeeper::config::{KeeperPaths, Settings};
//! use walkeeper::sink::Stores;
//!
//! let paths = KeeperPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let stores = Stores::from_settings(&settings)?;
//!
//! let pipeline = ArchivePipeline::from_settings(stores.wal.as_ref(), &settings, None);
//! let receipt = pipeline.archive(Path::new("pg_wal/000000010000000000000001"))?;
//! ```

pub mod archive;
pub mod backup;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod sink;
pub mod stage;
pub mod wal;

pub use error::KeeperError;
