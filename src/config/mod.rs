//! Configuration module for walkeeper
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Settings persistence
//! - File-mode archive layout

pub mod paths;
pub mod settings;

pub use paths::{ArchiveLayout, KeeperPaths};
pub use settings::{ArchiveTarget, Settings};
