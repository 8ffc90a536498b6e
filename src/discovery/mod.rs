//! Source discovery and destination planning

pub mod scanner;

pub use scanner::{plan, scan, DiscoveredFile, PlannedConversion, SkipReason};
