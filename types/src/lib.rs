//! Core domain types for rtag.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The coordinator produces these, the bridge binary serializes them.

mod diagnostic;
mod document;
mod event;

pub use diagnostic::{
    Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, Position, PositionError, Range,
};
pub use document::UnsavedFile;
pub use event::{CoordinatorEvent, MessageLevel};
