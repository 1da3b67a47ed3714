//! Wire types for the page/worker boot protocol.
//!
//! This crate contains the serde-serializable types exchanged between a
//! booting page and its background worker, plus the two-part version token
//! both sides stamp on their code. These types represent the "protocol
//! layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and token
//!   comparison
//! * Stable: Changes only when the wire protocol changes
//!
//! The boot orchestration built on top of these types lives in `pagelift`.

pub mod message;
pub mod version;

pub use message::{WorkerCommand, WorkerReply};
pub use version::{VersionDescriptor, VersionParseError};
