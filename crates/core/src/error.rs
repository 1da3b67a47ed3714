//! Error types for boot sequencing and the worker handshake.

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while negotiating with the background worker.
///
/// None of these are fatal to the page: callers log them and degrade by
/// skipping the dependent feature (clock sync, markup reuse).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// Workers are deliberately not used in this context. A recognized
	/// degraded mode, not a malfunction.
	#[error("background workers not wanted in this context")]
	WorkerNotWanted,

	/// Workers are wanted but the platform cannot provide them, e.g. an
	/// insecure origin or an incognito session.
	#[error("background workers wanted but unsupported in this context")]
	WorkerUnsupported,

	/// Worker script registration failed.
	#[error("worker registration failed: {0}")]
	WorkerRegistration(String),

	/// Posting a message to the controlling worker failed.
	#[error("posting to worker failed: {0}")]
	WorkerPost(String),

	/// A bounded polling policy gave up before a same-version worker
	/// appeared. Only produced when `HandshakeConfig::max_polls` is set.
	#[error("gave up waiting for a same-version worker after {polls} polls")]
	HandshakeAbandoned { polls: u32 },

	/// The handshake task went away before settling its completion value.
	#[error("handshake channel closed before settling")]
	ChannelClosed,
}
