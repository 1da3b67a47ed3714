//! Cross-tab session reconciliation.
//!
//! A user who switches browser tabs may log in or out in the other tab,
//! invalidating this tab's identity and per-user permissions. Whenever the
//! window regains focus, the reconciler compares the in-memory identity with
//! the session token currently in cookie state and repairs any disagreement.
//!
//! The cookie and focus-event plumbing stay outside: the reconciler only
//! talks to a [`SessionSource`] and an [`IdentitySource`], so it is testable
//! without real cookies or focus events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A raw session token read from cookie state.
///
/// Token parts are hash, user id, name, login time, random value, joined
/// with dots, e.g. `Y1pBlH7vY4JW9A.11.Magnus.1316266102779.15gl0p4xf7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
	pub fn new(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	/// The user id embedded in the token, when the token parses.
	pub fn user_id(&self) -> Option<i64> {
		self.0.split('.').nth(1)?.parse().ok()
	}
}

/// The identity this tab currently believes in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
	pub user_id: Option<i64>,
}

impl Identity {
	pub fn logged_in(user_id: i64) -> Self {
		Self { user_id: Some(user_id) }
	}

	pub fn is_logged_in(&self) -> bool {
		self.user_id.is_some()
	}
}

/// Read access to browser-managed session state.
pub trait SessionSource: Send + Sync {
	/// The session token presently stored in cookie state, if any.
	fn session_token(&self) -> Option<SessionToken>;
	/// Whether this tab holds a cookie-less, per-tab session. In that mode a
	/// missing cookie is expected, not a logout.
	fn has_tab_session(&self) -> bool;
}

/// Read/replace access to the in-memory identity.
#[async_trait]
pub trait IdentitySource: Send + Sync {
	fn current(&self) -> Identity;
	/// Reloads the identity from the server, picking up whatever the other
	/// tab did.
	async fn reload_from_server(&self);
	/// Forgets the identity locally, without a server round-trip. The server
	/// already knows about the logout that happened in the other tab.
	fn clear_local(&self);
}

/// Standing watcher that reconciles session state on each focus-regain.
pub struct SessionReconciler {
	session: Arc<dyn SessionSource>,
	identity: Arc<dyn IdentitySource>,
}

impl SessionReconciler {
	pub fn new(session: Arc<dyn SessionSource>, identity: Arc<dyn IdentitySource>) -> Self {
		Self { session, identity }
	}

	/// Runs one reconciliation pass. The signal is derived fresh from the
	/// current identity and cookie state every time; nothing is cached
	/// between passes.
	pub async fn on_focus_regained(&self) {
		let me = self.identity.current();
		let token = self.session.session_token();

		match (me.user_id, token) {
			(Some(user_id), Some(token)) => {
				if token.user_id() != Some(user_id) {
					info!(target: "pagelift.session", "logged in as another user in another tab; reloading identity");
					self.identity.reload_from_server().await;
				}
			}
			(Some(_), None) => {
				if self.session.has_tab_session() {
					// Logged in cookie-less; a missing cookie is fine.
					debug!(target: "pagelift.session", "no session cookie, but a per-tab session exists");
				} else {
					info!(target: "pagelift.session", "logged out in another tab; clearing identity locally");
					self.identity.clear_local();
				}
			}
			(None, Some(_)) => {
				info!(target: "pagelift.session", "logged in in another tab; loading identity");
				self.identity.reload_from_server().await;
			}
			(None, None) => {}
		}
	}

	/// Arms the reconciler on a focus-regained event stream. Runs for as
	/// long as the stream stays open, i.e. the remaining page lifetime.
	pub fn arm(self, mut focus_regained: mpsc::UnboundedReceiver<()>) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			while focus_regained.recv().await.is_some() {
				self.on_focus_regained().await;
			}
		})
	}
}
