//! Background-worker registration and version handshake.
//!
//! The page and its background worker ship as one code base but upgrade
//! independently: a tab may load new page code while an old worker still
//! controls it, or no worker exists yet. The handshake registers the worker
//! script, then polls until a worker both controls the page and reports the
//! same code version, and only then resolves its completion value with the
//! worker handle. Time-sensitive features (the synchronized clock) wait for
//! that resolution; everything else proceeds without it.
//!
//! # Shared state
//!
//! The only state shared with the outside is [`SameVersionFlag`]: the host's
//! message-reply handler sets it once the worker reports a matching version,
//! and the polling tick reads it. Single writer, so no write/write race.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::{WorkerHandle, WorkerRegistry, WorkerSupport};
use pagelift_protocol::WorkerCommand;

/// Base path of the worker script; the environment picks the suffix.
pub const WORKER_SCRIPT_BASE: &str = "/pagelift-worker";

/// Returns the worker script path for this build flavor: the minified
/// variant in production, the plain one in debug builds.
pub fn worker_script_path(minified: bool) -> String {
	let dot_min = if minified { ".min" } else { "" };
	format!("{WORKER_SCRIPT_BASE}{dot_min}.js")
}

/// Tuning knobs for the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
	/// How often to poll for a controlling worker and its version.
	pub poll_interval: Duration,
	/// Cadence of the "still waiting" log line, in polls.
	pub log_every: u32,
	/// Give up after this many controller-present polls. `None` waits
	/// forever, which preserves eventual correctness across arbitrarily slow
	/// worker upgrades; whether a never-upgrading worker should instead be
	/// reported as a distinct failure is left to the caller via this knob.
	pub max_polls: Option<u32>,
	/// Register the minified script variant.
	pub minified_script: bool,
}

impl Default for HandshakeConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(50),
			log_every: 20,
			max_polls: None,
			minified_script: true,
		}
	}
}

/// Shared same-version flag, written only by the host's worker-reply handler.
#[derive(Clone, Default)]
pub struct SameVersionFlag(Arc<AtomicBool>);

impl SameVersionFlag {
	pub fn new() -> Self {
		Self::default()
	}

	/// Called by the host when the worker's reply reports a matching code
	/// build.
	pub fn mark_same_version(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_same_version(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Where the handshake currently stands. Terminal states are `Unsupported`,
/// `Matched`, and `Failed`; each settles the completion value exactly once,
/// and no state is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
	Unstarted,
	Unsupported,
	Registering,
	AwaitingController,
	Polling,
	Matched,
	Failed,
}

/// Awaitable completion value of a handshake. Yields the controlling worker
/// handle on a version match; rejects when workers are unavailable or
/// registration fails.
pub struct HandshakeFuture {
	rx: oneshot::Receiver<Result<WorkerHandle>>,
}

impl HandshakeFuture {
	/// Waits for the handshake to settle, successfully or not.
	pub async fn settled(self) -> Result<WorkerHandle> {
		self.rx.await.map_err(|_| Error::ChannelClosed).and_then(|outcome| outcome)
	}
}

/// Read-only view of a handshake's state.
#[derive(Clone)]
pub struct HandshakeWatch {
	state: Arc<Mutex<HandshakeState>>,
}

impl HandshakeWatch {
	pub fn state(&self) -> HandshakeState {
		*self.state.lock()
	}
}

/// The page-side half of the worker version handshake.
pub struct Handshake {
	registry: Arc<dyn WorkerRegistry>,
	flag: SameVersionFlag,
	config: HandshakeConfig,
	state: Arc<Mutex<HandshakeState>>,
}

impl Handshake {
	/// Creates a handshake against `registry`. The caller wires the same
	/// `flag` into its worker-reply handler.
	pub fn new(registry: Arc<dyn WorkerRegistry>, flag: SameVersionFlag, config: HandshakeConfig) -> Self {
		Self {
			registry,
			flag,
			config,
			state: Arc::new(Mutex::new(HandshakeState::Unstarted)),
		}
	}

	/// Current state, for logging and tests.
	pub fn state(&self) -> HandshakeState {
		*self.state.lock()
	}

	/// A handle that keeps observing the state after `begin` consumed the
	/// handshake.
	pub fn watch(&self) -> HandshakeWatch {
		HandshakeWatch {
			state: Arc::clone(&self.state),
		}
	}

	/// Starts the handshake task and returns its completion value.
	///
	/// The task is not cancellable; once started it runs until it settles
	/// (which, under the default unbounded policy, may be never).
	pub fn begin(self) -> HandshakeFuture {
		let (tx, rx) = oneshot::channel();
		let Handshake {
			registry,
			flag,
			config,
			state,
		} = self;

		tokio::spawn(async move {
			let outcome = run(registry, flag, config, &state).await;
			// The receiver may have been dropped; the handshake outcome is
			// then simply unobserved.
			let _ = tx.send(outcome);
		});

		HandshakeFuture { rx }
	}
}

async fn run(
	registry: Arc<dyn WorkerRegistry>,
	flag: SameVersionFlag,
	config: HandshakeConfig,
	state: &Mutex<HandshakeState>,
) -> Result<WorkerHandle> {
	match registry.support() {
		WorkerSupport::NotWanted => {
			*state.lock() = HandshakeState::Unsupported;
			debug!(target: "pagelift.handshake", "not using any background worker");
			return Err(Error::WorkerNotWanted);
		}
		WorkerSupport::Unsupported => {
			*state.lock() = HandshakeState::Unsupported;
			warn!(
				target: "pagelift.handshake",
				"cannot use a background worker: needs a secure origin and a non-incognito session"
			);
			return Err(Error::WorkerUnsupported);
		}
		WorkerSupport::Usable => {}
	}

	*state.lock() = HandshakeState::Registering;
	let script = worker_script_path(config.minified_script);
	if let Err(err) = registry.register(&script).await {
		*state.lock() = HandshakeState::Failed;
		warn!(target: "pagelift.handshake", %script, error = %err, "worker registration failed");
		return Err(err);
	}
	info!(target: "pagelift.handshake", %script, "worker registered");
	*state.lock() = HandshakeState::AwaitingController;

	// Wait until a worker of the same version as this code is active. The
	// controller may first be an old worker left over from the user's last
	// visit; keep asking it for its version until the one registered above
	// has claimed the page and answers with a matching build.
	let mut interval = tokio::time::interval(config.poll_interval);
	let mut polls: u32 = 0;
	loop {
		interval.tick().await;

		let Some(worker) = registry.controller() else {
			continue;
		};

		polls += 1;
		if polls == 1 {
			*state.lock() = HandshakeState::Polling;
			debug!(target: "pagelift.handshake", "a worker is active, but which version?");
		}
		if polls % config.log_every == 4 {
			debug!(target: "pagelift.handshake", polls, "still waiting for the worker to maybe update");
		}

		// Idempotent; the worker answers each query and the reply handler
		// flips the flag once the versions agree. A worker reporting a
		// version newer than the page is not handled.
		if let Err(err) = worker.post(WorkerCommand::ReportYourVersion).await {
			*state.lock() = HandshakeState::Failed;
			warn!(target: "pagelift.handshake", error = %err, "worker went away while polling");
			return Err(err);
		}

		if flag.is_same_version() {
			*state.lock() = HandshakeState::Matched;
			info!(target: "pagelift.handshake", polls, "worker is the same version");
			return Ok(worker);
		}

		if let Some(max) = config.max_polls {
			if polls >= max {
				*state.lock() = HandshakeState::Failed;
				warn!(target: "pagelift.handshake", polls, "abandoning the worker handshake");
				return Err(Error::HandshakeAbandoned { polls });
			}
		}
	}
}
