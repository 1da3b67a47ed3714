//! The staged boot sequencer.
//!
//! Brings a server-produced page to a fully interactive state, step by step,
//! so the user perceives the page as mostly loaded after the first step. The
//! synchronous phase initializes state, picks the layout and render mode,
//! and does the remaining first-frame work; everything else is deferred
//! across scheduling ticks so the browser can paint in between.
//!
//! The worker handshake runs concurrently with the deferred steps from the
//! moment it is armed. It cannot affect step ordering; only the clock-sync
//! step waits for it, and a failed handshake merely skips the clock message.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::handshake::{Handshake, HandshakeConfig, HandshakeFuture, SameVersionFlag};
use crate::host::{ElapsedLabelScope, PageEvents, PageHost, PageLocation, PageSnapshot};
use crate::layout::{LayoutFlags, LayoutMode, choose_initial_layout};
use crate::reconciler::SessionReconciler;
use crate::render::{StalenessSnapshot, choose_render_mode};
use pagelift_protocol::{VersionDescriptor, WorkerCommand};

/// Root class marking that boot has started, for host-visible styling hooks.
pub const BOOT_STARTED_CLASS: &str = "pl-boot-started";

/// With more content items than this, the first elapsed-label pass only
/// touches the article header; the rest waits for a later step.
pub const BATCH_LABEL_CUTOFF: usize = 20;

/// Boot parameters resolved by the embedding page before `start`.
#[derive(Clone)]
pub struct BootConfig {
	pub location: PageLocation,
	/// The larger of the window's outer dimensions.
	pub viewport_major_extent: u32,
	/// Version token stamped on the markup the server sent.
	pub cached_version: VersionDescriptor,
	/// Version token of the code currently executing.
	pub current_version: VersionDescriptor,
	/// Fixed start time for the synchronized clocks; `None` means now.
	/// Tests pin this to a known value.
	pub start_time_millis: Option<u64>,
	/// Capture markup snapshots around a stale render.
	pub diagnostics: bool,
	pub handshake: HandshakeConfig,
	/// Deferral before the first scheduled step.
	pub first_step_delay: Duration,
	/// Deferral between subsequent steps. The final step is exempt and runs
	/// right after the step before it.
	pub step_delay: Duration,
	pub batch_label_cutoff: usize,
}

impl BootConfig {
	pub fn new(
		location: PageLocation,
		viewport_major_extent: u32,
		cached_version: VersionDescriptor,
		current_version: VersionDescriptor,
	) -> Self {
		Self {
			location,
			viewport_major_extent,
			cached_version,
			current_version,
			start_time_millis: None,
			diagnostics: false,
			handshake: HandshakeConfig::default(),
			first_step_delay: Duration::from_millis(60),
			step_delay: Duration::from_millis(50),
			batch_label_cutoff: BATCH_LABEL_CUTOFF,
		}
	}

	pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
		self.diagnostics = diagnostics;
		self
	}

	pub fn with_start_time_millis(mut self, millis: u64) -> Self {
		self.start_time_millis = Some(millis);
		self
	}

	pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
		self.handshake = handshake;
		self
	}
}

/// Post-boot callbacks registered by external collaborators.
///
/// Each callback fires exactly once, in registration order, after the final
/// boot step completes. Callbacks registered after boot completed are never
/// invoked.
#[derive(Clone, Default)]
pub struct PendingCallbackSet {
	inner: Arc<Mutex<CallbackInner>>,
}

#[derive(Default)]
struct CallbackInner {
	callbacks: Vec<Box<dyn FnOnce() + Send>>,
	fired: bool,
}

impl PendingCallbackSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, callback: impl FnOnce() + Send + 'static) {
		self.inner.lock().callbacks.push(Box::new(callback));
	}

	/// Number of callbacks still waiting.
	pub fn pending(&self) -> usize {
		self.inner.lock().callbacks.len()
	}

	fn fire_all(&self) {
		let drained = {
			let mut inner = self.inner.lock();
			if inner.fired {
				return;
			}
			inner.fired = true;
			std::mem::take(&mut inner.callbacks)
		};
		for callback in drained {
			callback();
		}
	}
}

/// Diagnostic output of a boot, for manual inspection only.
#[derive(Clone, Default)]
pub struct BootDiagnostics {
	staleness: Arc<Mutex<Option<StalenessSnapshot>>>,
}

impl BootDiagnostics {
	/// Markup captured around a stale render, when diagnostics were on and
	/// the server markup was stale.
	pub fn staleness_snapshot(&self) -> Option<StalenessSnapshot> {
		self.staleness.lock().clone()
	}

	fn record(&self, snapshot: StalenessSnapshot) {
		*self.staleness.lock() = Some(snapshot);
	}
}

/// Wall-clock cost of the synchronous boot phase, shared with every deferred
/// step. Diagnostic only.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootTimings {
	pub render: Duration,
	pub elapsed_labels: Duration,
	pub volatile_data: Duration,
	pub navigation: Option<Duration>,
}

/// Shared record every deferred step receives; steps own no other state.
struct StepCtx {
	host: PageHost,
	config: BootConfig,
	callbacks: PendingCallbackSet,
	flag: SameVersionFlag,
	timings: BootTimings,
	handshake: Option<HandshakeFuture>,
	events: Option<PageEvents>,
	/// Resolved clock start, same value for page and worker.
	start_millis: u64,
}

/// One deferred boot action. Steps run strictly in list order, one per
/// scheduling tick, never concurrently, never skipped, never re-entered.
struct BootStep {
	name: &'static str,
	run: for<'a> fn(&'a mut StepCtx) -> BoxFuture<'a, ()>,
}

const STEPS: &[BootStep] = &[
	BootStep {
		name: "arm-watchers",
		run: step_arm_watchers,
	},
	BootStep {
		name: "forms-and-links",
		run: step_forms_and_links,
	},
	BootStep {
		name: "worker-clock",
		run: step_worker_clock,
	},
	BootStep {
		name: "finish",
		run: step_finish,
	},
];

/// Drives the whole startup timeline. Runs once per page load; `start`
/// consumes the sequencer, so a second run of the same boot cannot be
/// expressed.
pub struct BootSequencer {
	host: PageHost,
	config: BootConfig,
	callbacks: PendingCallbackSet,
	diagnostics: BootDiagnostics,
	flag: SameVersionFlag,
}

impl BootSequencer {
	pub fn new(host: PageHost, config: BootConfig) -> Self {
		Self {
			host,
			config,
			callbacks: PendingCallbackSet::new(),
			diagnostics: BootDiagnostics::default(),
			flag: SameVersionFlag::new(),
		}
	}

	/// Registers a callback to run once boot has fully completed.
	pub fn on_boot_complete(&self, callback: impl FnOnce() + Send + 'static) {
		self.callbacks.register(callback);
	}

	/// Handle collaborators can keep to register callbacks during boot.
	pub fn boot_callbacks(&self) -> PendingCallbackSet {
		self.callbacks.clone()
	}

	/// Diagnostic output handle; snapshots appear here after a stale render
	/// when `BootConfig::diagnostics` is set.
	pub fn diagnostics(&self) -> BootDiagnostics {
		self.diagnostics.clone()
	}

	/// The shared same-version flag. The host wires this into its
	/// worker-reply handler; the handshake polls it.
	pub fn same_version_flag(&self) -> SameVersionFlag {
		self.flag.clone()
	}

	/// Runs the boot sequence to completion.
	///
	/// The synchronous phase runs to the first paint without yielding; the
	/// deferred steps then run one per tick. Nothing here throws outward:
	/// worker trouble degrades to a page without clock sync.
	pub async fn start(self, events: PageEvents) {
		let Self {
			host,
			config,
			callbacks,
			diagnostics,
			flag,
		} = self;

		host.state.initialize();
		let snapshot = host.state.snapshot();
		apply_initial_layout(&host, &config, &snapshot);

		let render_decision = choose_render_mode(snapshot.kind, &config.location, &config.cached_version, &config.current_version);
		info!(
			target: "pagelift.boot",
			cached = %config.cached_version,
			current = %config.current_version,
			mode = ?render_decision.mode,
			"render mode chosen"
		);

		let markup_before = (config.diagnostics && render_decision.markup_stale).then(|| host.document.markup_snapshot());

		let mut timings = BootTimings::default();
		let render_started = Instant::now();
		host.renderer.start_render(render_decision.mode);
		timings.render = render_started.elapsed();

		if let Some(markup_before) = markup_before {
			let markup_after = host.document.markup_snapshot();
			warn!(
				target: "pagelift.boot",
				"stale server markup was re-rendered; snapshots captured for diffing"
			);
			diagnostics.record(StalenessSnapshot { markup_before, markup_after });
		}

		// Still first-frame, but lower priority than the render itself.
		let labels_started = Instant::now();
		let scope = if host.document.content_count() > config.batch_label_cutoff {
			ElapsedLabelScope::ArticleHeader
		} else {
			ElapsedLabelScope::Everything
		};
		host.document.process_elapsed_labels(scope);
		timings.elapsed_labels = labels_started.elapsed();

		let volatile_started = Instant::now();
		host.state.activate_volatile_data();
		timings.volatile_data = volatile_started.elapsed();

		if !snapshot.embedded {
			// Sidebars inside an iframe would render inside the frame and
			// try to navigate there; skip the whole navigation chrome.
			let navigation_started = Instant::now();
			host.chrome.build_navigation();
			timings.navigation = Some(navigation_started.elapsed());
		}

		info!(
			target: "pagelift.boot",
			render_ms = timings.render.as_secs_f64() * 1000.0,
			labels_ms = timings.elapsed_labels.as_secs_f64() * 1000.0,
			volatile_ms = timings.volatile_data.as_secs_f64() * 1000.0,
			navigation_ms = timings.navigation.map(|d| d.as_secs_f64() * 1000.0),
			"first frame ready"
		);

		host.document.add_root_class(BOOT_STARTED_CLASS);
		host.chrome.activate_widgets();

		let start_millis = config.start_time_millis.unwrap_or_else(now_millis);
		let first_step_delay = config.first_step_delay;
		let step_delay = config.step_delay;
		let mut ctx = StepCtx {
			host,
			config,
			callbacks,
			flag,
			timings,
			handshake: None,
			events: Some(events),
			start_millis,
		};

		tokio::time::sleep(first_step_delay).await;
		for (index, step) in STEPS.iter().enumerate() {
			// The final step is not deferred; it runs as soon as the
			// clock-sync step settles.
			let is_last = index + 1 == STEPS.len();
			if index > 0 && !is_last {
				tokio::time::sleep(step_delay).await;
			}
			debug!(target: "pagelift.boot", step = step.name, "running boot step");
			(step.run)(&mut ctx).await;
		}
	}
}

fn apply_initial_layout(host: &PageHost, config: &BootConfig, snapshot: &PageSnapshot) {
	let flags = LayoutFlags::from_query(&config.location.query);
	let decision = choose_initial_layout(flags, config.viewport_major_extent, snapshot.two_pane_layout);
	if decision.changed {
		host.document.remove_root_class(decision.mode.opposite_class());
		host.document.add_root_class(decision.mode.root_class());
		host.state.set_horizontal_layout(decision.mode == LayoutMode::TwoPane);
	}
	if decision.mode == LayoutMode::TwoPane {
		host.chrome.prepare_two_pane_assets();
	}
}

/// Arms the standing watchers and kicks off the worker handshake,
/// fire-and-continue.
fn step_arm_watchers(ctx: &mut StepCtx) -> BoxFuture<'_, ()> {
	async move {
		if let Some(events) = ctx.events.take() {
			SessionReconciler::new(Arc::clone(&ctx.host.session), Arc::clone(&ctx.host.identity)).arm(events.focus_regained);

			let chrome = Arc::clone(&ctx.host.chrome);
			let mut fragment_changed = events.fragment_changed;
			tokio::spawn(async move {
				while fragment_changed.recv().await.is_some() {
					chrome.run_fragment_action();
				}
			});
		}

		let handshake = Handshake::new(Arc::clone(&ctx.host.workers), ctx.flag.clone(), ctx.config.handshake.clone());
		ctx.handshake = Some(handshake.begin());

		ctx.host.chrome.run_fragment_action();
	}
	.boxed()
}

fn step_forms_and_links(ctx: &mut StepCtx) -> BoxFuture<'_, ()> {
	async move {
		ctx.host.chrome.activate_custom_forms();
		ctx.host.chrome.retrofit_navigation_links();
	}
	.boxed()
}

/// Finishes label processing, starts read tracking, and, once the handshake
/// settles either way, posts the clock-start message to a matched worker.
fn step_worker_clock(ctx: &mut StepCtx) -> BoxFuture<'_, ()> {
	async move {
		ctx.host.document.process_elapsed_labels(ElapsedLabelScope::Remaining);
		ctx.host.chrome.start_read_tracker();

		if let Some(handshake) = ctx.handshake.take() {
			match handshake.settled().await {
				Ok(worker) => {
					let command = WorkerCommand::BeginSynchronizedClock {
						start_time_millis: ctx.start_millis,
					};
					if let Err(err) = worker.post(command).await {
						warn!(target: "pagelift.boot", error = %err, "could not start the worker clock");
					}
				}
				Err(err) => {
					debug!(target: "pagelift.boot", error = %err, "no same-version worker; skipping clock sync");
				}
			}
		}
	}
	.boxed()
}

fn step_finish(ctx: &mut StepCtx) -> BoxFuture<'_, ()> {
	async move {
		ctx.host.chrome.start_virtual_clock(ctx.start_millis);
		ctx.callbacks.fire_all();
		info!(
			target: "pagelift.boot",
			render_ms = ctx.timings.render.as_secs_f64() * 1000.0,
			"page started"
		);
	}
	.boxed()
}

fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as u64)
		.unwrap_or_default()
}
