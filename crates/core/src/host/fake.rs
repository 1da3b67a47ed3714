//! In-memory host fakes for unit and integration testing.
//!
//! Provides a controllable fake page so the boot sequencer, handshake, and
//! reconciler can be exercised without a browser. Every call into the host
//! is recorded in one ordered log, which tests assert on.
//!
//! # Example
//!
//! ```ignore
//! let (host, page) = FakePageBuilder::new().embedded(true).build();
//! let sequencer = BootSequencer::new(host, config);
//! sequencer.start(events).await;
//! assert!(!page.calls().contains(&"chrome.build_navigation".to_string()));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::handshake::SameVersionFlag;
use crate::host::{
	Chrome, Document, ElapsedLabelScope, PageHost, PageKind, PageSnapshot, Renderer, StateStore, WorkerHandle,
	WorkerPort, WorkerRegistry, WorkerSupport,
};
use crate::reconciler::{Identity, IdentitySource, SessionSource, SessionToken};
use crate::render::RenderMode;
use pagelift_protocol::WorkerCommand;

type CallLog = Arc<Mutex<Vec<String>>>;

fn command_name(command: &WorkerCommand) -> &'static str {
	match command {
		WorkerCommand::ReportYourVersion => "report-your-version",
		WorkerCommand::BeginSynchronizedClock { .. } => "begin-synchronized-clock",
	}
}

/// Builder for a fake page host.
pub struct FakePageBuilder {
	kind: PageKind,
	two_pane: bool,
	embedded: bool,
	content_count: usize,
	markup: String,
	worker_support: WorkerSupport,
	registration_error: Option<String>,
}

impl FakePageBuilder {
	pub fn new() -> Self {
		Self {
			kind: PageKind::Discussion,
			two_pane: false,
			embedded: false,
			content_count: 3,
			markup: "<article>server markup</article>".to_string(),
			worker_support: WorkerSupport::Usable,
			registration_error: None,
		}
	}

	pub fn kind(mut self, kind: PageKind) -> Self {
		self.kind = kind;
		self
	}

	pub fn two_pane(mut self, two_pane: bool) -> Self {
		self.two_pane = two_pane;
		self
	}

	pub fn embedded(mut self, embedded: bool) -> Self {
		self.embedded = embedded;
		self
	}

	pub fn content_count(mut self, count: usize) -> Self {
		self.content_count = count;
		self
	}

	pub fn markup(mut self, markup: impl Into<String>) -> Self {
		self.markup = markup.into();
		self
	}

	pub fn worker_support(mut self, support: WorkerSupport) -> Self {
		self.worker_support = support;
		self
	}

	pub fn registration_error(mut self, cause: impl Into<String>) -> Self {
		self.registration_error = Some(cause.into());
		self
	}

	/// Builds the host bundle and a controller for steering and inspecting
	/// the fake from tests.
	pub fn build(self) -> (PageHost, FakePageController) {
		let log: CallLog = Arc::new(Mutex::new(Vec::new()));

		let page = Arc::new(FakePage {
			log: Arc::clone(&log),
			snapshot: Mutex::new(PageSnapshot {
				kind: self.kind,
				two_pane_layout: self.two_pane,
				embedded: self.embedded,
			}),
			content_count: self.content_count,
			markup: Mutex::new(self.markup),
		});

		let mut registry = FakeWorkerRegistry::new(self.worker_support).with_log(Arc::clone(&log));
		if let Some(cause) = self.registration_error {
			registry = registry.failing_registration(cause);
		}
		let registry = Arc::new(registry);
		let session = FakeSession::without_token();
		let identity = FakeIdentity::logged_out();

		let host = PageHost {
			state: Arc::clone(&page) as _,
			renderer: Arc::clone(&page) as _,
			document: Arc::clone(&page) as _,
			chrome: Arc::clone(&page) as _,
			workers: Arc::clone(&registry) as _,
			session: Arc::clone(&session) as _,
			identity: Arc::clone(&identity) as _,
		};

		let controller = FakePageController {
			log,
			page,
			registry,
			session,
			identity,
		};

		(host, controller)
	}
}

impl Default for FakePageBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Steers the fake host and inspects what the code under test did to it.
pub struct FakePageController {
	log: CallLog,
	page: Arc<FakePage>,
	registry: Arc<FakeWorkerRegistry>,
	session: Arc<FakeSession>,
	identity: Arc<FakeIdentity>,
}

impl FakePageController {
	/// Every host call so far, in invocation order.
	pub fn calls(&self) -> Vec<String> {
		self.log.lock().clone()
	}

	pub fn registry(&self) -> &Arc<FakeWorkerRegistry> {
		&self.registry
	}

	pub fn session(&self) -> &Arc<FakeSession> {
		&self.session
	}

	pub fn identity(&self) -> &Arc<FakeIdentity> {
		&self.identity
	}

	/// Replaces the markup snapshot the document reports, simulating a
	/// render changing the page content.
	pub fn set_markup(&self, markup: impl Into<String>) {
		*self.page.markup.lock() = markup.into();
	}
}

struct FakePage {
	log: CallLog,
	snapshot: Mutex<PageSnapshot>,
	content_count: usize,
	markup: Mutex<String>,
}

impl FakePage {
	fn record(&self, call: impl Into<String>) {
		self.log.lock().push(call.into());
	}
}

impl StateStore for FakePage {
	fn initialize(&self) {
		self.record("state.initialize");
	}

	fn snapshot(&self) -> PageSnapshot {
		self.snapshot.lock().clone()
	}

	fn set_horizontal_layout(&self, two_pane: bool) {
		self.record(format!("state.set_horizontal_layout:{two_pane}"));
		self.snapshot.lock().two_pane_layout = two_pane;
	}

	fn activate_volatile_data(&self) {
		self.record("state.activate_volatile_data");
	}
}

impl Renderer for FakePage {
	fn start_render(&self, mode: RenderMode) {
		self.record(format!("render.start:{mode:?}"));
	}
}

impl Document for FakePage {
	fn add_root_class(&self, class: &str) {
		self.record(format!("document.add_root_class:{class}"));
	}

	fn remove_root_class(&self, class: &str) {
		self.record(format!("document.remove_root_class:{class}"));
	}

	fn content_count(&self) -> usize {
		self.content_count
	}

	fn process_elapsed_labels(&self, scope: ElapsedLabelScope) {
		self.record(format!("document.process_elapsed_labels:{scope:?}"));
	}

	fn markup_snapshot(&self) -> String {
		self.markup.lock().clone()
	}
}

impl Chrome for FakePage {
	fn build_navigation(&self) {
		self.record("chrome.build_navigation");
	}

	fn activate_widgets(&self) {
		self.record("chrome.activate_widgets");
	}

	fn activate_custom_forms(&self) {
		self.record("chrome.activate_custom_forms");
	}

	fn retrofit_navigation_links(&self) {
		self.record("chrome.retrofit_navigation_links");
	}

	fn start_read_tracker(&self) {
		self.record("chrome.start_read_tracker");
	}

	fn run_fragment_action(&self) {
		self.record("chrome.run_fragment_action");
	}

	fn prepare_two_pane_assets(&self) {
		self.record("chrome.prepare_two_pane_assets");
	}

	fn start_virtual_clock(&self, start_time_millis: u64) {
		self.record(format!("chrome.start_virtual_clock:{start_time_millis}"));
	}
}

/// Fake worker-registration capability.
pub struct FakeWorkerRegistry {
	support: WorkerSupport,
	registration_error: Option<String>,
	registered: Mutex<Vec<String>>,
	controller: Mutex<Option<WorkerHandle>>,
	log: Option<CallLog>,
}

impl FakeWorkerRegistry {
	pub fn new(support: WorkerSupport) -> Self {
		Self {
			support,
			registration_error: None,
			registered: Mutex::new(Vec::new()),
			controller: Mutex::new(None),
			log: None,
		}
	}

	fn with_log(mut self, log: CallLog) -> Self {
		self.log = Some(log);
		self
	}

	/// Makes every registration attempt fail with `cause`.
	pub fn failing_registration(mut self, cause: impl Into<String>) -> Self {
		self.registration_error = Some(cause.into());
		self
	}

	/// Installs `worker` as the controller of the page, as if it had claimed
	/// the tab.
	pub fn set_controller(&self, worker: Arc<FakeWorker>) {
		*self.controller.lock() = Some(worker as WorkerHandle);
	}

	/// Scripts passed to `register`, in order.
	pub fn registered_scripts(&self) -> Vec<String> {
		self.registered.lock().clone()
	}

	fn record(&self, call: impl Into<String>) {
		if let Some(log) = &self.log {
			log.lock().push(call.into());
		}
	}
}

#[async_trait]
impl WorkerRegistry for FakeWorkerRegistry {
	fn support(&self) -> WorkerSupport {
		self.support
	}

	async fn register(&self, script_path: &str) -> Result<()> {
		self.record(format!("worker.register:{script_path}"));
		self.registered.lock().push(script_path.to_string());
		match &self.registration_error {
			Some(cause) => Err(Error::WorkerRegistration(cause.clone())),
			None => Ok(()),
		}
	}

	fn controller(&self) -> Option<WorkerHandle> {
		self.controller.lock().clone()
	}
}

/// Fake controlling worker.
///
/// Replies are simulated synchronously: when the configured version query
/// arrives, the worker flips the shared same-version flag, the way the real
/// reply handler would a tick later.
pub struct FakeWorker {
	posted: Mutex<Vec<WorkerCommand>>,
	version_queries: AtomicU32,
	reply_after: Option<u32>,
	flag: Option<SameVersionFlag>,
	post_error: Option<String>,
}

impl FakeWorker {
	/// A worker that reports a matching version on the `reply_after`-th
	/// query.
	pub fn replying_after(reply_after: u32, flag: SameVersionFlag) -> Arc<Self> {
		Arc::new(Self {
			posted: Mutex::new(Vec::new()),
			version_queries: AtomicU32::new(0),
			reply_after: Some(reply_after),
			flag: Some(flag),
			post_error: None,
		})
	}

	/// A worker that never answers version queries.
	pub fn silent() -> Arc<Self> {
		Arc::new(Self {
			posted: Mutex::new(Vec::new()),
			version_queries: AtomicU32::new(0),
			reply_after: None,
			flag: None,
			post_error: None,
		})
	}

	/// A worker whose message port is broken.
	pub fn failing(cause: impl Into<String>) -> Arc<Self> {
		Arc::new(Self {
			posted: Mutex::new(Vec::new()),
			version_queries: AtomicU32::new(0),
			reply_after: None,
			flag: None,
			post_error: Some(cause.into()),
		})
	}

	/// Every command posted to this worker, in order.
	pub fn posted(&self) -> Vec<WorkerCommand> {
		self.posted.lock().clone()
	}

	/// How many version queries arrived so far.
	pub fn version_queries(&self) -> u32 {
		self.version_queries.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl WorkerPort for FakeWorker {
	async fn post(&self, command: WorkerCommand) -> Result<()> {
		if let Some(cause) = &self.post_error {
			return Err(Error::WorkerPost(cause.clone()));
		}
		let name = command_name(&command);
		self.posted.lock().push(command);
		if name == "report-your-version" {
			let queries = self.version_queries.fetch_add(1, Ordering::SeqCst) + 1;
			if let (Some(reply_after), Some(flag)) = (self.reply_after, &self.flag) {
				if queries >= reply_after {
					flag.mark_same_version();
				}
			}
		}
		Ok(())
	}
}

/// Fake cookie-backed session state.
pub struct FakeSession {
	token: Mutex<Option<SessionToken>>,
	tab_session: Mutex<bool>,
}

impl FakeSession {
	pub fn with_token(token: SessionToken) -> Arc<Self> {
		Arc::new(Self {
			token: Mutex::new(Some(token)),
			tab_session: Mutex::new(false),
		})
	}

	pub fn without_token() -> Arc<Self> {
		Arc::new(Self {
			token: Mutex::new(None),
			tab_session: Mutex::new(false),
		})
	}

	pub fn set_token(&self, token: Option<SessionToken>) {
		*self.token.lock() = token;
	}

	pub fn set_tab_session(&self, present: bool) {
		*self.tab_session.lock() = present;
	}
}

impl SessionSource for FakeSession {
	fn session_token(&self) -> Option<SessionToken> {
		self.token.lock().clone()
	}

	fn has_tab_session(&self) -> bool {
		*self.tab_session.lock()
	}
}

/// Fake in-memory identity with a scripted server-side answer.
pub struct FakeIdentity {
	user: Mutex<Option<i64>>,
	server_user: Mutex<Option<i64>>,
	reloads: AtomicUsize,
	clears: AtomicUsize,
}

impl FakeIdentity {
	pub fn logged_in_as(user_id: i64) -> Arc<Self> {
		Arc::new(Self {
			user: Mutex::new(Some(user_id)),
			server_user: Mutex::new(Some(user_id)),
			reloads: AtomicUsize::new(0),
			clears: AtomicUsize::new(0),
		})
	}

	pub fn logged_out() -> Arc<Self> {
		Arc::new(Self {
			user: Mutex::new(None),
			server_user: Mutex::new(None),
			reloads: AtomicUsize::new(0),
			clears: AtomicUsize::new(0),
		})
	}

	/// Sets what the server would answer on the next reload.
	pub fn set_server_user(&self, user_id: Option<i64>) {
		*self.server_user.lock() = user_id;
	}

	pub fn reload_count(&self) -> usize {
		self.reloads.load(Ordering::SeqCst)
	}

	pub fn clear_count(&self) -> usize {
		self.clears.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl IdentitySource for FakeIdentity {
	fn current(&self) -> Identity {
		Identity {
			user_id: *self.user.lock(),
		}
	}

	async fn reload_from_server(&self) {
		self.reloads.fetch_add(1, Ordering::SeqCst);
		*self.user.lock() = *self.server_user.lock();
	}

	fn clear_local(&self) {
		self.clears.fetch_add(1, Ordering::SeqCst);
		*self.user.lock() = None;
	}
}
