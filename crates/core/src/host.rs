//! Capability traits for the host page.
//!
//! The boot sequencer never touches the DOM, the state container, or the
//! worker platform directly. Everything it needs from the surrounding page is
//! expressed here as a narrow trait, so the whole subsystem can be exercised
//! against in-memory fakes (see [`fake`]).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::reconciler::{IdentitySource, SessionSource};
use crate::render::RenderMode;
use pagelift_protocol::WorkerCommand;

pub mod fake;

/// Broad category of the page being booted, as far as render-mode selection
/// cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
	/// A listing/index page whose visible content may depend on client-only
	/// parameters (offset, sort order) the server-rendered markup cannot
	/// reflect.
	Listing,
	/// A discussion page with server-rendered content.
	Discussion,
	/// Anything else.
	Other,
}

/// Immutable view of the state container at boot time.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
	pub kind: PageKind,
	/// Whether the stored preference says two-pane layout.
	pub two_pane_layout: bool,
	/// Whether the page renders inside a third-party iframe.
	pub embedded: bool,
}

/// Path and query of the current location.
#[derive(Debug, Clone, Default)]
pub struct PageLocation {
	pub path: String,
	pub query: String,
}

impl PageLocation {
	pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			query: query.into(),
		}
	}
}

/// The in-memory UI state container.
pub trait StateStore: Send + Sync {
	fn initialize(&self);
	fn snapshot(&self) -> PageSnapshot;
	fn set_horizontal_layout(&self, two_pane: bool);
	/// Activates per-user "volatile" overlay data on top of the cacheable
	/// page content.
	fn activate_volatile_data(&self);
}

/// The rendering engine entry point.
pub trait Renderer: Send + Sync {
	fn start_render(&self, mode: RenderMode);
}

/// Which elapsed-time labels to process in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElapsedLabelScope {
	/// Every label on the page.
	Everything,
	/// Only the article header, used when the page has many content items
	/// and processing all of them would delay the first frame.
	ArticleHeader,
	/// Whatever an earlier pass left unprocessed.
	Remaining,
}

/// DOM-level queries and mutations.
pub trait Document: Send + Sync {
	fn add_root_class(&self, class: &str);
	fn remove_root_class(&self, class: &str);
	/// Number of visible content items (posts, not the title).
	fn content_count(&self) -> usize;
	fn process_elapsed_labels(&self, scope: ElapsedLabelScope);
	/// Serialized markup of the content root, for staleness diagnostics.
	fn markup_snapshot(&self) -> String;
}

/// Page chrome and widget activation hooks invoked by boot steps.
pub trait Chrome: Send + Sync {
	/// Builds the secondary navigation chrome (sidebars, watch bar). Skipped
	/// entirely on embedded pages.
	fn build_navigation(&self);
	/// Activates interactive widgets that must exist synchronously once the
	/// boot-started marker is set.
	fn activate_widgets(&self);
	fn activate_custom_forms(&self);
	/// Retrofits internal navigation links with client-side routing.
	fn retrofit_navigation_links(&self);
	fn start_read_tracker(&self);
	/// Runs the action encoded in the URL fragment, if any.
	fn run_fragment_action(&self);
	/// Pre-arranges the extra script bundle the two-pane layout needs.
	fn prepare_two_pane_assets(&self);
	/// Starts the page-side virtual clock.
	fn start_virtual_clock(&self, start_time_millis: u64);
}

/// Whether background workers can be used in this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSupport {
	Usable,
	/// Deliberately not used here, e.g. the deployment opted out.
	NotWanted,
	/// Wanted, but the platform cannot provide them (insecure origin,
	/// incognito session).
	Unsupported,
}

/// A handle to a worker currently controlling this page.
#[async_trait]
pub trait WorkerPort: Send + Sync {
	async fn post(&self, command: WorkerCommand) -> Result<()>;
}

/// Shared, cloneable worker handle.
pub type WorkerHandle = Arc<dyn WorkerPort>;

/// The platform's worker registration capability.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
	fn support(&self) -> WorkerSupport;
	/// Registers the worker script at `script_path`.
	async fn register(&self, script_path: &str) -> Result<()>;
	/// Returns the worker currently in control of this page, if any. This
	/// stays `None` until some worker, possibly an old version, has been
	/// installed, activated, and has claimed the page.
	fn controller(&self) -> Option<WorkerHandle>;
}

/// Everything the boot sequencer consumes from the surrounding page.
#[derive(Clone)]
pub struct PageHost {
	pub state: Arc<dyn StateStore>,
	pub renderer: Arc<dyn Renderer>,
	pub document: Arc<dyn Document>,
	pub chrome: Arc<dyn Chrome>,
	pub workers: Arc<dyn WorkerRegistry>,
	pub session: Arc<dyn SessionSource>,
	pub identity: Arc<dyn IdentitySource>,
}

/// Event streams the host page feeds into the sequencer.
///
/// The senders live wherever the page wires up its real event listeners;
/// each receiver is consumed once, by `BootSequencer::start`.
pub struct PageEvents {
	/// Fires when the window regains focus after the user switched tabs.
	pub focus_regained: mpsc::UnboundedReceiver<()>,
	/// Fires when the location fragment changes.
	pub fragment_changed: mpsc::UnboundedReceiver<()>,
}

/// Sender halves matching [`PageEvents`].
#[derive(Clone)]
pub struct PageEventSenders {
	pub focus_regained: mpsc::UnboundedSender<()>,
	pub fragment_changed: mpsc::UnboundedSender<()>,
}

/// Creates a connected event-sender/event-receiver pair.
pub fn page_events() -> (PageEventSenders, PageEvents) {
	let (focus_tx, focus_rx) = mpsc::unbounded_channel();
	let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
	(
		PageEventSenders {
			focus_regained: focus_tx,
			fragment_changed: fragment_tx,
		},
		PageEvents {
			focus_regained: focus_rx,
			fragment_changed: fragment_rx,
		},
	)
}
