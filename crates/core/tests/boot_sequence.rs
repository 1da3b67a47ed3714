//! End-to-end boot runs against the in-memory fake page.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pagelift::host::fake::{FakePageBuilder, FakeWorker};
use pagelift::host::{WorkerSupport, page_events};
use pagelift::{BootConfig, BootSequencer, HandshakeConfig, PageKind, PageLocation};
use pagelift_protocol::{VersionDescriptor, WorkerCommand};

fn config(path: &str, query: &str) -> BootConfig {
	BootConfig::new(
		PageLocation::new(path, query),
		1280,
		VersionDescriptor::new("cachedhash", "v1"),
		VersionDescriptor::new("currenthash", "v1"),
	)
	.with_start_time_millis(1234)
}

fn position(calls: &[String], call: &str) -> usize {
	calls
		.iter()
		.position(|c| c == call)
		.unwrap_or_else(|| panic!("expected call {call:?} in {calls:?}"))
}

#[tokio::test(start_paused = true)]
async fn boot_runs_host_calls_in_declared_order() {
	let (host, page) = FakePageBuilder::new().worker_support(WorkerSupport::NotWanted).build();
	let (_senders, events) = page_events();
	let sequencer = BootSequencer::new(host, config("/some/topic", ""));

	let fired = Arc::new(AtomicUsize::new(0));
	let fired_in_cb = Arc::clone(&fired);
	sequencer.on_boot_complete(move || {
		fired_in_cb.fetch_add(1, Ordering::SeqCst);
	});

	sequencer.start(events).await;

	let calls = page.calls();
	let order = [
		"state.initialize",
		"render.start:Hydrate",
		"document.process_elapsed_labels:Everything",
		"state.activate_volatile_data",
		"chrome.build_navigation",
		"document.add_root_class:pl-boot-started",
		"chrome.activate_widgets",
		"chrome.run_fragment_action",
		"chrome.activate_custom_forms",
		"chrome.retrofit_navigation_links",
		"document.process_elapsed_labels:Remaining",
		"chrome.start_read_tracker",
		"chrome.start_virtual_clock:1234",
	];
	for pair in order.windows(2) {
		let earlier = position(&calls, pair[0]);
		let later = position(&calls, pair[1]);
		assert!(earlier < later, "{} should precede {}", pair[0], pair[1]);
	}
	let final_call = position(&calls, order[order.len() - 1]);
	assert_eq!(final_call, calls.len() - 1, "the virtual clock starts in the final step");
	assert_eq!(fired.load(Ordering::SeqCst), 1, "boot-complete callbacks fire exactly once");
}

#[tokio::test(start_paused = true)]
async fn clock_sync_message_reaches_a_matched_worker() {
	let (host, page) = FakePageBuilder::new().build();
	let (_senders, events) = page_events();
	let sequencer = BootSequencer::new(host, config("/some/topic", ""));

	let worker = FakeWorker::replying_after(2, sequencer.same_version_flag());
	page.registry().set_controller(worker.clone());

	sequencer.start(events).await;

	let posted = worker.posted();
	assert!(worker.version_queries() >= 2);
	assert_eq!(
		posted.last(),
		Some(&WorkerCommand::BeginSynchronizedClock { start_time_millis: 1234 })
	);

	// The wire shape the worker actually sees.
	let wire = serde_json::to_value(posted.last().unwrap()).unwrap();
	assert_eq!(
		wire,
		serde_json::json!({ "command": "begin-synchronized-clock", "startTimeMillis": 1234 })
	);
}

#[tokio::test(start_paused = true)]
async fn failed_registration_skips_clock_sync_but_boot_completes() {
	let (host, page) = FakePageBuilder::new().registration_error("network down").build();
	let (_senders, events) = page_events();
	let sequencer = BootSequencer::new(host, config("/some/topic", ""));

	let completed = Arc::new(AtomicUsize::new(0));
	let completed_in_cb = Arc::clone(&completed);
	sequencer.on_boot_complete(move || {
		completed_in_cb.fetch_add(1, Ordering::SeqCst);
	});

	sequencer.start(events).await;

	let calls = page.calls();
	assert!(calls.iter().any(|c| c == "worker.register:/pagelift-worker.min.js"));
	assert!(
		!calls.iter().any(|c| c.contains("begin-synchronized-clock")),
		"no clock message may be sent after a failed handshake"
	);
	assert!(calls.iter().any(|c| c == "chrome.start_virtual_clock:1234"));
	assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn embedded_pages_skip_the_navigation_chrome() {
	let (host, page) = FakePageBuilder::new()
		.embedded(true)
		.worker_support(WorkerSupport::NotWanted)
		.build();
	let (_senders, events) = page_events();
	BootSequencer::new(host, config("/some/topic", "")).start(events).await;

	assert!(!page.calls().iter().any(|c| c == "chrome.build_navigation"));
}

#[tokio::test(start_paused = true)]
async fn many_content_items_batch_the_first_label_pass() {
	let (host, page) = FakePageBuilder::new()
		.content_count(21)
		.worker_support(WorkerSupport::NotWanted)
		.build();
	let (_senders, events) = page_events();
	BootSequencer::new(host, config("/some/topic", "")).start(events).await;

	let calls = page.calls();
	assert!(calls.iter().any(|c| c == "document.process_elapsed_labels:ArticleHeader"));
	assert!(calls.iter().any(|c| c == "document.process_elapsed_labels:Remaining"));
}

#[tokio::test(start_paused = true)]
async fn two_pane_query_flips_layout_classes_and_preference() {
	let (host, page) = FakePageBuilder::new().worker_support(WorkerSupport::NotWanted).build();
	let (_senders, events) = page_events();
	BootSequencer::new(host, config("/some/topic", "?2d=true")).start(events).await;

	let calls = page.calls();
	assert!(calls.iter().any(|c| c == "document.remove_root_class:pl-single-column"));
	assert!(calls.iter().any(|c| c == "document.add_root_class:pl-two-pane"));
	assert!(calls.iter().any(|c| c == "state.set_horizontal_layout:true"));
	assert!(calls.iter().any(|c| c == "chrome.prepare_two_pane_assets"));
}

#[tokio::test(start_paused = true)]
async fn listing_pages_rebuild_instead_of_hydrating() {
	let (host, page) = FakePageBuilder::new()
		.kind(PageKind::Listing)
		.worker_support(WorkerSupport::NotWanted)
		.build();
	let (_senders, events) = page_events();
	BootSequencer::new(host, config("/", "")).start(events).await;

	assert!(page.calls().iter().any(|c| c == "render.start:Render"));
}

#[tokio::test(start_paused = true)]
async fn stale_markup_snapshots_are_captured_when_diagnostics_are_on() {
	let (host, _page) = FakePageBuilder::new()
		.markup("<article>old build markup</article>")
		.worker_support(WorkerSupport::NotWanted)
		.build();
	let (_senders, events) = page_events();

	let stale = BootConfig::new(
		PageLocation::new("/some/topic", ""),
		1280,
		VersionDescriptor::new("cachedhash", "v1"),
		VersionDescriptor::new("currenthash", "v2"),
	)
	.with_start_time_millis(1234)
	.with_diagnostics(true);

	let sequencer = BootSequencer::new(host, stale);
	let diagnostics = sequencer.diagnostics();
	sequencer.start(events).await;

	let snapshot = diagnostics.staleness_snapshot().expect("staleness snapshot captured");
	assert_eq!(snapshot.markup_before, "<article>old build markup</article>");
}

#[tokio::test(start_paused = true)]
async fn staleness_diagnostics_stay_off_by_default() {
	let (host, _page) = FakePageBuilder::new().worker_support(WorkerSupport::NotWanted).build();
	let (_senders, events) = page_events();

	let stale = BootConfig::new(
		PageLocation::new("/some/topic", ""),
		1280,
		VersionDescriptor::new("cachedhash", "v1"),
		VersionDescriptor::new("currenthash", "v2"),
	)
	.with_start_time_millis(1234);

	let sequencer = BootSequencer::new(host, stale);
	let diagnostics = sequencer.diagnostics();
	sequencer.start(events).await;

	assert!(diagnostics.staleness_snapshot().is_none());
}

#[tokio::test(start_paused = true)]
async fn fragment_changes_rerun_the_fragment_action() {
	let (host, page) = FakePageBuilder::new().worker_support(WorkerSupport::NotWanted).build();
	let (senders, events) = page_events();
	BootSequencer::new(host, config("/some/topic", "")).start(events).await;

	senders.fragment_changed.send(()).unwrap();
	senders.fragment_changed.send(()).unwrap();
	tokio::time::sleep(Duration::from_millis(1)).await;

	let runs = page.calls().iter().filter(|c| *c == "chrome.run_fragment_action").count();
	// Once during boot, once per fragment change afterwards.
	assert_eq!(runs, 3);
}

#[tokio::test(start_paused = true)]
async fn final_step_runs_without_its_own_deferral() {
	let (host, _page) = FakePageBuilder::new().worker_support(WorkerSupport::NotWanted).build();
	let (_senders, events) = page_events();

	let started = tokio::time::Instant::now();
	BootSequencer::new(host, config("/some/topic", "")).start(events).await;

	// 60 ms before the first step, 50 ms before each of the two middle
	// steps; the finish step adds no deferral of its own.
	assert_eq!(started.elapsed(), Duration::from_millis(160));
}

#[tokio::test(start_paused = true)]
async fn debug_flavor_registers_the_unminified_worker_script() {
	let (host, page) = FakePageBuilder::new().build();
	let (_senders, events) = page_events();

	let sequencer = BootSequencer::new(
		host,
		config("/some/topic", "").with_handshake(HandshakeConfig {
			minified_script: false,
			..HandshakeConfig::default()
		}),
	);
	let worker = FakeWorker::replying_after(1, sequencer.same_version_flag());
	page.registry().set_controller(worker);

	sequencer.start(events).await;

	assert!(page.calls().iter().any(|c| c == "worker.register:/pagelift-worker.js"));
}
