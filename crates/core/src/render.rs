//! Render-mode selection: reuse server-produced markup, or discard it and
//! rebuild.
//!
//! Hydrating reuses the markup the server already sent; rendering throws it
//! away and rebuilds everything client side. Hydration is the default, but
//! several conditions make the server markup unusable, and the URL query can
//! force either mode for debugging.

use pagelift_protocol::VersionDescriptor;
use tracing::debug;

use crate::host::{PageKind, PageLocation};

/// Path prefix for "action" pages, which are never rendered server side.
pub const ACTION_PATH_PREFIX: &str = "/-/";

/// How the rendering engine should produce the page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
	/// Reuse the server-produced markup.
	Hydrate,
	/// Discard any server-produced markup and rebuild from scratch.
	Render,
}

/// A render-mode choice plus its staleness diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDecision {
	pub mode: RenderMode,
	/// True when the server markup was produced by a different code build.
	/// Stays set even when a query override later forces hydration, so
	/// diagnostics can still capture the mismatch.
	pub markup_stale: bool,
}

/// Markup captured around a stale render, for manual diff inspection.
///
/// A diagnostic aid only; nothing reads these programmatically.
#[derive(Debug, Clone)]
pub struct StalenessSnapshot {
	pub markup_before: String,
	pub markup_after: String,
}

/// Decides the render mode. First matching rule wins; the query overrides
/// are applied last and beat everything else.
pub fn choose_render_mode(
	kind: PageKind,
	location: &PageLocation,
	cached_version: &VersionDescriptor,
	current_version: &VersionDescriptor,
) -> RenderDecision {
	let mut mode = RenderMode::Hydrate;
	let mut markup_stale = false;

	if kind == PageKind::Listing {
		// A listing may carry an offset or a non-default sort order the
		// server markup cannot reflect.
		mode = RenderMode::Render;
	} else if location.path.starts_with(ACTION_PATH_PREFIX) {
		// Never rendered server side, nothing to reuse.
		mode = RenderMode::Render;
	} else if !current_version.same_code_build(cached_version) {
		debug!(
			target: "pagelift.boot",
			cached = %cached_version,
			current = %current_version,
			"cached markup is from a different code build; will rebuild"
		);
		markup_stale = true;
		mode = RenderMode::Render;
	}

	if location.query.contains("&hydrate=false") {
		debug!(target: "pagelift.boot", "rebuilding because the URL says &hydrate=false");
		mode = RenderMode::Render;
	}
	if location.query.contains("&hydrate=true") {
		debug!(target: "pagelift.boot", "reusing server markup because the URL says &hydrate=true");
		mode = RenderMode::Hydrate;
	}

	RenderDecision { mode, markup_stale }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn versions(cached: &str, current: &str) -> (VersionDescriptor, VersionDescriptor) {
		(cached.parse().unwrap(), current.parse().unwrap())
	}

	fn at(path: &str, query: &str) -> PageLocation {
		PageLocation::new(path, query)
	}

	#[test]
	fn equal_builds_hydrate_by_default() {
		let (cached, current) = versions("aaa|v1", "bbb|v1");
		let decision = choose_render_mode(PageKind::Discussion, &at("/some/topic", ""), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Hydrate);
		assert!(!decision.markup_stale);
	}

	#[test]
	fn listing_pages_always_rebuild() {
		let (cached, current) = versions("aaa|v1", "aaa|v1");
		let decision = choose_render_mode(PageKind::Listing, &at("/", ""), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Render);
		assert!(!decision.markup_stale);
	}

	#[test]
	fn action_paths_always_rebuild() {
		let (cached, current) = versions("aaa|v1", "aaa|v1");
		let decision = choose_render_mode(PageKind::Other, &at("/-/search", ""), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Render);
	}

	#[test]
	fn differing_builds_rebuild_and_flag_stale_markup() {
		let (cached, current) = versions("aaa|v1", "aaa|v2");
		let decision = choose_render_mode(PageKind::Discussion, &at("/some/topic", ""), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Render);
		assert!(decision.markup_stale);
	}

	#[test]
	fn hydrate_false_overrides_a_hydrate_outcome() {
		let (cached, current) = versions("aaa|v1", "bbb|v1");
		let decision = choose_render_mode(PageKind::Discussion, &at("/some/topic", "?a=b&hydrate=false"), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Render);
	}

	#[test]
	fn hydrate_true_overrides_a_version_mismatch() {
		let (cached, current) = versions("aaa|v1", "aaa|v2");
		let decision = choose_render_mode(PageKind::Discussion, &at("/some/topic", "?a=b&hydrate=true"), &cached, &current);
		assert_eq!(decision.mode, RenderMode::Hydrate);
		// The staleness diagnosis survives the override.
		assert!(decision.markup_stale);
	}

	#[test]
	fn hydrate_true_wins_over_hydrate_false() {
		let (cached, current) = versions("aaa|v1", "aaa|v1");
		let decision = choose_render_mode(
			PageKind::Discussion,
			&at("/some/topic", "?x=1&hydrate=false&hydrate=true"),
			&cached,
			&current,
		);
		assert_eq!(decision.mode, RenderMode::Hydrate);
	}
}
