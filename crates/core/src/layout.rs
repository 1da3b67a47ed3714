//! Initial layout-mode selection.
//!
//! The URL query may ask for the two-pane (horizontal) layout with `2d=true`
//! or veto it with `2d=false`. A narrow viewport always forces the
//! single-column layout, whatever the query says.

/// Viewport extent below which two-pane layout is never used.
///
/// Compared against the larger of the window's outer dimensions; the outer
/// size is used because reading it does not force a layout reflow, and
/// off-by-a-border inexactness does not matter at this threshold.
pub const TWO_PANE_MIN_EXTENT: u32 = 1000;

/// Root class present while the two-pane layout is active.
pub const TWO_PANE_CLASS: &str = "pl-two-pane";
/// Root class present while the single-column layout is active.
pub const SINGLE_COLUMN_CLASS: &str = "pl-single-column";

/// The layout the page content is arranged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
	SingleColumn,
	TwoPane,
}

impl LayoutMode {
	/// The document root class for this mode.
	pub fn root_class(self) -> &'static str {
		match self {
			LayoutMode::SingleColumn => SINGLE_COLUMN_CLASS,
			LayoutMode::TwoPane => TWO_PANE_CLASS,
		}
	}

	/// The document root class of the other mode.
	pub fn opposite_class(self) -> &'static str {
		match self {
			LayoutMode::SingleColumn => TWO_PANE_CLASS,
			LayoutMode::TwoPane => SINGLE_COLUMN_CLASS,
		}
	}
}

/// Layout wishes extracted from the URL query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutFlags {
	pub enable_two_pane: bool,
	pub disable_two_pane: bool,
}

impl LayoutFlags {
	/// Recognizes `2d=true` and `2d=false` anywhere in the query string.
	pub fn from_query(query: &str) -> Self {
		Self {
			enable_two_pane: query.contains("2d=true"),
			disable_two_pane: query.contains("2d=false"),
		}
	}
}

/// Outcome of the initial layout decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutDecision {
	pub mode: LayoutMode,
	/// Whether the stored preference differs and must be persisted.
	pub changed: bool,
}

/// Picks the initial layout from query flags, the viewport's larger outer
/// dimension, and the stored preference.
///
/// Below [`TWO_PANE_MIN_EXTENT`] the result is single-column no matter what
/// the query asked for.
pub fn choose_initial_layout(flags: LayoutFlags, viewport_major_extent: u32, currently_two_pane: bool) -> LayoutDecision {
	let too_narrow = viewport_major_extent < TWO_PANE_MIN_EXTENT;
	let shall_disable = flags.disable_two_pane || too_narrow;

	if currently_two_pane && shall_disable {
		return LayoutDecision {
			mode: LayoutMode::SingleColumn,
			changed: true,
		};
	}
	if !currently_two_pane && flags.enable_two_pane && !shall_disable {
		return LayoutDecision {
			mode: LayoutMode::TwoPane,
			changed: true,
		};
	}

	LayoutDecision {
		mode: if currently_two_pane { LayoutMode::TwoPane } else { LayoutMode::SingleColumn },
		changed: false,
	}
}
