// pagelift: staged page boot sequencing with a background-worker version
// handshake.
//
// The sequencer brings an already-served page to a fully interactive state
// across multiple scheduling ticks, while a concurrently running handshake
// waits for a background worker of the same code version. Everything the
// surrounding page provides (state container, renderer, DOM, cookies,
// worker platform) is consumed through the narrow traits in `host`.

pub mod error;
pub mod handshake;
pub mod host;
pub mod layout;
pub mod reconciler;
pub mod render;
pub mod sequencer;

pub use error::{Error, Result};
pub use handshake::{Handshake, HandshakeConfig, HandshakeFuture, HandshakeState, HandshakeWatch, SameVersionFlag};
pub use host::{PageEvents, PageEventSenders, PageHost, PageKind, PageLocation, page_events};
pub use layout::{LayoutFlags, LayoutMode, choose_initial_layout};
pub use reconciler::{Identity, IdentitySource, SessionReconciler, SessionSource, SessionToken};
pub use render::{RenderDecision, RenderMode, choose_render_mode};
pub use sequencer::{BootConfig, BootDiagnostics, BootSequencer, PendingCallbackSet};
