//! shotkit is a camera-layout toolkit for 3D scene graphs.
//!
//! It bundles the three algorithmic engines a layout artist leans on while
//! blocking shots:
//!
//! 1. **Remap**: [`CurveRemap`] time-warps a 3-key window of a camera's focal
//!    curve through a bounded alpha domain and bakes it back, leaving every
//!    key outside the window bit-identical.
//! 2. **Spiral guide**: [`SpiralCurveBuilder`] grows a golden-ratio spiral
//!    from [`SpiralPointGenerator`] quarter-arcs and pins it to a camera's
//!    image plane; [`ThirdsGuideBuilder`] does the same for a thirds grid.
//! 3. **Scale sync**: [`ScaleSyncGraph`] is a live formula graph that keeps
//!    guide surfaces sized to the camera's aperture, near clip and focal
//!    length, one graph per camera.
//!
//! Everything operates on an in-memory [`Scene`]: entities with scalar
//! attributes, animation curves, live attr-to-attr connections and scalar
//! expression bindings, re-evaluated synchronously on every upstream write.
//! [`ToolContext`] owns the scene plus the interactive state (panels, active
//! camera, observers); there is no global state in the crate.
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Fail fast**: engines validate selection and preconditions before any
//!   mutation; a rejected operation leaves the scene byte-for-byte unchanged.
//! - **Single-threaded**: operations run to completion on the calling thread;
//!   the only "concurrency" is the synchronous push propagation of the
//!   dependency graph.
#![forbid(unsafe_code)]

pub mod anim;
pub mod context;
pub mod core;
pub mod error;
pub mod guides;
pub mod remap;
pub mod scale_sync;
pub mod scene;
pub mod spiral;

pub use crate::core::{EntityId, GOLDEN_RATIO, Plug, TimeRange};

pub use anim::{AnimCurve, Keyframe, TangentMode};
pub use context::{ActiveCamera, ContextEvent, NEAR_SLIDER_SCALE, SubscriptionId, ToolContext};
pub use error::{ShotkitError, ShotkitResult};
pub use guides::{Panel, ThirdsGuideBuilder};
pub use remap::{CurveRemap, RemapReport};
pub use scale_sync::ScaleSyncGraph;
pub use scene::{AttrSpec, EntityKind, FormulaKind, ScalarExpr, Scene};
pub use spiral::{ArcSegment, SpiralCurveBuilder, SpiralPointGenerator, SpiralTriple};
