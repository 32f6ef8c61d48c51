//! Overlay configuration and the per-source activation boundary.
//!
//! An [`Overlay`] describes one source of 2D imagery (a basemap, an aerial
//! layer, ...). Attaching it to a tileset activates it: the activation runs
//! the overlay's asynchronous `create_tile_provider` handshake (metadata
//! fetch, capability negotiation) and installs the resulting provider. The
//! handshake is the only per-source code this crate requires; everything
//! else is generic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetFetcher, BoxFuture};
use crate::credit::{Credit, CreditSystem};
use crate::error::OverlayLoadFailure;
use crate::geometry::{Projection, Rectangle};
use crate::preparer::PrepareRendererResources;
use crate::provider::TileImageSource;

/// Default cap on concurrently loading throttled tiles per overlay.
pub const DEFAULT_MAXIMUM_SIMULTANEOUS_TILE_LOADS: u32 = 20;

/// Default maximum screen-space error driving overlay detail selection.
pub const DEFAULT_MAXIMUM_SCREEN_SPACE_ERROR: f64 = 2.0;

/// Tunable options shared by all overlay types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    /// Maximum number of overlay tiles that may be loading at once through
    /// the throttled path. Unthrottled loads bypass this limit.
    pub maximum_simultaneous_tile_loads: u32,

    /// Pixel-error budget for overlay detail selection. Larger values
    /// request coarser imagery.
    pub maximum_screen_space_error: f64,

    /// Whether credits for this overlay must be shown on screen rather than
    /// in an attribution list.
    pub show_credits_on_screen: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            maximum_simultaneous_tile_loads: DEFAULT_MAXIMUM_SIMULTANEOUS_TILE_LOADS,
            maximum_screen_space_error: DEFAULT_MAXIMUM_SCREEN_SPACE_ERROR,
            show_credits_on_screen: false,
        }
    }
}

impl OverlayOptions {
    /// Set the throttled-load cap.
    pub fn with_maximum_simultaneous_tile_loads(mut self, limit: u32) -> Self {
        self.maximum_simultaneous_tile_loads = limit;
        self
    }

    /// Set the screen-space error budget.
    pub fn with_maximum_screen_space_error(mut self, sse: f64) -> Self {
        self.maximum_screen_space_error = sse;
        self
    }
}

/// External systems an activation needs: transport, renderer hooks, credits.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Externals {
    /// Asset transport, usually a [`crate::asset::CachingFetcher`] so that
    /// identical tile requests from different overlays coalesce.
    pub asset_fetcher: Arc<dyn AssetFetcher>,

    /// Renderer preparation hooks. `None` runs the pipeline headless.
    pub preparer: Option<Arc<dyn PrepareRendererResources>>,

    /// Credit registry. `None` disables attribution tracking.
    pub credit_system: Option<Arc<dyn CreditSystem>>,
}

impl Externals {
    pub fn new(asset_fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            asset_fetcher,
            preparer: None,
            credit_system: None,
        }
    }

    pub fn with_preparer(mut self, preparer: Arc<dyn PrepareRendererResources>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    pub fn with_credit_system(mut self, credit_system: Arc<dyn CreditSystem>) -> Self {
        self.credit_system = Some(credit_system);
        self
    }
}

/// Everything the activation needs to build a real tile provider once an
/// overlay's handshake succeeds.
pub struct TileProviderConfig {
    /// Overlay-wide attribution credit, if any.
    pub credit: Option<Credit>,

    /// Projection of the overlay's tiling scheme.
    pub projection: Projection,

    /// Region the overlay has data for, in projected coordinates.
    pub coverage_rectangle: Rectangle,

    /// Source that turns a tile request into imagery.
    pub source: Arc<dyn TileImageSource>,
}

/// One source of 2D overlay imagery.
///
/// Implementations are the format-specific adapters (URL templates, tiled
/// map services, ...). The returned future may perform network I/O; it is
/// driven by a spawned task, so it must own everything it captures.
pub trait Overlay: Send + Sync {
    /// Human-readable overlay name, used in logs and failure details.
    fn name(&self) -> &str;

    /// Options controlling throttling and detail selection.
    fn options(&self) -> &OverlayOptions;

    /// Runs the overlay's source handshake and describes the provider to
    /// build. Errors (and panics) degrade the activation to an empty
    /// provider; they never stall the tileset.
    fn create_tile_provider(
        &self,
        externals: &Externals,
    ) -> BoxFuture<'static, Result<TileProviderConfig, OverlayLoadFailure>>;
}
