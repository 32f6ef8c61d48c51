//! Overlay activation: attaching an overlay to a tileset session.
//!
//! Activation starts the overlay's asynchronous source handshake and hands
//! out a placeholder provider immediately, so geometry tiles can be mapped
//! without waiting. When the handshake resolves, the real provider is
//! installed exactly once and a readiness signal fires; if the handshake
//! fails or panics, an always-empty provider is installed instead and the
//! overlay silently contributes no imagery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::geometry::{Ellipsoid, Rectangle, Vec2};
use crate::overlay::{Externals, Overlay};
use crate::provider::TileProvider;
use crate::tile::{OverlayId, OverlayTile};

static NEXT_OVERLAY_ID: AtomicU64 = AtomicU64::new(1);

fn next_overlay_id() -> OverlayId {
    NEXT_OVERLAY_ID.fetch_add(1, Ordering::Relaxed)
}

/// An overlay attached to a tileset session.
///
/// Holds the placeholder provider from construction and the real provider
/// once activation resolves. Tile requests transparently route to whichever
/// is current.
pub struct ActivatedOverlay {
    overlay: Arc<dyn Overlay>,
    overlay_id: OverlayId,
    placeholder_provider: Arc<TileProvider>,
    provider: RwLock<Option<Arc<TileProvider>>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl ActivatedOverlay {
    /// Activates `overlay`: spawns its source handshake and returns
    /// immediately with a placeholder provider in place.
    pub fn activate(overlay: Arc<dyn Overlay>, externals: &Externals) -> Arc<Self> {
        let overlay_id = next_overlay_id();
        let placeholder_provider = TileProvider::placeholder(
            Arc::clone(&overlay),
            overlay_id,
            externals.clone(),
            Ellipsoid::WGS84,
        );
        let (ready_tx, ready_rx) = watch::channel(false);

        let activated = Arc::new(Self {
            overlay: Arc::clone(&overlay),
            overlay_id,
            placeholder_provider,
            provider: RwLock::new(None),
            ready_tx,
            ready_rx,
        });

        debug!(overlay = overlay.name(), overlay_id, "Activating overlay");

        let handshake = overlay.create_tile_provider(externals);
        let externals = externals.clone();
        let this = Arc::clone(&activated);
        tokio::spawn(async move {
            use futures::FutureExt;
            let result = std::panic::AssertUnwindSafe(handshake).catch_unwind().await;
            let provider = match result {
                Ok(Ok(config)) => {
                    info!(
                        overlay = this.overlay.name(),
                        coverage = ?config.coverage_rectangle,
                        "Overlay activated"
                    );
                    TileProvider::from_config(
                        Arc::clone(&this.overlay),
                        this.overlay_id,
                        externals,
                        config,
                    )
                }
                Ok(Err(failure)) => {
                    error!(
                        overlay = %failure.overlay_name,
                        error = %failure.message,
                        "Overlay activation failed; overlay will contribute no imagery"
                    );
                    TileProvider::empty(
                        Arc::clone(&this.overlay),
                        this.overlay_id,
                        externals,
                        Ellipsoid::WGS84,
                    )
                }
                Err(_panic) => {
                    error!(
                        overlay = this.overlay.name(),
                        "Overlay activation panicked; overlay will contribute no imagery"
                    );
                    TileProvider::empty(
                        Arc::clone(&this.overlay),
                        this.overlay_id,
                        externals,
                        Ellipsoid::WGS84,
                    )
                }
            };
            this.install_provider(provider);
        });

        activated
    }

    /// Installs the resolved provider. A second call is a no-op; the first
    /// installation wins and readiness fires exactly once.
    fn install_provider(&self, provider: Arc<TileProvider>) {
        let mut slot = self.provider.write();
        if slot.is_some() {
            return;
        }
        *slot = Some(provider);
        drop(slot);
        let _ = self.ready_tx.send(true);
    }

    /// The overlay this activation belongs to.
    pub fn overlay(&self) -> &Arc<dyn Overlay> {
        &self.overlay
    }

    /// Session-unique identity shared by this activation's placeholder and
    /// real providers and every tile they create.
    pub fn overlay_id(&self) -> OverlayId {
        self.overlay_id
    }

    /// The stand-in provider available from construction.
    pub fn placeholder_provider(&self) -> &Arc<TileProvider> {
        &self.placeholder_provider
    }

    /// The real (or empty) provider, once activation has resolved.
    pub fn provider(&self) -> Option<Arc<TileProvider>> {
        self.provider.read().clone()
    }

    /// Whichever provider is current: the real one if installed, the
    /// placeholder otherwise.
    pub fn current_provider(&self) -> Arc<TileProvider> {
        self.provider
            .read()
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.placeholder_provider))
    }

    /// True once the handshake has resolved, successfully or not.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Resolves when the handshake completes. Safe to call after the fact.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Requests a tile through the current provider; before readiness this
    /// yields the shared placeholder tile.
    pub fn get_tile(
        &self,
        rectangle: Rectangle,
        target_resolution: Vec2,
    ) -> Option<Arc<OverlayTile>> {
        self.current_provider().get_tile(rectangle, target_resolution)
    }
}
