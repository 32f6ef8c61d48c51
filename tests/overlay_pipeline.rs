//! End-to-end test of the overlay pipeline: activate an overlay, map it
//! onto geometry tiles, drive throttled loads, and update the mappings
//! until imagery is attached.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use rasterlayer::asset::BoxFuture;
use rasterlayer::mapped::map_overlay_to_tile;
use rasterlayer::tileset::GeometryTile;
use rasterlayer::{
    ActivatedOverlay, AssetFetcher, AssetResponse, AttachmentState, Externals, MoreDetailAvailable,
    OverlayDetails, OverlayError, OverlayTile, PrepareRendererResources, Projection, Rectangle,
    RendererResources, TileArena, TileKey, TileLoadState, TileProvider, UrlTemplateOverlay, Vec2,
};

/// Serves the same PNG for every URL and records what was requested.
struct StaticImageFetcher {
    png: Bytes,
    requests: Mutex<Vec<String>>,
}

impl StaticImageFetcher {
    fn new(width: u32, height: u32) -> Self {
        let mut encoded = Vec::new();
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 128, 255, 255]));
        image
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Png,
            )
            .expect("png encoding should succeed");
        Self {
            png: Bytes::from(encoded),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl AssetFetcher for StaticImageFetcher {
    fn get(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<AssetResponse, OverlayError>> {
        self.requests.lock().push(url.to_string());
        let data = self.png.clone();
        Box::pin(async move { Ok(AssetResponse { status: 200, data }) })
    }
}

#[derive(Default)]
struct CountingPreparer {
    attaches: Mutex<Vec<TileKey>>,
    detaches: Mutex<Vec<TileKey>>,
}

impl PrepareRendererResources for CountingPreparer {
    fn prepare_in_load_context(
        &self,
        _image: &rasterlayer::DecodedImage,
    ) -> Option<RendererResources> {
        Some(Arc::new("texture handle"))
    }

    fn attach(
        &self,
        geometry_tile: TileKey,
        _texture_coordinate_index: Option<u32>,
        _overlay_tile: &OverlayTile,
        _translation: Vec2,
        _scale: Vec2,
    ) {
        self.attaches.lock().push(geometry_tile);
    }

    fn detach(
        &self,
        geometry_tile: TileKey,
        _texture_coordinate_index: Option<u32>,
        _overlay_tile: &OverlayTile,
    ) {
        self.detaches.lock().push(geometry_tile);
    }
}

const TEMPLATE: &str = "http://maps/export?bbox={minx},{miny},{maxx},{maxy}&size={width},{height}";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn geographic_details(rectangle: Rectangle) -> OverlayDetails {
    OverlayDetails::new(
        vec![Projection::Geographic(rasterlayer::Ellipsoid::WGS84)],
        vec![rectangle],
    )
}

async fn wait_for_idle(provider: &TileProvider) {
    for _ in 0..400 {
        if provider.tiles_loading() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("tile loads never finished");
}

#[tokio::test]
async fn test_overlay_pipeline_end_to_end() {
    init_tracing();
    let fetcher = Arc::new(StaticImageFetcher::new(16, 16));
    let preparer = Arc::new(CountingPreparer::default());
    let externals = Externals::new(Arc::clone(&fetcher) as Arc<dyn AssetFetcher>)
        .with_preparer(Arc::clone(&preparer) as Arc<dyn PrepareRendererResources>);

    let overlay = Arc::new(
        UrlTemplateOverlay::new("basemap", TEMPLATE)
            .with_coverage_rectangle(Rectangle::new(0.0, 0.0, 8.0, 8.0))
            .with_attribution("Example Imagery"),
    );
    let activated = ActivatedOverlay::activate(overlay, &externals);
    activated.ready().await;
    let provider = activated.provider().expect("activation resolved");

    // A small tree: root covers the whole overlay, one child covers the
    // lower-left quarter.
    let mut arena = TileArena::new();
    let root_rect = Rectangle::new(0.0, 0.0, 8.0, 8.0);
    let child_rect = Rectangle::new(0.0, 0.0, 4.0, 4.0);
    let root = arena.insert(
        GeometryTile::new(None, 64.0).with_overlay_details(geographic_details(root_rect)),
    );
    let child = arena.insert(
        GeometryTile::new(Some(root), 32.0).with_overlay_details(geographic_details(child_rect)),
    );

    let mut missing = Vec::new();
    assert!(map_overlay_to_tile(&activated, &mut arena, root, &mut missing));
    assert!(map_overlay_to_tile(&activated, &mut arena, child, &mut missing));
    assert!(missing.is_empty());

    // Nothing attached yet; the first update reports the pending loads.
    assert_eq!(arena.update_overlays(root), MoreDetailAvailable::Unknown);

    // Kick off both loads through the throttled path.
    for key in [root, child] {
        for mapping in arena.get(key).mapped_overlays() {
            assert!(mapping.load_throttled());
        }
    }
    wait_for_idle(&provider).await;

    // Both mappings settle into their own imagery.
    assert_eq!(arena.update_overlays(root), MoreDetailAvailable::No);
    assert_eq!(arena.update_overlays(child), MoreDetailAvailable::No);

    {
        let root_mapping = &arena.get(root).mapped_overlays()[0];
        assert_eq!(root_mapping.state(), AttachmentState::Attached);
        let ready = root_mapping.ready_tile().expect("root imagery attached");
        assert_eq!(ready.state(), TileLoadState::Loaded);
        assert_eq!(ready.image().unwrap().width(), 16);
        assert_eq!(ready.credits().len(), 1);
        assert_eq!(ready.credits()[0].text(), "Example Imagery");

        // Each tile got its own imagery with an identity remap.
        let child_mapping = &arena.get(child).mapped_overlays()[0];
        assert_eq!(child_mapping.scale(), Vec2::new(1.0, 1.0));
        assert_eq!(child_mapping.translation(), Vec2::ZERO);
    }

    assert_eq!(preparer.attaches.lock().len(), 2);
    assert_eq!(fetcher.requests.lock().len(), 2);

    // Two 16x16 RGBA images are accounted.
    assert_eq!(provider.tile_data_bytes(), 2 * 16 * 16 * 4);

    // Detaching releases the renderer hook; dropping the mappings releases
    // the imagery bytes.
    arena.detach_tile(root);
    arena.detach_tile(child);
    assert_eq!(preparer.detaches.lock().len(), 2);

    arena.get_mut(root).mapped_overlays_mut().clear();
    arena.get_mut(child).mapped_overlays_mut().clear();
    assert_eq!(provider.tile_data_bytes(), 0);
}

#[tokio::test]
async fn test_mapping_before_activation_upgrades_after_ready() {
    init_tracing();
    let fetcher = Arc::new(StaticImageFetcher::new(8, 8));
    let externals = Externals::new(Arc::clone(&fetcher) as Arc<dyn AssetFetcher>);

    let overlay = Arc::new(
        UrlTemplateOverlay::new("late", TEMPLATE)
            .with_coverage_rectangle(Rectangle::new(0.0, 0.0, 8.0, 8.0)),
    );
    let activated = ActivatedOverlay::activate(overlay, &externals);

    let mut arena = TileArena::new();
    let rect = Rectangle::new(0.0, 0.0, 4.0, 4.0);
    let key =
        arena.insert(GeometryTile::new(None, 32.0).with_overlay_details(geographic_details(rect)));

    // Mapping may happen before the handshake resolves; the mapping then
    // holds a placeholder and reports Unknown.
    let mut missing = Vec::new();
    if !activated.is_ready() {
        assert!(map_overlay_to_tile(&activated, &mut arena, key, &mut missing));
        assert_eq!(arena.update_overlays(key), MoreDetailAvailable::Unknown);
    }

    activated.ready().await;

    // Once ready, the consumer replaces placeholder mappings.
    arena.detach_tile(key);
    arena.get_mut(key).mapped_overlays_mut().clear();
    assert!(map_overlay_to_tile(&activated, &mut arena, key, &mut missing));

    let provider = activated.provider().unwrap();
    for mapping in arena.get(key).mapped_overlays() {
        assert!(mapping.load_throttled());
    }
    wait_for_idle(&provider).await;

    arena.update_overlays(key);
    let mapping = &arena.get(key).mapped_overlays()[0];
    assert_eq!(mapping.state(), AttachmentState::Attached);
    assert_eq!(
        mapping.ready_tile().unwrap().state(),
        TileLoadState::Loaded
    );
}
