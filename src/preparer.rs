//! Renderer resource preparation boundary.
//!
//! The overlay core never talks to a GPU. Whatever rendering backend sits
//! above it implements [`PrepareRendererResources`]: a load-context hook that
//! turns a decoded image into an opaque resource handle on a worker, and
//! attach/detach hooks invoked from the state-owning context as imagery is
//! draped onto (or removed from) geometry tiles.

use std::any::Any;
use std::sync::Arc;

use crate::geometry::Vec2;
use crate::tile::OverlayTile;
use crate::tileset::TileKey;

/// Opaque renderer resource handle.
///
/// Owned by the renderer; the overlay core only stores and returns it.
pub type RendererResources = Arc<dyn Any + Send + Sync>;

/// Renderer preparation hooks for overlay imagery.
pub trait PrepareRendererResources: Send + Sync {
    /// Called on a blocking worker once a tile's image has been decoded and
    /// validated. Returns the renderer's handle for the image, if any.
    fn prepare_in_load_context(&self, image: &crate::image_data::DecodedImage)
        -> Option<RendererResources>;

    /// Attaches a ready overlay tile's imagery to a geometry tile.
    ///
    /// `texture_coordinate_index` is `None` for mappings created before a
    /// texture coordinate set was assigned.
    fn attach(
        &self,
        geometry_tile: TileKey,
        texture_coordinate_index: Option<u32>,
        overlay_tile: &OverlayTile,
        translation: Vec2,
        scale: Vec2,
    );

    /// Detaches previously attached imagery from a geometry tile.
    fn detach(
        &self,
        geometry_tile: TileKey,
        texture_coordinate_index: Option<u32>,
        overlay_tile: &OverlayTile,
    );
}

/// Preparer that does nothing, for headless use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPreparer;

impl PrepareRendererResources for NoopPreparer {
    fn prepare_in_load_context(
        &self,
        _image: &crate::image_data::DecodedImage,
    ) -> Option<RendererResources> {
        None
    }

    fn attach(
        &self,
        _geometry_tile: TileKey,
        _texture_coordinate_index: Option<u32>,
        _overlay_tile: &OverlayTile,
        _translation: Vec2,
        _scale: Vec2,
    ) {
    }

    fn detach(
        &self,
        _geometry_tile: TileKey,
        _texture_coordinate_index: Option<u32>,
        _overlay_tile: &OverlayTile,
    ) {
    }
}
