//! Projected-space geometry primitives.
//!
//! Overlay coverage, imagery requests, and the UV remap all operate on
//! axis-aligned rectangles in a map projection's coordinate space. This
//! module provides the minimal rectangle and projection math the overlay
//! pipeline needs; it deliberately does not attempt to be a full geodesy
//! library.

use serde::{Deserialize, Serialize};

/// A reference ellipsoid, reduced to the single radius the overlay math uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Maximum radius in meters.
    pub maximum_radius: f64,
}

impl Ellipsoid {
    /// The WGS84 ellipsoid.
    pub const WGS84: Ellipsoid = Ellipsoid {
        maximum_radius: 6_378_137.0,
    };
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Ellipsoid::WGS84
    }
}

/// A 2D vector of doubles.
///
/// Used for target screen resolutions and for the translation/scale pair of
/// the UV remap.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::ops::Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f64> for Vec2 {
    type Output = Vec2;

    fn div(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

/// An axis-aligned rectangle in projected coordinates.
///
/// An empty rectangle (zero or negative extent) overlaps nothing, which is
/// how the empty tile provider reports "no coverage anywhere".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rectangle {
    /// An empty rectangle at the origin.
    pub const EMPTY: Rectangle = Rectangle {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    };

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True if this rectangle has no positive area.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// True if the two rectangles share any interior area.
    ///
    /// Touching edges do not count as overlap, and empty rectangles never
    /// overlap anything.
    pub fn overlaps(&self, other: &Rectangle) -> bool {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        min_x < max_x && min_y < max_y
    }

    /// The overlapping region of two rectangles, if any.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let result = Rectangle::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

/// An unprojected rectangle on the globe, in radians.
///
/// Geometry tiles carry one of these (derived from their bounding volume) so
/// a coarse imagery rectangle can be requested before precise UVs exist.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobeRectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GlobeRectangle {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The whole globe.
    pub const MAXIMUM: GlobeRectangle = GlobeRectangle {
        west: -std::f64::consts::PI,
        south: -std::f64::consts::FRAC_PI_2,
        east: std::f64::consts::PI,
        north: std::f64::consts::FRAC_PI_2,
    };
}

/// A map projection from globe coordinates to projected meters.
///
/// Two projections are considered the same overlay coordinate space only if
/// they compare equal, which is what the per-tile UV set lookup keys on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// Equirectangular: x and y are proportional to longitude and latitude.
    Geographic(Ellipsoid),
    /// Spherical Web Mercator.
    WebMercator(Ellipsoid),
}

impl Projection {
    fn ellipsoid(&self) -> &Ellipsoid {
        match self {
            Projection::Geographic(e) => e,
            Projection::WebMercator(e) => e,
        }
    }

    /// Projects a single globe point to projected coordinates.
    pub fn project(&self, longitude: f64, latitude: f64) -> Vec2 {
        let r = self.ellipsoid().maximum_radius;
        match self {
            Projection::Geographic(_) => Vec2::new(longitude * r, latitude * r),
            Projection::WebMercator(_) => {
                // Clamp away from the poles where the projection diverges.
                let lat = latitude.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
                let y = (std::f64::consts::FRAC_PI_4 + lat * 0.5).tan().ln();
                Vec2::new(longitude * r, y * r)
            }
        }
    }

    /// Projects a globe rectangle corner-wise.
    ///
    /// Valid for projections where x depends only on longitude and y only on
    /// latitude, which holds for both projections offered here.
    pub fn project_rectangle(&self, rectangle: &GlobeRectangle) -> Rectangle {
        let lower = self.project(rectangle.west, rectangle.south);
        let upper = self.project(rectangle.east, rectangle.north);
        Rectangle::new(lower.x, lower.y, upper.x, upper.y)
    }

    /// The largest rectangle the projection can cover.
    pub fn maximum_rectangle(&self) -> Rectangle {
        self.project_rectangle(&GlobeRectangle::MAXIMUM)
    }
}

/// Latitude bound of the Web Mercator projection (~85.05°), in radians.
const MAX_MERCATOR_LATITUDE: f64 = 1.484_422_229_745_332_4;
