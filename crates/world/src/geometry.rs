//! Static level geometry.
//!
//! Level loading lives outside the workspace; the simulation only consumes a
//! bounds rectangle and a lazy sequence of static rectangles.

use relaysync_core::Rect;
use relaysync_net::SolidState;
use serde::{Deserialize, Serialize};

/// Source of static world geometry.
pub trait GeometryProvider {
    /// Playable area.
    fn bounds(&self) -> Rect;

    /// Every static rectangle, collidable or decorative.
    fn solids(&self) -> Box<dyn Iterator<Item = SolidState> + '_>;
}

/// Vector-backed geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticGeometry {
    bounds: Rect,
    solids: Vec<SolidState>,
}

impl StaticGeometry {
    /// Geometry with the given bounds and rectangles.
    pub fn new(bounds: Rect, solids: Vec<SolidState>) -> Self {
        Self { bounds, solids }
    }

    /// Number of rectangles, decorative ones included.
    pub fn len(&self) -> usize {
        self.solids.len()
    }

    /// Whether there are no rectangles at all.
    pub fn is_empty(&self) -> bool {
        self.solids.is_empty()
    }
}

impl GeometryProvider for StaticGeometry {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn solids(&self) -> Box<dyn Iterator<Item = SolidState> + '_> {
        Box::new(self.solids.iter().copied())
    }
}

/// Declarative arena description, usable from config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaLayout {
    /// Arena width.
    pub width: f32,
    /// Arena height.
    pub height: f32,
    /// Thickness of the floor slab along the bottom edge. Zero means no slab;
    /// the bounds' bottom edge still acts as a floor.
    pub floor_thickness: f32,
    /// Collidable platforms.
    pub platforms: Vec<Rect>,
    /// Non-collidable scenery.
    pub decorations: Vec<Rect>,
}

impl Default for ArenaLayout {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            floor_thickness: 32.0,
            platforms: vec![
                Rect::new(120.0, 440.0, 160.0, 16.0),
                Rect::new(520.0, 440.0, 160.0, 16.0),
                Rect::new(320.0, 340.0, 160.0, 16.0),
            ],
            decorations: Vec::new(),
        }
    }
}

impl ArenaLayout {
    /// Empty arena of the given size with no floor slab.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            floor_thickness: 0.0,
            platforms: Vec::new(),
            decorations: Vec::new(),
        }
    }

    /// Add a floor slab.
    pub fn with_floor(mut self, thickness: f32) -> Self {
        self.floor_thickness = thickness;
        self
    }

    /// Add a collidable platform.
    pub fn with_platform(mut self, rect: Rect) -> Self {
        self.platforms.push(rect);
        self
    }

    /// Add scenery that bodies pass through.
    pub fn with_decoration(mut self, rect: Rect) -> Self {
        self.decorations.push(rect);
        self
    }

    /// Top edge of the floor slab (or the bounds' bottom edge).
    pub fn floor_top(&self) -> f32 {
        self.height - self.floor_thickness.max(0.0)
    }

    /// Materialise the layout.
    pub fn build(&self) -> StaticGeometry {
        let bounds = Rect::new(0.0, 0.0, self.width, self.height);
        let mut solids = Vec::with_capacity(self.platforms.len() + self.decorations.len() + 1);
        if self.floor_thickness > 0.0 {
            solids.push(SolidState {
                rect: Rect::new(0.0, self.floor_top(), self.width, self.floor_thickness),
                solid: true,
            });
        }
        solids.extend(self.platforms.iter().map(|&rect| SolidState { rect, solid: true }));
        solids.extend(
            self.decorations
                .iter()
                .map(|&rect| SolidState { rect, solid: false }),
        );
        StaticGeometry::new(bounds, solids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builds_floor_and_platforms() {
        let geometry = ArenaLayout::new(200.0, 100.0)
            .with_floor(10.0)
            .with_platform(Rect::new(50.0, 60.0, 20.0, 5.0))
            .with_decoration(Rect::new(0.0, 0.0, 5.0, 5.0))
            .build();

        assert_eq!(geometry.bounds(), Rect::new(0.0, 0.0, 200.0, 100.0));
        let solids: Vec<SolidState> = geometry.solids().collect();
        assert_eq!(solids.len(), 3);
        assert_eq!(solids[0].rect, Rect::new(0.0, 90.0, 200.0, 10.0));
        assert_eq!(solids.iter().filter(|s| s.solid).count(), 2);
    }

    #[test]
    fn test_no_floor_slab_when_thickness_is_zero() {
        let layout = ArenaLayout::new(100.0, 50.0);
        assert!(layout.build().is_empty());
        assert_eq!(layout.floor_top(), 50.0);
    }
}
