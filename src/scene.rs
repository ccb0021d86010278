//! Scene published to the compositor
//!
//! Each toplevel composition tree is flattened into a [`SceneSurface`]: the
//! buffer streams of the tree with their displacement from the root, and the
//! accumulated input shape. Scene surfaces live in per-output
//! [`DisplaySyncGroup`]s; the render loop walks one group per output, and
//! each group has its own lock so outputs compose independently.

use crate::geometry::{Displacement, Point, Rectangle, Size};
use crate::stream::BufferStream;
use crate::surface::SurfaceId;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One stream of a composition tree and where it is drawn
#[derive(Debug, Clone)]
pub struct StreamSpecification {
    pub stream: Arc<BufferStream>,
    /// Offset from the scene surface's top left
    pub displacement: Displacement,
    /// Surface-coordinate size the stream is drawn at
    pub size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneSurfaceId(u64);

#[derive(Debug, Default)]
struct SceneSurfaceState {
    top_left: Point,
    streams: Vec<StreamSpecification>,
    input_shape: Vec<Rectangle>,
}

#[derive(Debug)]
pub struct SceneSurface {
    id: SceneSurfaceId,
    root: SurfaceId,
    output: usize,
    state: Mutex<SceneSurfaceState>,
}

impl SceneSurface {
    pub fn new(root: SurfaceId, output: usize) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: SceneSurfaceId(NEXT.fetch_add(1, Ordering::Relaxed)),
            root,
            output,
            state: Mutex::new(SceneSurfaceState::default()),
        }
    }

    pub fn id(&self) -> SceneSurfaceId {
        self.id
    }

    /// The surface at the root of the composition tree
    pub fn root(&self) -> SurfaceId {
        self.root
    }

    pub fn output(&self) -> usize {
        self.output
    }

    /// Placement belongs to the window manager; this only records it
    pub fn move_to(&self, top_left: Point) {
        self.state.lock().top_left = top_left;
    }

    pub fn top_left(&self) -> Point {
        self.state.lock().top_left
    }

    /// Replaces the published streams and input shape in one step
    pub fn publish(&self, streams: Vec<StreamSpecification>, input_shape: Vec<Rectangle>) {
        let mut state = self.state.lock();
        debug!(
            "Scene surface {:?} now has {} streams, {} input rectangles",
            self.id,
            streams.len(),
            input_shape.len()
        );
        state.streams = streams;
        state.input_shape = input_shape;
    }

    pub fn streams(&self) -> Vec<StreamSpecification> {
        self.state.lock().streams.clone()
    }

    pub fn input_shape(&self) -> Vec<Rectangle> {
        self.state.lock().input_shape.clone()
    }

    /// Whether `point` (scene coordinates) falls inside the input shape
    pub fn input_area_contains(&self, point: Point) -> bool {
        let state = self.state.lock();
        let local = point - Displacement::new(state.top_left.x, state.top_left.y);
        state.input_shape.iter().any(|rect| rect.contains(local))
    }
}

/// Surfaces presented together on one output
#[derive(Debug, Default)]
pub struct DisplaySyncGroup {
    output: usize,
    surfaces: Mutex<Vec<Arc<SceneSurface>>>,
}

impl DisplaySyncGroup {
    fn new(output: usize) -> Self {
        Self {
            output,
            surfaces: Mutex::new(Vec::new()),
        }
    }

    pub fn output(&self) -> usize {
        self.output
    }

    /// Snapshot in stacking order, bottom first
    pub fn surfaces(&self) -> Vec<Arc<SceneSurface>> {
        self.surfaces.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Scene {
    groups: Vec<DisplaySyncGroup>,
}

impl Scene {
    pub fn new(outputs: usize) -> Self {
        let outputs = outputs.max(1);
        Self {
            groups: (0..outputs).map(DisplaySyncGroup::new).collect(),
        }
    }

    pub fn outputs(&self) -> usize {
        self.groups.len()
    }

    pub fn display_sync_groups(&self) -> &[DisplaySyncGroup] {
        &self.groups
    }

    pub fn group(&self, output: usize) -> Option<&DisplaySyncGroup> {
        self.groups.get(output)
    }

    /// The output a surface asking for `output` is shown on
    pub fn resolve_output(&self, output: usize) -> usize {
        if output < self.groups.len() {
            output
        } else {
            warn!("Output {} does not exist, using output 0", output);
            0
        }
    }

    pub fn add_surface(&self, surface: Arc<SceneSurface>) {
        let output = self.resolve_output(surface.output());
        self.groups[output].surfaces.lock().push(surface);
    }

    pub fn remove_surface(&self, surface: &Arc<SceneSurface>) {
        for group in &self.groups {
            group
                .surfaces
                .lock()
                .retain(|existing| !Arc::ptr_eq(existing, surface));
        }
    }

    /// Topmost scene surface whose input shape contains `point`
    pub fn surface_at(&self, output: usize, point: Point) -> Option<Arc<SceneSurface>> {
        let group = self.groups.get(output)?;
        let surfaces = group.surfaces.lock();
        surfaces
            .iter()
            .rev()
            .find(|surface| surface.input_area_contains(point))
            .cloned()
    }

    pub fn surface_count(&self) -> usize {
        self.groups.iter().map(DisplaySyncGroup::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> SurfaceId {
        SurfaceId::new(0, 0)
    }

    #[test]
    fn test_unknown_output_falls_back_to_first() {
        let scene = Scene::new(2);
        scene.add_surface(Arc::new(SceneSurface::new(root(), 5)));
        assert_eq!(scene.group(0).map(DisplaySyncGroup::len), Some(1));
        assert_eq!(scene.surface_count(), 1);
    }

    #[test]
    fn test_resolve_output() {
        let scene = Scene::new(2);
        assert_eq!(scene.resolve_output(1), 1);
        assert_eq!(scene.resolve_output(2), 0);
    }

    #[test]
    fn test_remove_surface() {
        let scene = Scene::new(1);
        let surface = Arc::new(SceneSurface::new(root(), 0));
        scene.add_surface(surface.clone());
        scene.remove_surface(&surface);
        assert_eq!(scene.surface_count(), 0);
    }

    #[test]
    fn test_surface_at_respects_stacking_and_position() {
        let scene = Scene::new(1);
        let bottom = Arc::new(SceneSurface::new(root(), 0));
        let top = Arc::new(SceneSurface::new(SurfaceId::new(1, 0), 0));
        bottom.publish(Vec::new(), vec![Rectangle::from_xywh(0, 0, 100, 100)]);
        top.publish(Vec::new(), vec![Rectangle::from_xywh(0, 0, 20, 20)]);
        top.move_to(Point::new(50, 50));
        scene.add_surface(bottom.clone());
        scene.add_surface(top.clone());

        let hit = scene.surface_at(0, Point::new(60, 60));
        assert_eq!(hit.map(|s| s.id()), Some(top.id()));
        let hit = scene.surface_at(0, Point::new(10, 10));
        assert_eq!(hit.map(|s| s.id()), Some(bottom.id()));
        assert!(scene.surface_at(0, Point::new(200, 200)).is_none());
    }
}
