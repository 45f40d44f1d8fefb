//! Subsurface tree walks: paint order, hit testing, extents.
//!
//! Traversal is level by level. For each level its "below" children are
//! walked first, then the level itself, then its "above" children. Runs off
//! an explicit stack so deep trees do not recurse.

use super::{Surface, SurfaceId, SurfaceRole};
use crate::region::{Point, Rectangle, Region};
use crate::registry::Registry;

enum Task {
    Level(Vec<(SurfaceId, (i32, i32))>),
    Visit(Vec<(SurfaceId, (i32, i32))>),
}

fn is_child_of(surfaces: &Registry<Surface>, child: SurfaceId, parent: SurfaceId) -> bool {
    surfaces
        .get(child)
        .and_then(|s| s.role.subsurface())
        .is_some_and(|sub| sub.parent == parent)
}

/// Drops links to children that are gone or no longer point back at us.
fn prune(surfaces: &mut Registry<Surface>, parent: SurfaceId) {
    let Some(surface) = surfaces.get(parent) else {
        return;
    };
    let dead: Vec<SurfaceId> = surface
        .children
        .iter()
        .filter(|c| !is_child_of(surfaces, *c, parent))
        .collect();
    if dead.is_empty() {
        return;
    }
    log::debug!("[subsurface] Pruning {} dead links from {:?}", dead.len(), parent);
    if let Some(surface) = surfaces.get_mut(parent) {
        for child in dead {
            surface.children.remove(child);
        }
    }
}

fn child_offset(surfaces: &Registry<Surface>, child: SurfaceId, base: (i32, i32)) -> (i32, i32) {
    let position = surfaces
        .get(child)
        .and_then(|s| s.role.subsurface())
        .map(|sub| sub.position)
        .unwrap_or((0, 0));
    (base.0 + position.0, base.1 + position.1)
}

/// Every surface of the tree under `root` with its offset from the root, in
/// paint order (bottom first).
pub fn breadth_first(surfaces: &mut Registry<Surface>, root: SurfaceId) -> Vec<(SurfaceId, (i32, i32))> {
    let mut out = Vec::new();
    if !surfaces.contains(root) {
        return out;
    }

    let mut stack = vec![Task::Level(vec![(root, (0, 0))])];
    while let Some(task) = stack.pop() {
        match task {
            Task::Visit(nodes) => out.extend(nodes),
            Task::Level(nodes) => {
                let mut below = Vec::new();
                let mut above = Vec::new();
                for &(id, offset) in &nodes {
                    prune(surfaces, id);
                    let Some(surface) = surfaces.get(id) else {
                        continue;
                    };
                    for &child in &surface.children.below {
                        below.push((child, child_offset(surfaces, child, offset)));
                    }
                    for &child in &surface.children.above {
                        above.push((child, child_offset(surfaces, child, offset)));
                    }
                }

                if !above.is_empty() {
                    stack.push(Task::Level(above));
                }
                stack.push(Task::Visit(nodes));
                if !below.is_empty() {
                    stack.push(Task::Level(below));
                }
            }
        }
    }
    out
}

/// Topmost surface under `point` (root coordinates) and the point in that
/// surface's coordinates. With `use_input` the input region decides,
/// otherwise the logical size box does.
pub fn surface_at(
    surfaces: &mut Registry<Surface>,
    root: SurfaceId,
    point: Point,
    use_input: bool,
) -> Option<(SurfaceId, Point)> {
    let order = breadth_first(surfaces, root);
    for (id, (dx, dy)) in order.into_iter().rev() {
        let Some(surface) = surfaces.get(id) else {
            continue;
        };
        let bounds = Rectangle::from_size(surface.current.size);
        let hit = if use_input {
            let mut input = surface.current.input.clone();
            input.intersect(bounds).translate(dx, dy);
            input.contains_point(point.x, point.y)
        } else {
            bounds.translated(dx, dy).contains_point(point.x, point.y)
        };
        if hit {
            return Some((id, Point::new(point.x - dx as f64, point.y - dy as f64)));
        }
    }
    None
}

/// Bounding box of `root` and all of its subsurfaces, root coordinates.
pub fn extents(surfaces: &mut Registry<Surface>, root: SurfaceId) -> Rectangle {
    let Some(size) = surfaces.get(root).map(|s| s.current.size) else {
        return Rectangle::default();
    };
    let mut region = Region::from_rect(Rectangle::from_size(size));
    for (id, (dx, dy)) in breadth_first(surfaces, root) {
        let Some(surface) = surfaces.get(id) else {
            continue;
        };
        if matches!(surface.role, SurfaceRole::Subsurface(_)) {
            region.add(Rectangle::new(dx, dy, surface.current.size.width, surface.current.size.height));
        }
    }
    region.extents()
}

/// First surface in pre-order (parent, then children bottom to top) that
/// matches `pred`.
pub fn find_first_preorder(
    surfaces: &Registry<Surface>,
    root: SurfaceId,
    pred: &mut dyn FnMut(SurfaceId, &Surface) -> bool,
) -> Option<SurfaceId> {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(surface) = surfaces.get(id) else {
            continue;
        };
        if pred(id, surface) {
            return Some(id);
        }
        for child in surface.children.iter().collect::<Vec<_>>().into_iter().rev() {
            if is_child_of(surfaces, child, id) {
                stack.push(child);
            }
        }
    }
    None
}

/// Root of the subsurface tree `id` belongs to.
pub fn root_of(surfaces: &Registry<Surface>, id: SurfaceId) -> SurfaceId {
    let mut current = id;
    // bounded in case a broken link ever forms a loop
    for _ in 0..=surfaces.len() {
        match surfaces.get(current).and_then(|s| s.role.subsurface()) {
            Some(sub) if surfaces.contains(sub.parent) => current = sub.parent,
            _ => return current,
        }
    }
    current
}

/// Whether `ancestor` is `id` or one of its parents.
pub fn is_ancestor(surfaces: &Registry<Surface>, ancestor: SurfaceId, id: SurfaceId) -> bool {
    let mut current = id;
    for _ in 0..=surfaces.len() {
        if current == ancestor {
            return true;
        }
        match surfaces.get(current).and_then(|s| s.role.subsurface()) {
            Some(sub) => current = sub.parent,
            None => return false,
        }
    }
    false
}

/// A subsurface is synchronized if it or any subsurface above it is.
pub fn is_effectively_synced(surfaces: &Registry<Surface>, id: SurfaceId) -> bool {
    let mut current = id;
    for _ in 0..=surfaces.len() {
        let Some(sub) = surfaces.get(current).and_then(|s| s.role.subsurface()) else {
            return false;
        };
        // orphaned subsurfaces have nothing to wait for
        if !surfaces.contains(sub.parent) {
            return false;
        }
        if sub.sync {
            return true;
        }
        current = sub.parent;
    }
    false
}

/// The surface whose commit notifies `id`: the nearest surface at or above
/// it that is not effectively synchronized.
pub fn governing_ancestor(surfaces: &Registry<Surface>, id: SurfaceId) -> SurfaceId {
    let mut current = id;
    for _ in 0..=surfaces.len() {
        if !is_effectively_synced(surfaces, current) {
            return current;
        }
        match surfaces.get(current).and_then(|s| s.role.subsurface()) {
            Some(sub) => current = sub.parent,
            None => return current,
        }
    }
    current
}
