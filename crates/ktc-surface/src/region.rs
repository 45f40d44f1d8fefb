/// Axis aligned box in integer surface or buffer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// A box large enough to stand in for "the whole surface". Clamped
    /// against the real size at commit time.
    pub const fn infinite() -> Self {
        Self { x: 0, y: 0, width: i32::MAX, height: i32::MAX }
    }

    pub fn from_size(size: Size) -> Self {
        Self { x: 0, y: 0, width: size.width, height: size.height }
    }

    fn from_edges(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        let clamp = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        Self {
            x: clamp(x1),
            y: clamp(y1),
            width: clamp(x2 - x1),
            height: clamp(y2 - y1),
        }
    }

    pub fn x2(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn y2(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as i64) < other.x2()
            && self.x2() > other.x as i64
            && (self.y as i64) < other.y2()
            && self.y2() > other.y as i64
    }

    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self::from_edges(
            (self.x as i64).max(other.x as i64),
            (self.y as i64).max(other.y as i64),
            self.x2().min(other.x2()),
            self.y2().min(other.y2()),
        ))
    }

    pub fn union(&self, other: &Rectangle) -> Rectangle {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_edges(
            (self.x as i64).min(other.x as i64),
            (self.y as i64).min(other.y as i64),
            self.x2().max(other.x2()),
            self.y2().max(other.y2()),
        )
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        !self.is_empty()
            && x >= self.x as f64
            && y >= self.y as f64
            && x < self.x2() as f64
            && y < self.y2() as f64
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    /// `self` minus `other`, as at most four disjoint pieces.
    fn subtract(&self, other: &Rectangle, out: &mut Vec<Rectangle>) {
        if !self.intersects(other) {
            out.push(*self);
            return;
        }

        let (ax1, ay1, ax2, ay2) = (self.x as i64, self.y as i64, self.x2(), self.y2());
        let (bx1, by1, bx2, by2) = (other.x as i64, other.y as i64, other.x2(), other.y2());

        if by1 > ay1 {
            out.push(Self::from_edges(ax1, ay1, ax2, by1));
        }
        if by2 < ay2 {
            out.push(Self::from_edges(ax1, by2, ax2, ay2));
        }

        let band_top = ay1.max(by1);
        let band_bottom = ay2.min(by2);
        if bx1 > ax1 {
            out.push(Self::from_edges(ax1, band_top, bx1, band_bottom));
        }
        if bx2 < ax2 {
            out.push(Self::from_edges(bx2, band_top, ax2, band_bottom));
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A 2D area stored as a set of pairwise disjoint rectangles.
///
/// The rectangle list is an implementation detail: two regions built from
/// different add/subtract sequences that cover the same area may enumerate
/// different rectangles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rectangle) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn infinite() -> Self {
        Self::from_rect(Rectangle::infinite())
    }

    pub fn add(&mut self, rect: Rectangle) -> &mut Self {
        if rect.is_empty() {
            return self;
        }

        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                piece.subtract(existing, &mut next);
            }
            pieces = next;
            if pieces.is_empty() {
                return self;
            }
        }
        self.rects.extend(pieces);
        self
    }

    pub fn add_region(&mut self, other: &Region) -> &mut Self {
        for rect in &other.rects {
            self.add(*rect);
        }
        self
    }

    pub fn subtract(&mut self, rect: Rectangle) -> &mut Self {
        if rect.is_empty() {
            return self;
        }
        let mut out = Vec::with_capacity(self.rects.len());
        for existing in &self.rects {
            existing.subtract(&rect, &mut out);
        }
        self.rects = out;
        self
    }

    pub fn intersect(&mut self, rect: Rectangle) -> &mut Self {
        self.rects = self
            .rects
            .iter()
            .filter_map(|r| r.intersection(&rect))
            .collect();
        self
    }

    pub fn intersect_region(&mut self, other: &Region) -> &mut Self {
        let mut out = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(r) = a.intersection(b) {
                    out.push(r);
                }
            }
        }
        self.rects = out;
        self
    }

    pub fn translate(&mut self, dx: i32, dy: i32) -> &mut Self {
        for rect in &mut self.rects {
            *rect = rect.translated(dx, dy);
        }
        self
    }

    pub fn scale(&mut self, factor: i32) -> &mut Self {
        for rect in &mut self.rects {
            *rect = Rectangle::from_edges(
                rect.x as i64 * factor as i64,
                rect.y as i64 * factor as i64,
                rect.x2() * factor as i64,
                rect.y2() * factor as i64,
            );
        }
        self
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rects.iter().all(Rectangle::is_empty)
    }

    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    pub fn extents(&self) -> Rectangle {
        self.rects
            .iter()
            .fold(Rectangle::default(), |acc, r| acc.union(r))
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rectangle::area).sum()
    }
}

impl From<Rectangle> for Region {
    fn from(rect: Rectangle) -> Self {
        Self::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers_same(a: &Region, b: &Region, probe: Rectangle) -> bool {
        for y in probe.y..probe.y + probe.height {
            for x in probe.x..probe.x + probe.width {
                let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                if a.contains_point(px, py) != b.contains_point(px, py) {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn test_add_keeps_rects_disjoint() {
        let mut region = Region::new();
        region.add(Rectangle::new(0, 0, 10, 10));
        region.add(Rectangle::new(5, 5, 10, 10));

        assert_eq!(region.area(), 100 + 100 - 25);
        for (i, a) in region.rects().iter().enumerate() {
            for b in &region.rects()[i + 1..] {
                assert!(!a.intersects(b));
            }
        }
    }

    #[test]
    fn test_subtract_punches_hole() {
        let mut region = Region::from_rect(Rectangle::new(0, 0, 10, 10));
        region.subtract(Rectangle::new(3, 3, 4, 4));

        assert_eq!(region.area(), 100 - 16);
        assert!(!region.contains_point(5.0, 5.0));
        assert!(region.contains_point(1.0, 1.0));
        assert_eq!(region.extents(), Rectangle::new(0, 0, 10, 10));
    }

    #[test]
    fn test_area_equivalence_regardless_of_grouping() {
        let ops: [(bool, Rectangle); 5] = [
            (true, Rectangle::new(0, 0, 8, 8)),
            (true, Rectangle::new(4, 2, 8, 3)),
            (false, Rectangle::new(2, 2, 3, 3)),
            (true, Rectangle::new(1, 9, 4, 2)),
            (false, Rectangle::new(6, 0, 2, 12)),
        ];

        let mut sequential = Region::new();
        for (add, rect) in ops {
            if add {
                sequential.add(rect);
            } else {
                sequential.subtract(rect);
            }
        }

        // same operations, with the adds merged into a separate region first
        let mut first = Region::new();
        first.add(ops[0].1).add(ops[1].1);
        let mut grouped = Region::new();
        grouped.add_region(&first);
        grouped.subtract(ops[2].1);
        grouped.add(ops[3].1);
        grouped.subtract(ops[4].1);

        assert!(covers_same(&sequential, &grouped, Rectangle::new(-2, -2, 16, 16)));
        assert_eq!(sequential.area(), grouped.area());
    }

    #[test]
    fn test_intersect_and_translate() {
        let mut region = Region::infinite();
        region.intersect(Rectangle::new(0, 0, 20, 10));
        assert_eq!(region.extents(), Rectangle::new(0, 0, 20, 10));

        region.translate(5, -5);
        assert!(region.contains_point(5.0, -5.0));
        assert!(!region.contains_point(4.9, 0.0));
    }

    #[test]
    fn test_intersect_region() {
        let mut a = Region::from_rect(Rectangle::new(0, 0, 10, 10));
        let mut b = Region::from_rect(Rectangle::new(5, 0, 10, 5));
        b.add(Rectangle::new(0, 8, 2, 2));
        a.intersect_region(&b);
        assert_eq!(a.area(), 25 + 4);
    }

    #[test]
    fn test_empty_inputs_are_ignored() {
        let mut region = Region::new();
        region.add(Rectangle::new(3, 3, 0, 5));
        assert!(region.is_empty());
        assert_eq!(region.extents(), Rectangle::default());
    }

    #[test]
    fn test_scale() {
        let mut region = Region::from_rect(Rectangle::new(1, 2, 3, 4));
        region.scale(2);
        assert_eq!(region.rects(), &[Rectangle::new(2, 4, 6, 8)]);
    }
}
