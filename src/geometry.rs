//! Integer geometry used by surfaces, regions and the composition tree.

use std::ops::{Add, Sub};

/// A point in some surface-relative or output coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Width/height pair (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Relative offset between two coordinate spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Displacement {
    pub dx: i32,
    pub dy: i32,
}

impl Displacement {
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

impl Add for Displacement {
    type Output = Displacement;

    fn add(self, rhs: Displacement) -> Displacement {
        Displacement::new(self.dx + rhs.dx, self.dy + rhs.dy)
    }
}

impl Add<Displacement> for Point {
    type Output = Point;

    fn add(self, rhs: Displacement) -> Point {
        Point::new(self.x + rhs.dx, self.y + rhs.dy)
    }
}

impl Sub<Displacement> for Point {
    type Output = Point;

    fn sub(self, rhs: Displacement) -> Point {
        Point::new(self.x - rhs.dx, self.y - rhs.dy)
    }
}

/// Axis-aligned rectangle, top-left inclusive, bottom-right exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    pub top_left: Point,
    pub size: Size,
}

impl Rectangle {
    pub const fn new(top_left: Point, size: Size) -> Self {
        Self { top_left, size }
    }

    /// Builds a rectangle from `x, y, width, height` as they arrive on the wire
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            top_left: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn right(&self) -> i32 {
        self.top_left.x + self.size.width
    }

    pub fn bottom(&self) -> i32 {
        self.top_left.y + self.size.height
    }

    pub fn contains(&self, point: Point) -> bool {
        !self.size.is_empty()
            && point.x >= self.top_left.x
            && point.y >= self.top_left.y
            && point.x < self.right()
            && point.y < self.bottom()
    }

    /// Overlap of two rectangles; disjoint rectangles yield a zero-size rectangle
    pub fn intersection_with(&self, other: &Rectangle) -> Rectangle {
        let left = self.top_left.x.max(other.top_left.x);
        let top = self.top_left.y.max(other.top_left.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= left || bottom <= top {
            return Rectangle::default();
        }
        Rectangle::from_xywh(left, top, right - left, bottom - top)
    }

    pub fn translated(&self, by: Displacement) -> Rectangle {
        Rectangle::new(self.top_left + by, self.size)
    }
}
