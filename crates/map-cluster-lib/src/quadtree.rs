//! Point quadtree for inclusive rectangular range queries
//!
//! The tree covers fixed bounds chosen at construction time. Leaves hold up to
//! [`MAX_ELEMENTS`] points and split into four quadrants when they overflow,
//! until [`MAX_DEPTH`] is reached, where leaves simply keep growing so that
//! duplicate points cannot recurse forever.

use crate::projection::{contains_point, intersects};
use crate::{ClusterError, Result};
use geo::{Coord, Point, Rect};

/// Maximum number of points a leaf holds before it splits
pub const MAX_ELEMENTS: usize = 50;

/// Maximum depth of the quadtree to prevent infinite recursion
pub const MAX_DEPTH: u32 = 40;

/// A point and the item stored at it
#[derive(Debug, Clone)]
struct Entry<T> {
    point: Point<f64>,
    item: T,
}

/// Spatial index over planar points
#[derive(Debug, Clone)]
pub struct PointQuadTree<T> {
    root: QuadtreeNode<T>,
    len: usize,
}

/// A single node; either a leaf with entries or a parent with four children
#[derive(Debug, Clone)]
struct QuadtreeNode<T> {
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    entries: Vec<Entry<T>>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode<T>; 4]>>,
}

impl<T> PointQuadTree<T> {
    /// Create an empty tree covering `bounding_box`
    pub fn new(bounding_box: Rect<f64>) -> Self {
        Self {
            root: QuadtreeNode::new(bounding_box, 0),
            len: 0,
        }
    }

    #[inline]
    pub fn bounds(&self) -> Rect<f64> {
        self.root.bounding_box
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `item` at `point`
    ///
    /// Fails for non-finite coordinates and for points outside the root bounds.
    pub fn insert(&mut self, item: T, point: Point<f64>) -> Result<()> {
        if !point.x().is_finite() || !point.y().is_finite() {
            return Err(ClusterError::InvalidCoordinate {
                x: point.x(),
                y: point.y(),
            });
        }
        if !contains_point(&self.root.bounding_box, point.x(), point.y()) {
            return Err(ClusterError::OutOfBounds {
                x: point.x(),
                y: point.y(),
            });
        }
        self.root.insert(Entry { point, item });
        self.len += 1;
        Ok(())
    }

    /// Drop every item, keeping the root bounds
    pub fn clear(&mut self) {
        self.root = QuadtreeNode::new(self.root.bounding_box, 0);
        self.len = 0;
    }

    /// Collect all items whose point lies inside `range` (inclusive)
    pub fn search(&self, range: Rect<f64>) -> Vec<&T> {
        let mut results = Vec::new();
        self.search_into(range, &mut results);
        results
    }

    /// Like [`search`](Self::search) but appends into an existing buffer
    pub fn search_into<'a>(&'a self, range: Rect<f64>, results: &mut Vec<&'a T>) {
        self.root.query_items(range, results);
    }

    /// Visit every item with its point, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (Point<f64>, &T)> {
        let mut stack = vec![&self.root];
        let mut current: std::slice::Iter<'_, Entry<T>> = Default::default();
        std::iter::from_fn(move || {
            loop {
                if let Some(entry) = current.next() {
                    return Some((entry.point, &entry.item));
                }
                let node = stack.pop()?;
                if let Some(children) = &node.children {
                    stack.extend(children.iter());
                }
                current = node.entries.iter();
            }
        })
    }
}

impl<T: PartialEq> PointQuadTree<T> {
    /// Remove one occurrence of `item` stored at `point`
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, item: &T, point: Point<f64>) -> bool {
        if !contains_point(&self.root.bounding_box, point.x(), point.y()) {
            return false;
        }
        let removed = self.root.remove(item, point);
        if removed {
            self.len -= 1;
        }
        removed
    }
}

impl<T> QuadtreeNode<T> {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    fn mid(&self) -> (f64, f64) {
        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        ((min.x + max.x) / 2.0, (min.y + max.y) / 2.0)
    }

    /// Index of the child quadrant that owns `point`
    ///
    /// Points on the dividing lines go east and south, so each point belongs to
    /// exactly one child.
    fn child_index(&self, point: Point<f64>) -> usize {
        let (mid_x, mid_y) = self.mid();
        let is_east = point.x() >= mid_x;
        let is_south = point.y() >= mid_y;
        match (is_east, is_south) {
            (false, false) => 0, // NW
            (true, false) => 1,  // NE
            (false, true) => 2,  // SW
            (true, true) => 3,   // SE
        }
    }

    /// Subdivide this node into 4 children and push the entries down
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let (mid_x, mid_y) = self.mid();
        let child_level = self.level + 1;

        // y grows southwards, so the northern half is the low-y half
        let nw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            child_level,
        );
        let ne = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            child_level,
        );
        let sw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            child_level,
        );
        let se = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            child_level,
        );

        let mut children = Box::new([nw, ne, sw, se]);
        for entry in std::mem::take(&mut self.entries) {
            let index = self.child_index(entry.point);
            children[index].insert(entry);
        }
        self.children = Some(children);
    }

    fn insert(&mut self, entry: Entry<T>) {
        if self.children.is_some() {
            let index = self.child_index(entry.point);
            if let Some(children) = &mut self.children {
                children[index].insert(entry);
            }
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > MAX_ELEMENTS && self.level < MAX_DEPTH {
            self.subdivide();
        }
    }

    /// Query this node and its children for items inside `range`
    fn query_items<'a>(&'a self, range: Rect<f64>, results: &mut Vec<&'a T>) {
        if !intersects(&self.bounding_box, &range) {
            return;
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_items(range, results);
            }
            return;
        }

        for entry in &self.entries {
            if contains_point(&range, entry.point.x(), entry.point.y()) {
                results.push(&entry.item);
            }
        }
    }
}

impl<T: PartialEq> QuadtreeNode<T> {
    fn remove(&mut self, item: &T, point: Point<f64>) -> bool {
        if self.children.is_some() {
            let index = self.child_index(point);
            return match &mut self.children {
                Some(children) => children[index].remove(item, point),
                None => false,
            };
        }

        match self
            .entries
            .iter()
            .position(|e| e.point == point && e.item == *item)
        {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }
}
