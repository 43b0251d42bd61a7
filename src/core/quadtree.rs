//! Point-Region QuadTree
//!
//! Spatial index over star positions. Points live only in leaves; a node
//! holds either points or four children, never both. A leaf splits when it
//! exceeds [`NODE_CAPACITY`] and collapses back once all four children are
//! empty again.

use super::rect::Rect;
use super::vec2::Vec2;

/// Points a leaf holds before it subdivides.
pub const NODE_CAPACITY: usize = 4;

/// Depth at which leaves stop subdividing (coincident points pile up here).
pub const MAX_DEPTH: u8 = 16;

/// A quadtree keyed by point position.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    root: Node<T>,
    len: usize,
}

#[derive(Debug, Clone)]
struct Node<T> {
    bounds: Rect,
    depth: u8,
    points: Vec<(Vec2, T)>,
    children: Option<Box<[Node<T>; 4]>>,
}

impl<T> Node<T> {
    fn leaf(bounds: Rect, depth: u8) -> Self {
        Self {
            bounds,
            depth,
            points: Vec::new(),
            children: None,
        }
    }

    /// Quadrant index for a point inside this node: NW, NE, SW, SE.
    #[inline]
    fn child_index(&self, p: Vec2) -> usize {
        let c = self.bounds.center();
        let east = (p.x >= c.x) as usize;
        let south = (p.y >= c.y) as usize;
        east + 2 * south
    }

    fn is_empty(&self) -> bool {
        self.points.is_empty() && self.children.is_none()
    }

    fn insert(&mut self, pos: Vec2, item: T) {
        let idx = self.child_index(pos);
        if let Some(children) = self.children.as_mut() {
            children[idx].insert(pos, item);
            return;
        }

        if self.points.len() < NODE_CAPACITY || self.depth >= MAX_DEPTH {
            self.points.push((pos, item));
            return;
        }

        self.subdivide();
        self.insert(pos, item);
    }

    fn subdivide(&mut self) {
        let [nw, ne, sw, se] = self.bounds.quadrants();
        let depth = self.depth + 1;
        let mut children = Box::new([
            Node::leaf(nw, depth),
            Node::leaf(ne, depth),
            Node::leaf(sw, depth),
            Node::leaf(se, depth),
        ]);

        let c = self.bounds.center();
        for (pos, item) in self.points.drain(..) {
            let idx = (pos.x >= c.x) as usize + 2 * (pos.y >= c.y) as usize;
            children[idx].insert(pos, item);
        }

        self.children = Some(children);
    }

    fn remove(&mut self, pos: Vec2, item: &T) -> Option<T>
    where
        T: PartialEq,
    {
        let idx = self.child_index(pos);
        match self.children.as_mut() {
            Some(children) => {
                let removed = children[idx].remove(pos, item);
                if removed.is_some() && children.iter().all(Node::is_empty) {
                    self.children = None;
                }
                removed
            }
            None => {
                let at = self
                    .points
                    .iter()
                    .position(|(p, t)| *p == pos && t == item)?;
                Some(self.points.swap_remove(at).1)
            }
        }
    }

    fn query<'a>(&'a self, range: &Rect, out: &mut Vec<(Vec2, &'a T)>) {
        if !self.bounds.intersects(range) {
            return;
        }
        for (p, t) in &self.points {
            if range.contains(*p) {
                out.push((*p, t));
            }
        }
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(range, out);
            }
        }
    }

    fn count_nodes(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map(|c| c.iter().map(Node::count_nodes).sum())
            .unwrap_or(0)
    }
}

impl<T> QuadTree<T> {
    /// Create an empty tree covering `bounds`.
    pub fn new(bounds: Rect) -> Self {
        Self {
            root: Node::leaf(bounds, 0),
            len: 0,
        }
    }

    /// Region covered by the tree.
    pub fn bounds(&self) -> Rect {
        self.root.bounds
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree holds no points.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nodes (leaves and internal). A fresh or fully drained tree has one.
    pub fn node_count(&self) -> usize {
        self.root.count_nodes()
    }

    /// Insert `item` at `pos`.
    ///
    /// Returns `false` (and drops nothing) when `pos` lies outside the tree bounds.
    pub fn insert(&mut self, pos: Vec2, item: T) -> bool {
        if !self.root.bounds.contains(pos) {
            return false;
        }
        self.root.insert(pos, item);
        self.len += 1;
        true
    }

    /// Remove `item` previously inserted at `pos`.
    pub fn remove(&mut self, pos: Vec2, item: &T) -> Option<T>
    where
        T: PartialEq,
    {
        if !self.root.bounds.contains(pos) {
            return None;
        }
        let removed = self.root.remove(pos, item);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// All points inside `range` (closed), with their positions.
    pub fn query_range(&self, range: &Rect) -> Vec<(Vec2, &T)> {
        let mut out = Vec::new();
        self.root.query(range, &mut out);
        out
    }

    /// Closest item to `pos` by Manhattan distance, searching a square box
    /// of half-width `max_radius`.
    pub fn nearest(&self, pos: Vec2, max_radius: f32) -> Option<&T> {
        self.nearest_where(pos, max_radius, |_| true)
    }

    /// Like [`QuadTree::nearest`] but only considers items accepted by `filter`.
    pub fn nearest_where<F>(&self, pos: Vec2, max_radius: f32, mut filter: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.query_range(&Rect::around(pos, max_radius))
            .into_iter()
            .filter(|(_, t)| filter(t))
            .map(|(p, t)| (p.manhattan(pos), t))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, t)| t)
    }

    /// Iterate all stored points in unspecified order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![&self.root],
            current: [].iter(),
        }
    }
}

/// Depth-first iterator over a [`QuadTree`].
pub struct Iter<'a, T> {
    stack: Vec<&'a Node<T>>,
    current: std::slice::Iter<'a, (Vec2, T)>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Vec2, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((p, t)) = self.current.next() {
                return Some((*p, t));
            }
            let node = self.stack.pop()?;
            self.current = node.points.iter();
            if let Some(children) = &node.children {
                self.stack.extend(children.iter());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn world() -> Rect {
        Rect::new(-5.0, -5.0, 5.0, 5.0)
    }

    #[test]
    fn test_insert_outside_bounds_rejected() {
        let mut tree = QuadTree::new(world());
        assert!(!tree.insert(Vec2::new(6.0, 0.0), 1));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_subdivides_past_capacity() {
        let mut tree = QuadTree::new(world());
        for i in 0..NODE_CAPACITY {
            tree.insert(Vec2::new(i as f32 * 0.5, 0.5), i);
        }
        assert_eq!(tree.node_count(), 1);

        tree.insert(Vec2::new(-3.0, -3.0), 99);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.len(), NODE_CAPACITY + 1);
    }

    #[test]
    fn test_remove_collapses_children() {
        let mut tree = QuadTree::new(world());
        let pts: Vec<_> = (0..10)
            .map(|i| Vec2::new(-4.0 + i as f32 * 0.8, 4.0 - i as f32 * 0.7))
            .collect();
        for (i, p) in pts.iter().enumerate() {
            assert!(tree.insert(*p, i));
        }
        assert!(tree.node_count() > 1);

        for (i, p) in pts.iter().enumerate() {
            assert_eq!(tree.remove(*p, &i), Some(i));
        }
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_remove_requires_matching_item() {
        let mut tree = QuadTree::new(world());
        tree.insert(Vec2::new(1.0, 1.0), 7);
        assert_eq!(tree.remove(Vec2::new(1.0, 1.0), &8), None);
        assert_eq!(tree.remove(Vec2::new(1.5, 1.0), &7), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_range_query_prunes() {
        let mut tree = QuadTree::new(world());
        for i in 0..20 {
            tree.insert(Vec2::new(-4.5 + i as f32 * 0.45, 0.0), i);
        }
        let hits = tree.query_range(&Rect::new(-0.1, -0.1, 1.0, 0.1));
        let mut ids: Vec<i32> = hits.into_iter().map(|(_, t)| *t).collect();
        ids.sort();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_nearest_uses_manhattan_within_box() {
        let mut tree = QuadTree::new(world());
        tree.insert(Vec2::new(0.2, 0.2), "diag");
        tree.insert(Vec2::new(0.3, 0.0), "axis");
        tree.insert(Vec2::new(3.0, 3.0), "far");

        assert_eq!(tree.nearest(Vec2::ZERO, 0.5), Some(&"axis"));
        assert_eq!(tree.nearest(Vec2::new(-4.0, -4.0), 0.5), None);
        assert_eq!(
            tree.nearest_where(Vec2::ZERO, 0.5, |t| *t != "axis"),
            Some(&"diag")
        );
    }

    #[test]
    fn test_coincident_points_stop_at_max_depth() {
        let mut tree = QuadTree::new(world());
        for i in 0..(NODE_CAPACITY * 3) {
            tree.insert(Vec2::new(1.0, 1.0), i);
        }
        assert_eq!(tree.len(), NODE_CAPACITY * 3);
        assert_eq!(tree.query_range(&Rect::around(Vec2::new(1.0, 1.0), 0.01)).len(), NODE_CAPACITY * 3);
    }

    #[test]
    fn test_iter_visits_everything() {
        let mut tree = QuadTree::new(world());
        for i in 0..50 {
            let f = i as f32;
            tree.insert(Vec2::new((f * 0.37) % 9.0 - 4.5, (f * 0.71) % 9.0 - 4.5), i);
        }
        let mut seen: Vec<i32> = tree.iter().map(|(_, t)| *t).collect();
        seen.sort();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn prop_insert_remove_keeps_size_and_findability(
            pts in prop::collection::vec((-4.9f32..4.9, -4.9f32..4.9), 1..120),
            remove_ratio in 0.0f64..1.0,
        ) {
            let mut tree = QuadTree::new(world());
            for (i, (x, y)) in pts.iter().enumerate() {
                prop_assert!(tree.insert(Vec2::new(*x, *y), i));
            }

            let removals = ((pts.len() as f64) * remove_ratio) as usize;
            for (i, (x, y)) in pts.iter().enumerate().take(removals) {
                prop_assert_eq!(tree.remove(Vec2::new(*x, *y), &i), Some(i));
            }

            prop_assert_eq!(tree.len(), pts.len() - removals);

            for (i, (x, y)) in pts.iter().enumerate().skip(removals) {
                let p = Vec2::new(*x, *y);
                let found = tree
                    .query_range(&Rect::around(p, 0.001))
                    .into_iter()
                    .any(|(_, t)| *t == i);
                prop_assert!(found);
            }
        }
    }
}
