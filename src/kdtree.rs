//! Static, array-backed kd-tree over item ECEF coordinates.
//!
//! The tree is built once by the factory with median splits on cycling
//! x/y/z axes and serialized as a flat node array whose child references are
//! absolute byte offsets. Queries walk the mapped node array directly.
//!
//! Nearest, k-nearest and range requests share one traversal
//! ([`KdTreeRef::search`]) and differ only in the [`NeighborCollector`] that
//! accumulates results.
//! Collectors are created per call, so concurrent queries never share state.

use crate::datum::{Ecef, corrected_distance};
use crate::error::{GisError, Result};
use crate::format::{EMPTY, NODE_SIZE, read_f64, read_offset, to_i32};
use crate::item::ECEF_OFFSET;
use bytes::{BufMut, BytesMut};
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Build-time node; `item` and the children are indices, not byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdNode {
    pub item: usize,
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// Build a balanced tree over `points`. Node 0 is the root; nodes are laid
/// out in pre-order.
pub fn build(points: &[Ecef]) -> Vec<KdNode> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    let mut nodes = Vec::with_capacity(points.len());
    build_range(points, &mut order, 0, &mut nodes);
    nodes
}

fn build_range(
    points: &[Ecef],
    range: &mut [usize],
    depth: usize,
    nodes: &mut Vec<KdNode>,
) -> Option<usize> {
    if range.is_empty() {
        return None;
    }

    let axis = depth % 3;
    let mid = range.len() / 2;
    // ties on the split coordinate are ordered by item index so the layout
    // is fully determined by the input order
    range.select_nth_unstable_by(mid, |&a, &b| {
        points[a]
            .axis(axis)
            .total_cmp(&points[b].axis(axis))
            .then(a.cmp(&b))
    });

    let node_idx = nodes.len();
    nodes.push(KdNode {
        item: range[mid],
        left: None,
        right: None,
    });

    let (lower, upper) = range.split_at_mut(mid);
    let left = build_range(points, lower, depth + 1, nodes);
    let right = build_range(points, &mut upper[1..], depth + 1, nodes);
    nodes[node_idx].left = left;
    nodes[node_idx].right = right;

    Some(node_idx)
}

/// Depth of a built tree (0 for an empty tree).
pub fn depth(nodes: &[KdNode]) -> usize {
    fn walk(nodes: &[KdNode], idx: Option<usize>) -> usize {
        match idx {
            None => 0,
            Some(i) => 1 + walk(nodes, nodes[i].left).max(walk(nodes, nodes[i].right)),
        }
    }
    if nodes.is_empty() { 0 } else { walk(nodes, Some(0)) }
}

/// Serialize nodes as `{ itemOffset leftOffset rightOffset }*`, translating
/// indices into absolute byte offsets.
pub fn write_nodes(
    buf: &mut BytesMut,
    nodes: &[KdNode],
    node_base: usize,
    items_base: usize,
    item_size: usize,
) -> Result<()> {
    let child = |c: Option<usize>| -> Result<i32> {
        match c {
            Some(i) => to_i32(node_base + i * NODE_SIZE, "node offset"),
            None => Ok(EMPTY),
        }
    };
    for node in nodes {
        buf.put_i32(to_i32(items_base + node.item * item_size, "item offset")?);
        buf.put_i32(child(node.left)?);
        buf.put_i32(child(node.right)?);
    }
    Ok(())
}

/// Distance function shared by node evaluation and pruning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub long_range_threshold: f64,
}

impl Metric {
    pub fn new(long_range_threshold: f64) -> Self {
        Self {
            long_range_threshold,
        }
    }

    /// Meters between two ECEF points; straight line for short separations,
    /// great-circle arc above the long range threshold.
    #[inline]
    pub fn distance(&self, a: &Ecef, b: &Ecef) -> f64 {
        corrected_distance(a.distance(b), self.long_range_threshold)
    }
}

/// Result accumulator for one query.
pub trait NeighborCollector {
    /// Whether an item at `dist` could still change the result.
    fn can_contain(&self, dist: f64) -> bool;

    /// Offer a candidate item.
    fn update(&mut self, dist: f64, item_off: usize);

    /// Current distance bound of the result.
    fn distance(&self) -> f64;

    fn metric(&self) -> Metric;

    #[inline]
    fn compute_dist(&self, pivot: &Ecef, target: &Ecef) -> f64 {
        self.metric().distance(pivot, target)
    }
}

/// Order by distance, then by item offset.
#[inline]
fn cmp_entry(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

#[derive(Debug, Clone)]
pub struct NearestNeighbor {
    metric: Metric,
    best: Option<(f64, usize)>,
}

impl NearestNeighbor {
    pub fn new(metric: Metric) -> Self {
        Self { metric, best: None }
    }

    pub fn result(&self) -> Option<(f64, usize)> {
        self.best
    }
}

impl NeighborCollector for NearestNeighbor {
    fn can_contain(&self, dist: f64) -> bool {
        self.best.is_none_or(|(best, _)| dist <= best)
    }

    fn update(&mut self, dist: f64, item_off: usize) {
        let candidate = (dist, item_off);
        if self
            .best
            .is_none_or(|best| cmp_entry(&candidate, &best) == Ordering::Less)
        {
            self.best = Some(candidate);
        }
    }

    fn distance(&self) -> f64 {
        self.best.map_or(f64::INFINITY, |(d, _)| d)
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

/// Bounded, distance-sorted list of the `k` closest items.
#[derive(Debug, Clone)]
pub struct KNearestNeighbors {
    metric: Metric,
    k: usize,
    entries: SmallVec<[(f64, usize); 16]>,
}

impl KNearestNeighbors {
    pub fn new(metric: Metric, k: usize) -> Self {
        Self {
            metric,
            k,
            entries: SmallVec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.k
    }

    pub fn into_results(self) -> Vec<(f64, usize)> {
        self.entries.into_vec()
    }
}

impl NeighborCollector for KNearestNeighbors {
    fn can_contain(&self, dist: f64) -> bool {
        if self.k == 0 {
            return false;
        }
        !self.is_full() || self.entries.last().is_some_and(|&(d, _)| dist <= d)
    }

    fn update(&mut self, dist: f64, item_off: usize) {
        if self.k == 0 {
            return;
        }
        let candidate = (dist, item_off);
        let pos = self
            .entries
            .iter()
            .position(|e| cmp_entry(&candidate, e) == Ordering::Less)
            .unwrap_or(self.entries.len());
        if pos >= self.k {
            return;
        }
        self.entries.insert(pos, candidate);
        self.entries.truncate(self.k);
    }

    fn distance(&self) -> f64 {
        if self.is_full() {
            self.entries.last().map_or(f64::INFINITY, |&(d, _)| d)
        } else {
            f64::INFINITY
        }
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

/// All items within a fixed distance; sorted once when the query completes.
#[derive(Debug, Clone)]
pub struct RangeNeighbors {
    metric: Metric,
    radius: f64,
    entries: Vec<(f64, usize)>,
}

impl RangeNeighbors {
    pub fn new(metric: Metric, radius: f64) -> Self {
        Self {
            metric,
            radius,
            entries: Vec::new(),
        }
    }

    pub fn into_results(mut self) -> Vec<(f64, usize)> {
        self.entries.sort_by(cmp_entry);
        self.entries
    }
}

impl NeighborCollector for RangeNeighbors {
    fn can_contain(&self, dist: f64) -> bool {
        dist <= self.radius
    }

    fn update(&mut self, dist: f64, item_off: usize) {
        if dist <= self.radius {
            self.entries.push((dist, item_off));
        }
    }

    fn distance(&self) -> f64 {
        self.radius
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

/// Axis-aligned box of the region a subtree can occupy.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: [f64; 3],
    max: [f64; 3],
}

impl Bounds {
    const UNBOUNDED: Bounds = Bounds {
        min: [f64::NEG_INFINITY; 3],
        max: [f64::INFINITY; 3],
    };

    fn with_min(mut self, axis: usize, v: f64) -> Self {
        self.min[axis] = v;
        self
    }

    fn with_max(mut self, axis: usize, v: f64) -> Self {
        self.max[axis] = v;
        self
    }

    /// Closest point of the box to `target`.
    fn clamp(&self, target: &Ecef) -> Ecef {
        let mut p = *target;
        for axis in 0..3 {
            p.set_axis(axis, target.axis(axis).clamp(self.min[axis], self.max[axis]));
        }
        p
    }
}

/// Tree stored in a mapped buffer.
#[derive(Debug, Clone, Copy)]
pub struct KdTreeRef<'a> {
    buf: &'a [u8],
    root: Option<usize>,
    n_nodes: usize,
    max_depth: usize,
}

impl<'a> KdTreeRef<'a> {
    pub fn new(buf: &'a [u8], root: Option<usize>, n_nodes: usize) -> Self {
        Self {
            buf,
            root,
            n_nodes,
            max_depth: max_search_depth(n_nodes),
        }
    }

    /// Run one query from `target`, feeding every visited item to
    /// `collector`. Subtrees whose bounding box cannot hold a closer item
    /// are skipped.
    pub fn search<C: NeighborCollector>(&self, target: &Ecef, collector: &mut C) -> Result<()> {
        match self.root {
            Some(root) => self.search_node(root, 0, target, Bounds::UNBOUNDED, collector),
            None => Ok(()),
        }
    }

    /// Number of levels of the stored tree.
    pub fn depth(&self) -> Result<usize> {
        let mut max_depth = 0;
        let mut visited = 0;
        let mut stack: Vec<(usize, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((node_off, depth)) = stack.pop() {
            visited += 1;
            if visited > self.n_nodes {
                return Err(GisError::corrupted("kd-tree reaches more nodes than it holds"));
            }
            max_depth = max_depth.max(depth);
            for child_off in [node_off + 4, node_off + 8] {
                if let Some(child) = read_offset(self.buf, child_off)? {
                    stack.push((child, depth + 1));
                }
            }
        }
        Ok(max_depth)
    }

    fn search_node<C: NeighborCollector>(
        &self,
        node_off: usize,
        depth: usize,
        target: &Ecef,
        bounds: Bounds,
        collector: &mut C,
    ) -> Result<()> {
        if depth >= self.max_depth {
            return Err(GisError::corrupted(format!(
                "kd-tree of {} nodes deeper than {} levels",
                self.n_nodes, self.max_depth
            )));
        }

        let item_off = read_offset(self.buf, node_off)?
            .ok_or_else(|| GisError::corrupted(format!("kd node {} has no item", node_off)))?;
        let left = read_offset(self.buf, node_off + 4)?;
        let right = read_offset(self.buf, node_off + 8)?;
        let pivot = read_ecef(self.buf, item_off)?;
        if !(pivot.x.is_finite() && pivot.y.is_finite() && pivot.z.is_finite()) {
            return Err(GisError::corrupted(format!(
                "item {} has non-finite ECEF coordinates",
                item_off
            )));
        }

        let dist = collector.compute_dist(&pivot, target);
        collector.update(dist, item_off);

        let axis = depth % 3;
        let split = pivot.axis(axis);
        let below = bounds.with_max(axis, split);
        let above = bounds.with_min(axis, split);

        let (near, near_bounds, far, far_bounds) = if target.axis(axis) < split {
            (left, below, right, above)
        } else {
            (right, above, left, below)
        };

        if let Some(near) = near {
            self.search_node(near, depth + 1, target, near_bounds, collector)?;
        }
        if let Some(far) = far
            && !prune(target, &far_bounds, collector)
        {
            self.search_node(far, depth + 1, target, far_bounds, collector)?;
        }
        Ok(())
    }
}

/// Median splits keep a tree of `n` nodes within `ceil(log2(n + 1))`
/// levels; anything deeper than twice that is not a tree the factory wrote.
fn max_search_depth(n_nodes: usize) -> usize {
    2 * (usize::BITS - n_nodes.leading_zeros()) as usize
}

/// True if no point inside `bounds` can be accepted by `collector`.
#[inline]
fn prune<C: NeighborCollector>(target: &Ecef, bounds: &Bounds, collector: &C) -> bool {
    let closest = bounds.clamp(target);
    !collector.can_contain(collector.compute_dist(&closest, target))
}

/// ECEF coordinates of the item record at `item_off`.
#[inline]
pub fn read_ecef(buf: &[u8], item_off: usize) -> Result<Ecef> {
    let off = item_off + ECEF_OFFSET;
    Ok(Ecef::new(
        read_f64(buf, off)?,
        read_f64(buf, off + 8)?,
        read_f64(buf, off + 16)?,
    ))
}
