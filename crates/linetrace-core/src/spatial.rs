//! Nearest-point lookup on reference lines
//!
//! Every line the runtime measures against (global racing line, per-car lines, the
//! canonical line) is queried through [`ReferenceLine`]: nearest sample to a
//! position and the unit tangent at a sample.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// Point stored in the R-tree with its index on the line
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedPoint {
    idx: usize,
    pos: [f64; 2],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        dx * dx + dy * dy
    }
}

/// An ordered polyline with nearest-sample lookup
pub trait ReferenceLine {
    /// Number of samples
    fn len(&self) -> usize;

    /// Sample position
    fn point(&self, idx: usize) -> [f64; 2];

    /// Distance to and index of the sample nearest to `p`
    fn nearest(&self, p: [f64; 2]) -> Option<(f64, usize)>;

    /// True when the line has no samples
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unit tangent at a sample: toward the next sample, or from the previous one at
    /// the end of the line. Zero when the neighbours coincide.
    fn tangent_at(&self, idx: usize) -> [f64; 2] {
        let n = self.len();
        if n < 2 || idx >= n {
            return [0.0, 0.0];
        }
        let (a, b) = if idx + 1 < n {
            (self.point(idx), self.point(idx + 1))
        } else {
            (self.point(idx - 1), self.point(idx))
        };
        let (tx, ty) = (b[0] - a[0], b[1] - a[1]);
        let norm = tx.hypot(ty);
        if norm > 0.0 {
            [tx / norm, ty / norm]
        } else {
            [0.0, 0.0]
        }
    }
}

/// Result of a signed deviation query
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Deviation {
    /// Signed lateral offset along the left normal `(-ty, tx)`
    pub deviation: f64,
    /// Index of the nearest line sample
    pub nearest_idx: usize,
    /// Position of the nearest line sample
    pub nearest: [f64; 2],
}

/// Signed offset of `p` from `line` measured along the normal at the nearest sample
pub fn signed_deviation(line: &dyn ReferenceLine, p: [f64; 2]) -> Option<Deviation> {
    let (_, idx) = line.nearest(p)?;
    let nearest = line.point(idx);
    let [tx, ty] = line.tangent_at(idx);
    let normal = [-ty, tx];
    let deviation = (p[0] - nearest[0]) * normal[0] + (p[1] - nearest[1]) * normal[1];
    Some(Deviation {
        deviation,
        nearest_idx: idx,
        nearest,
    })
}

/// Polyline with an R-tree over its samples, built once
#[derive(Clone)]
pub struct IndexedLine {
    points: Vec<[f64; 2]>,
    tree: RTree<IndexedPoint>,
}

impl IndexedLine {
    /// Build the index over the given samples
    pub fn new(points: Vec<[f64; 2]>) -> Self {
        let indexed = points
            .iter()
            .enumerate()
            .map(|(idx, &pos)| IndexedPoint { idx, pos })
            .collect();
        Self {
            tree: RTree::bulk_load(indexed),
            points,
        }
    }

    /// Build from parallel coordinate columns
    pub fn from_xy(xs: &[f64], ys: &[f64]) -> Self {
        Self::new(xs.iter().zip(ys).map(|(&x, &y)| [x, y]).collect())
    }

    /// Line samples
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }
}

impl std::fmt::Debug for IndexedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedLine")
            .field("points", &self.points.len())
            .finish()
    }
}

impl ReferenceLine for IndexedLine {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn point(&self, idx: usize) -> [f64; 2] {
        self.points[idx]
    }

    fn nearest(&self, p: [f64; 2]) -> Option<(f64, usize)> {
        self.tree
            .nearest_neighbor(&p)
            .map(|hit| (hit.distance_2(&p).sqrt(), hit.idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> IndexedLine {
        IndexedLine::new(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]])
    }

    #[test]
    fn test_nearest() {
        let line = square();
        let (d, idx) = line.nearest([9.0, 1.0]).unwrap();
        assert_eq!(idx, 1);
        assert!((d - 2f64.sqrt()).abs() < 1e-12);
        assert!(IndexedLine::new(Vec::new()).nearest([0.0, 0.0]).is_none());
    }

    #[test]
    fn test_tangent_uses_previous_at_end() {
        let line = square();
        assert_eq!(line.tangent_at(0), [1.0, 0.0]);
        assert_eq!(line.tangent_at(3), [-1.0, 0.0]);
        assert_eq!(line.tangent_at(9), [0.0, 0.0]);
    }

    #[test]
    fn test_signed_deviation_sign() {
        let line = IndexedLine::from_xy(&[0.0, 1.0, 2.0, 3.0], &[0.0; 4]);
        // heading +x, left normal is +y
        let left = signed_deviation(&line, [1.0, 0.5]).unwrap();
        assert!((left.deviation - 0.5).abs() < 1e-12);
        assert_eq!(left.nearest_idx, 1);
        let right = signed_deviation(&line, [2.0, -0.25]).unwrap();
        assert!((right.deviation + 0.25).abs() < 1e-12);
        let on_line = signed_deviation(&line, [3.0, 0.0]).unwrap();
        assert_eq!(on_line.deviation, 0.0);
    }
}
