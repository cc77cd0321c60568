//! Rank-polymorphic shapes with placeholder extents.
//!
//! A shape is an ordered list of extents; an extent is either a positive
//! value or a placeholder. Placeholders contribute neither to the size nor
//! to linearization (their stride is zero), which is how broadcast axes are
//! expressed: two shapes combine whenever, per dimension, the extents agree
//! or at least one side is a placeholder. A rank-0 shape is the neutral
//! element and promotes to anything.

use serde::{Deserialize, Serialize};

/// Deepest shape the index machinery supports; kernels carry indices in
/// fixed-size arrays to stay allocation-free.
pub const MAX_RANK: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Extent {
    /// A real dimension of the given positive size.
    Fixed(usize),
    /// A broadcast/absent dimension.
    Placeholder,
}

#[derive(Clone, PartialEq, Eq, Debug, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    extents: Vec<Extent>,
}

/// Multi-dimensional index matching a shape's rank. Coordinates at
/// placeholder dimensions are ignored by linearization.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MultiIndex {
    coords: [usize; MAX_RANK],
    rank: usize,
}

impl MultiIndex {
    pub fn scalar() -> Self {
        Self { coords: [0; MAX_RANK], rank: 0 }
    }

    pub fn from_slice(coords: &[usize]) -> Self {
        assert!(coords.len() <= MAX_RANK);
        let mut out = Self::scalar();
        out.coords[..coords.len()].copy_from_slice(coords);
        out.rank = coords.len();
        out
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn get(&self, dim: usize) -> usize {
        assert!(dim < self.rank);
        self.coords[dim]
    }

    pub fn set(&mut self, dim: usize, value: usize) {
        assert!(dim < self.rank);
        self.coords[dim] = value;
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.coords[..self.rank]
    }
}

impl Shape {
    /// The rank-0 shape (one element).
    pub fn scalar() -> Self {
        Self { extents: Vec::new() }
    }

    pub fn new(dims: &[usize]) -> Self {
        assert!(dims.len() <= MAX_RANK);
        Self {
            extents: dims
                .iter()
                .map(|&d| {
                    assert!(d > 0, "extents must be positive");
                    Extent::Fixed(d)
                })
                .collect(),
        }
    }

    pub fn from_extents(extents: Vec<Extent>) -> Self {
        assert!(extents.len() <= MAX_RANK);
        Self { extents }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn extent(&self, dim: usize) -> Extent {
        self.extents[dim]
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn has_placeholder(&self) -> bool {
        self.extents.iter().any(|e| matches!(e, Extent::Placeholder))
    }

    /// Product of all non-placeholder extents.
    pub fn size(&self) -> usize {
        self.extents
            .iter()
            .map(|e| match e {
                Extent::Fixed(n) => *n,
                Extent::Placeholder => 1,
            })
            .product()
    }

    /// Linear offset of `index`, row-major, skipping placeholder dimensions.
    pub fn to_linear(&self, index: &MultiIndex) -> usize {
        assert_eq!(index.rank(), self.rank(), "index rank must match shape rank");
        let mut linear = 0;
        for (d, e) in self.extents.iter().enumerate() {
            if let Extent::Fixed(n) = e {
                let i = index.get(d);
                debug_assert!(i < *n, "index out of range");
                linear = linear * n + i;
            }
        }
        linear
    }

    /// Inverse of [`Shape::to_linear`]; placeholder coordinates come out 0.
    pub fn from_linear(&self, mut linear: usize) -> MultiIndex {
        let mut index = MultiIndex { coords: [0; MAX_RANK], rank: self.rank() };
        for (d, e) in self.extents.iter().enumerate().rev() {
            if let Extent::Fixed(n) = e {
                index.coords[d] = linear % n;
                linear /= n;
            }
        }
        debug_assert_eq!(linear, 0, "linear index out of range");
        index
    }

    /// Insert a placeholder at `dim` (negative counts from the end, with -1
    /// appending).
    pub fn unsqueeze(&self, dim: isize) -> Self {
        let pos = resolve_dim(dim, self.rank() + 1);
        let mut extents = self.extents.clone();
        extents.insert(pos, Extent::Placeholder);
        Self::from_extents(extents)
    }

    /// Remove the dimension at `dim`. Unless `force` is set, it must be a
    /// placeholder.
    pub fn squeeze(&self, dim: isize, force: bool) -> Self {
        let pos = resolve_dim(dim, self.rank());
        assert!(pos < self.rank());
        if !force {
            assert!(
                matches!(self.extents[pos], Extent::Placeholder),
                "squeezing a real dimension requires force"
            );
        }
        let mut extents = self.extents.clone();
        extents.remove(pos);
        Self { extents }
    }

    /// Append the lane axis of a vector-like element type; scalars pass
    /// through unchanged (`lanes == 1` means scalar here).
    pub fn with_lanes(&self, lanes: usize) -> Self {
        if lanes == 1 {
            return self.clone();
        }
        let mut extents = self.extents.clone();
        extents.push(Extent::Fixed(lanes));
        Self::from_extents(extents)
    }
}

pub(crate) fn resolve_dim(dim: isize, rank_plus: usize) -> usize {
    if dim < 0 {
        let back = (-dim) as usize;
        assert!(back <= rank_plus, "dimension out of range");
        rank_plus - back
    } else {
        let pos = dim as usize;
        assert!(pos < rank_plus || (pos == 0 && rank_plus == 0), "dimension out of range");
        pos
    }
}

/// The common shape of two operands, when one exists: equal ranks with
/// per-dimension agreement (placeholders defer), or a rank-0 side promoting
/// to the other.
pub fn common_shape(left: &Shape, right: &Shape) -> Option<Shape> {
    if left.rank() == 0 {
        return Some(right.clone());
    }
    if right.rank() == 0 {
        return Some(left.clone());
    }
    if left.rank() != right.rank() {
        return None;
    }
    let mut extents = Vec::with_capacity(left.rank());
    for (l, r) in left.extents.iter().zip(&right.extents) {
        let e = match (l, r) {
            (Extent::Placeholder, e) | (e, Extent::Placeholder) => *e,
            (Extent::Fixed(a), Extent::Fixed(b)) if a == b => Extent::Fixed(*a),
            _ => return None,
        };
        extents.push(e);
    }
    Some(Shape::from_extents(extents))
}

/// Project an index in a common shape onto an operand's shape: coordinates
/// over the operand's placeholder (broadcast) dimensions are zeroed, and a
/// rank-0 operand collapses everything.
pub fn project(index: &MultiIndex, operand: &Shape) -> MultiIndex {
    if operand.rank() == 0 {
        return MultiIndex::scalar();
    }
    assert_eq!(index.rank(), operand.rank());
    let mut out = *index;
    for (d, e) in operand.extents.iter().enumerate() {
        if matches!(e, Extent::Placeholder) {
            out.coords[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_skips_placeholders() {
        let s = Shape::new(&[3, 4]).unsqueeze(-1);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.size(), 12);
        assert!(s.has_placeholder());
    }

    #[test]
    fn linear_round_trip() {
        let s = Shape::new(&[3, 4, 5]);
        for n in 0..s.size() {
            let idx = s.from_linear(n);
            assert_eq!(s.to_linear(&idx), n);
        }
    }

    #[test]
    fn linear_skips_placeholders() {
        let s = Shape::from_extents(vec![Extent::Fixed(3), Extent::Placeholder, Extent::Fixed(5)]);
        assert_eq!(s.size(), 15);
        let idx = MultiIndex::from_slice(&[2, 7, 3]);
        // The placeholder coordinate contributes stride 0.
        assert_eq!(s.to_linear(&idx), 2 * 5 + 3);
    }

    #[test]
    fn common_shapes() {
        let a = Shape::new(&[4]).unsqueeze(0); // (_, 4)
        let b = Shape::new(&[3]).unsqueeze(-1); // (3, _)
        let c = common_shape(&a, &b).unwrap();
        assert_eq!(c, Shape::new(&[3, 4]));

        let scalar = Shape::scalar();
        assert_eq!(common_shape(&scalar, &c).unwrap(), c);
        assert_eq!(common_shape(&c, &scalar).unwrap(), c);

        assert!(common_shape(&Shape::new(&[2]), &Shape::new(&[3])).is_none());
        assert!(common_shape(&Shape::new(&[2, 2]), &Shape::new(&[2])).is_none());
    }

    #[test]
    fn projection_zeroes_broadcast_axes() {
        let operand = Shape::new(&[4]).unsqueeze(0); // (_, 4)
        let idx = MultiIndex::from_slice(&[2, 3]);
        let p = project(&idx, &operand);
        assert_eq!(p.as_slice(), &[0, 3]);
        assert_eq!(operand.to_linear(&p), 3);
    }

    #[test]
    fn squeeze_unsqueeze() {
        let s = Shape::new(&[3, 4]);
        let u = s.unsqueeze(1);
        assert_eq!(u.extent(1), Extent::Placeholder);
        assert_eq!(u.squeeze(1, false), s);
        let f = s.squeeze(0, true);
        assert_eq!(f, Shape::new(&[4]));
    }

    #[test]
    fn lane_axis() {
        let s = Shape::new(&[7]).with_lanes(16);
        assert_eq!(s, Shape::new(&[7, 16]));
        assert_eq!(Shape::new(&[7]).with_lanes(1), Shape::new(&[7]));
    }
}
