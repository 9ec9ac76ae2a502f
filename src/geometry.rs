//! Cube geometry - maps between global cube coordinates and fragments
//!
//! A survey cube is stored as a regular grid of fixed-size sub-cubes
//! (fragments). Everything in this module is pure arithmetic on the two
//! shapes involved: the cube shape (samples per axis) and the fragment
//! shape. Coordinates are expected to be in range; callers own bounds
//! checking.

use serde::{Deserialize, Serialize};

/// A point in global cube coordinates
pub type CubePoint = [usize; 3];

/// Position of a fragment on the fragment grid
///
/// Fragment IDs order lexicographically on the `(i, j, k)` triple, which is
/// the order planners emit them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentId([usize; 3]);

impl FragmentId {
    /// Create a new fragment ID
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self([i, j, k])
    }

    /// Get the grid position along a specific axis
    pub fn get(&self, dim: usize) -> usize {
        self.0[dim]
    }

    /// Get all grid positions
    pub fn dims(&self) -> &[usize; 3] {
        &self.0
    }
}

/// Size of a fragment in each dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentShape {
    dims: [usize; 3],
}

impl FragmentShape {
    /// Create a new fragment shape. All dimensions must be positive
    pub fn new(dims: [usize; 3]) -> Self {
        debug_assert!(dims.iter().all(|&d| d > 0));
        Self { dims }
    }

    /// Get the size for a specific dimension
    pub fn get(&self, dim: usize) -> usize {
        self.dims[dim]
    }

    /// Get all dimensions
    pub fn dims(&self) -> &[usize; 3] {
        &self.dims
    }

    /// The 1-D fragment-local index along `dim` of a global index
    pub fn index(&self, dim: usize, idx: usize) -> usize {
        idx % self.dims[dim]
    }
}

/// Translates between global cube coordinates, fragment IDs, and
/// fragment-local coordinates for one (cube shape, fragment shape) pair
///
/// Attributes are partitioned independently of the data cube, so every
/// volume gets its own `Geometry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    cube_shape: [usize; 3],
    fragment_shape: FragmentShape,
}

impl Geometry {
    /// Create a new geometry
    pub fn new(cube_shape: [usize; 3], fragment_shape: FragmentShape) -> Self {
        Self {
            cube_shape,
            fragment_shape,
        }
    }

    /// Samples per axis of the whole cube
    pub fn cube_shape(&self) -> &[usize; 3] {
        &self.cube_shape
    }

    /// The fragment shape this geometry partitions the cube by
    pub fn fragment_shape(&self) -> &FragmentShape {
        &self.fragment_shape
    }

    /// Number of fragments along an axis
    ///
    /// The trailing fragment may be partial, so this rounds up. A cube with
    /// zero extent on the axis has zero fragments.
    pub fn fragment_count(&self, dim: usize) -> usize {
        let size = self.fragment_shape.get(dim);
        (self.cube_shape[dim] + size - 1) / size
    }

    /// The ID of the fragment containing a global cube point
    pub fn frag_id(&self, point: CubePoint) -> FragmentId {
        debug_assert!(point.iter().zip(&self.cube_shape).all(|(p, c)| p < c));
        FragmentId([
            point[0] / self.fragment_shape.get(0),
            point[1] / self.fragment_shape.get(1),
            point[2] / self.fragment_shape.get(2),
        ])
    }

    /// A global cube point expressed relative to its fragment's origin
    pub fn to_local(&self, point: CubePoint) -> CubePoint {
        [
            point[0] % self.fragment_shape.get(0),
            point[1] % self.fragment_shape.get(1),
            point[2] % self.fragment_shape.get(2),
        ]
    }

    /// All fragment IDs on the 2-D face obtained by fixing `dim` at `idx`
    ///
    /// IDs come out in lexicographic order.
    pub fn slice(&self, dim: usize, idx: usize) -> Vec<FragmentId> {
        let pin = idx / self.fragment_shape.get(dim);
        let (d0, d1) = match dim {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };

        let mut ids = Vec::with_capacity(self.fragment_count(d0) * self.fragment_count(d1));
        for i in 0..self.fragment_count(d0) {
            for j in 0..self.fragment_count(d1) {
                let mut id = [0; 3];
                id[dim] = pin;
                id[d0] = i;
                id[d1] = j;
                ids.push(FragmentId(id));
            }
        }

        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_geometry() -> Geometry {
        Geometry::new([9, 6, 10], FragmentShape::new([3, 3, 4]))
    }

    #[test]
    fn test_fragment_count() {
        let gvt = create_test_geometry();
        assert_eq!(gvt.fragment_count(0), 3);
        assert_eq!(gvt.fragment_count(1), 2);
        assert_eq!(gvt.fragment_count(2), 3); // ceil(10/4)
    }

    #[test]
    fn test_fragment_count_zero_extent() {
        let gvt = Geometry::new([0, 6, 10], FragmentShape::new([3, 3, 4]));
        assert_eq!(gvt.fragment_count(0), 0);
    }

    #[test]
    fn test_frag_id_and_local() {
        let gvt = create_test_geometry();
        assert_eq!(gvt.frag_id([0, 0, 0]), FragmentId::new(0, 0, 0));
        assert_eq!(gvt.frag_id([8, 5, 9]), FragmentId::new(2, 1, 2));
        assert_eq!(gvt.frag_id([3, 2, 4]), FragmentId::new(1, 0, 1));

        assert_eq!(gvt.to_local([0, 0, 0]), [0, 0, 0]);
        assert_eq!(gvt.to_local([8, 5, 9]), [2, 2, 1]);
        assert_eq!(gvt.to_local([3, 2, 4]), [0, 2, 0]);
    }

    #[test]
    fn test_local_index() {
        let shape = FragmentShape::new([3, 3, 4]);
        assert_eq!(shape.index(0, 7), 1);
        assert_eq!(shape.index(2, 7), 3);
        assert_eq!(shape.index(2, 4), 0);
    }

    #[test]
    fn test_slice_dim0() {
        let gvt = Geometry::new([4, 4, 4], FragmentShape::new([2, 2, 2]));
        let ids = gvt.slice(0, 3);
        assert_eq!(
            ids,
            vec![
                FragmentId::new(1, 0, 0),
                FragmentId::new(1, 0, 1),
                FragmentId::new(1, 1, 0),
                FragmentId::new(1, 1, 1),
            ]
        );
    }

    #[test]
    fn test_slice_dim1_order() {
        let gvt = create_test_geometry();
        let ids = gvt.slice(1, 4);
        // lexicographic on the full triple, with dim 1 pinned to 4/3 = 1
        assert_eq!(ids.len(), 9);
        assert_eq!(ids[0], FragmentId::new(0, 1, 0));
        assert_eq!(ids[1], FragmentId::new(0, 1, 1));
        assert_eq!(ids[8], FragmentId::new(2, 1, 2));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_slice_dim2() {
        let gvt = Geometry::new([4, 4, 8], FragmentShape::new([4, 4, 4]));
        assert_eq!(gvt.slice(2, 5), vec![FragmentId::new(0, 0, 1)]);
    }

    #[test]
    fn test_fragment_id_ordering() {
        let mut ids = vec![
            FragmentId::new(1, 0, 0),
            FragmentId::new(0, 2, 2),
            FragmentId::new(0, 2, 1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                FragmentId::new(0, 2, 1),
                FragmentId::new(0, 2, 2),
                FragmentId::new(1, 0, 0),
            ]
        );
    }
}
