//! Defines the dense `Matrix` and `Tensor3` containers used throughout the crate.

use crate::Scalar;
use rand::rngs::StdRng;
use rand::Rng;
use std::fmt;

/// Dimensions of a rank-3 tensor as `(planes, rows, cols)`.
pub type Dims3 = (usize, usize, usize);

/// Number of scalars covered by rank-3 dimensions.
pub fn size3(dims: Dims3) -> usize {
    dims.0 * dims.1 * dims.2
}

/// A 2D tensor representing a matrix of scalars, stored in row-major order.
#[derive(Clone, PartialEq)]
pub struct Matrix {
    pub data: Vec<Scalar>,
    pub rows: usize,
    pub cols: usize,
}

impl Matrix {
    /// Creates a new `rows` x `cols` matrix initialized with zeros.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Creates a matrix from an existing data vector in row-major order.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` is not equal to `rows * cols`.
    pub fn from_data(data: Vec<Scalar>, rows: usize, cols: usize) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data size must match matrix dimensions"
        );
        Self { data, rows, cols }
    }

    /// Returns the shape of the matrix as `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns the value at the specified `(row, col)` index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn get(&self, r: usize, c: usize) -> Scalar {
        self.data[r * self.cols + c]
    }

    /// Sets the `value` at the specified `(row, col)` index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn set(&mut self, r: usize, c: usize, v: Scalar) {
        self.data[r * self.cols + c] = v;
    }

    /// Returns a borrowed view of one row.
    pub fn row(&self, r: usize) -> &[Scalar] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Returns a mutable view of one row.
    pub fn row_mut(&mut self, r: usize) -> &mut [Scalar] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Returns the whole storage as a contiguous flat view.
    pub fn as_slice(&self) -> &[Scalar] {
        &self.data
    }

    /// Returns the whole storage as a mutable contiguous flat view.
    pub fn as_mut_slice(&mut self) -> &mut [Scalar] {
        &mut self.data
    }

    /// Resets every element to zero, keeping the allocation.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }
}

/// Provides a truncated, pretty-printed format for debugging matrices.
impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix({}, {}) [", self.rows, self.cols)?;
        for i in 0..self.rows.min(3) {
            write!(f, "[")?;
            for j in 0..self.cols.min(6) {
                write!(f, "{:.4}", self.get(i, j))?;
                if j + 1 < self.cols.min(6) {
                    write!(f, ", ")?;
                }
            }
            if self.cols > 6 {
                write!(f, ", ...")?;
            }
            write!(f, "]")?;
            if i + 1 < self.rows.min(3) {
                write!(f, ", ")?;
            }
        }
        if self.rows > 3 {
            write!(f, ", ...")?;
        }
        write!(f, "]")
    }
}

/// A 3D tensor of shape `planes x rows x cols`, stored contiguously in
/// row-major order with the plane as the leading dimension.
///
/// This is the shape of every sample input and target: an image-like stack
/// of `planes` matrices. Flat 1D quantities are modeled as `n x 1 x 1`.
#[derive(Clone, PartialEq)]
pub struct Tensor3 {
    pub data: Vec<Scalar>,
    pub planes: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Tensor3 {
    /// Creates a new zero tensor with the given dimensions.
    pub fn new(planes: usize, rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; planes * rows * cols],
            planes,
            rows,
            cols,
        }
    }

    /// Creates a new zero tensor from a dimension triple.
    pub fn from_dims(dims: Dims3) -> Self {
        Self::new(dims.0, dims.1, dims.2)
    }

    /// Creates a tensor that takes ownership of an existing flat buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` is not equal to `planes * rows * cols`.
    pub fn from_data(data: Vec<Scalar>, planes: usize, rows: usize, cols: usize) -> Self {
        assert_eq!(
            data.len(),
            planes * rows * cols,
            "data size must match tensor dimensions"
        );
        Self {
            data,
            planes,
            rows,
            cols,
        }
    }

    /// Creates a `n x 1 x 1` tensor from a flat vector.
    pub fn from_vec(data: Vec<Scalar>) -> Self {
        let n = data.len();
        Self::from_data(data, n, 1, 1)
    }

    /// Returns the dimensions as `(planes, rows, cols)`.
    pub fn dims(&self) -> Dims3 {
        (self.planes, self.rows, self.cols)
    }

    /// Returns the total number of scalars.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the value at `(plane, row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn get(&self, p: usize, r: usize, c: usize) -> Scalar {
        self.data[(p * self.rows + r) * self.cols + c]
    }

    /// Sets the value at `(plane, row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn set(&mut self, p: usize, r: usize, c: usize, v: Scalar) {
        self.data[(p * self.rows + r) * self.cols + c] = v;
    }

    /// Returns a borrowed view of the sub-tensor at the given leading index.
    pub fn plane(&self, p: usize) -> &[Scalar] {
        let n = self.rows * self.cols;
        &self.data[p * n..(p + 1) * n]
    }

    /// Returns a mutable view of the sub-tensor at the given leading index.
    pub fn plane_mut(&mut self, p: usize) -> &mut [Scalar] {
        let n = self.rows * self.cols;
        &mut self.data[p * n..(p + 1) * n]
    }

    /// Returns the whole storage as a contiguous flat view.
    pub fn as_slice(&self) -> &[Scalar] {
        &self.data
    }

    /// Returns the whole storage as a mutable contiguous flat view.
    pub fn as_mut_slice(&mut self) -> &mut [Scalar] {
        &mut self.data
    }

    /// Reinterprets the storage with compatible dimensions, in place.
    ///
    /// # Panics
    ///
    /// Panics if the new dimensions do not cover the same number of scalars.
    pub fn reshape(&mut self, planes: usize, rows: usize, cols: usize) {
        assert_eq!(
            self.data.len(),
            planes * rows * cols,
            "reshape must preserve the element count"
        );
        self.planes = planes;
        self.rows = rows;
        self.cols = cols;
    }

    /// Resets every element to zero, keeping the allocation.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fills the tensor with values sampled uniformly from `[lo, hi)`.
    pub fn fill_uniform(&mut self, rng: &mut StdRng, lo: Scalar, hi: Scalar) {
        for v in self.data.iter_mut() {
            *v = rng.random_range(lo..hi);
        }
    }

    /// Copies the contents of another tensor with identical dimensions.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn copy_from(&mut self, other: &Tensor3) {
        assert_eq!(self.dims(), other.dims(), "tensor dimensions must match");
        self.data.copy_from_slice(&other.data);
    }
}

impl fmt::Debug for Tensor3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor3({}, {}, {}) [{} scalars]",
            self.planes,
            self.rows,
            self.cols,
            self.data.len()
        )
    }
}
