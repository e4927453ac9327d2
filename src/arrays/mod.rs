//! Dense N-dimensional grids.
//!
//! Every field component, auxiliary grid, PML profile and the material-id
//! grid is a [`Grid`]: a flat owned buffer indexed with the first axis
//! fastest, `i + j*N1 + k*N1*N2 (+ l*N1*N2*N3)`.

pub mod checkpoint;

use std::ops::{Index, IndexMut};

use rayon::prelude::*;

use crate::{Error, Result};

/// Dense grid with `N` dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T, const N: usize> {
    dims: [usize; N],
    data: Vec<T>,
}

/// One-dimensional grid.
pub type Grid1<T> = Grid<T, 1>;
/// Two-dimensional grid.
pub type Grid2<T> = Grid<T, 2>;
/// Three-dimensional grid.
pub type Grid3<T> = Grid<T, 3>;
/// Four-dimensional grid.
pub type Grid4<T> = Grid<T, 4>;

fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl<T: Clone + Default, const N: usize> Grid<T, N> {
    /// Allocate a grid filled with `T::default()`.
    ///
    /// # Panics
    /// Panics if the element count overflows `usize`.
    pub fn new(dims: [usize; N]) -> Self {
        Self::filled(dims, T::default())
    }

    /// Allocate a grid filled with `value`.
    ///
    /// # Panics
    /// Panics if the element count overflows `usize`.
    pub fn filled(dims: [usize; N], value: T) -> Self {
        let len = element_count(&dims)
            .unwrap_or_else(|| panic!("grid dimensions {dims:?} overflow usize"));
        Self {
            dims,
            data: vec![value; len],
        }
    }

    /// Allocate a grid, reporting allocation failure as an error instead of
    /// aborting the process.
    pub fn try_new(dims: [usize; N]) -> Result<Self> {
        let elem = std::mem::size_of::<T>().max(1);
        let len = element_count(&dims).ok_or(Error::Allocation { bytes: usize::MAX })?;
        let bytes = len.saturating_mul(elem);
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::Allocation { bytes })?;
        data.resize(len, T::default());
        Ok(Self { dims, data })
    }

    /// Reallocate to `dims`, filled with `T::default()`.
    pub fn init(&mut self, dims: [usize; N]) {
        self.init_with(dims, T::default());
    }

    /// Reallocate to `dims`, filled with `value`.
    pub fn init_with(&mut self, dims: [usize; N], value: T) {
        let len = element_count(&dims)
            .unwrap_or_else(|| panic!("grid dimensions {dims:?} overflow usize"));
        self.dims = dims;
        self.data.clear();
        self.data.resize(len, value);
    }

    /// Copy assignment: takes shape and contents of `other`, reallocating
    /// only when the shapes differ.
    pub fn assign(&mut self, other: &Self) {
        if self.dims != other.dims {
            self.dims = other.dims;
            self.data = other.data.clone();
        } else {
            self.data.clone_from_slice(&other.data);
        }
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Reset every element to `T::default()`.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }
}

impl<T, const N: usize> Grid<T, N> {
    /// Grid dimensions.
    #[inline]
    pub fn dims(&self) -> [usize; N] {
        self.dims
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Linear index of a multi-index.
    #[inline]
    pub fn linear(&self, index: [usize; N]) -> usize {
        debug_assert!(
            index.iter().zip(self.dims.iter()).all(|(i, n)| i < n),
            "grid index {:?} out of range for dimensions {:?}",
            index,
            self.dims
        );
        let mut idx = 0;
        let mut stride = 1;
        for d in 0..N {
            idx += index[d] * stride;
            stride *= self.dims[d];
        }
        idx
    }

    /// Flat view of the data.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat view of the data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Raw pointer to the first element.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    /// Mutable raw pointer to the first element.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T, const N: usize> Index<[usize; N]> for Grid<T, N> {
    type Output = T;

    #[inline]
    fn index(&self, index: [usize; N]) -> &T {
        &self.data[self.linear(index)]
    }
}

impl<T, const N: usize> IndexMut<[usize; N]> for Grid<T, N> {
    #[inline]
    fn index_mut(&mut self, index: [usize; N]) -> &mut T {
        let idx = self.linear(index);
        &mut self.data[idx]
    }
}

impl<T: Copy + PartialOrd, const N: usize> Grid<T, N> {
    /// Largest element.
    ///
    /// # Panics
    /// Panics on an empty grid.
    pub fn max(&self) -> T {
        let mut best = self.data[0];
        for &v in &self.data[1..] {
            if v > best {
                best = v;
            }
        }
        best
    }

    /// Smallest element.
    ///
    /// # Panics
    /// Panics on an empty grid.
    pub fn min(&self) -> T {
        let mut best = self.data[0];
        for &v in &self.data[1..] {
            if v < best {
                best = v;
            }
        }
        best
    }
}

impl<const N: usize> Grid<f64, N> {
    /// Scale so the largest element becomes 1.
    ///
    /// # Panics
    /// Panics on an empty grid.
    pub fn normalize(&mut self) {
        let m = self.max();
        self.data.par_iter_mut().for_each(|v| *v /= m);
    }

    /// Sum of squares of all elements.
    pub fn sum_sq(&self) -> f64 {
        self.data.par_iter().map(|v| v * v).sum()
    }
}

impl<T: Copy> Grid<T, 3> {
    /// Element at `(i, j, k)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> T {
        self[[i, j, k]]
    }

    /// Store `value` at `(i, j, k)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: T) {
        self[[i, j, k]] = value;
    }
}

impl Grid<f64, 3> {
    /// Add `value` to the element at `(i, j, k)`.
    #[inline]
    pub fn add(&mut self, i: usize, j: usize, k: usize, value: f64) {
        self[[i, j, k]] += value;
    }

    /// Sum of squares over the sub-box `[0,n0)x[0,n1)x[0,n2)`.
    ///
    /// Used to skip guard cells that sit past the logical extent.
    pub fn sum_sq_box(&self, extent: [usize; 3]) -> f64 {
        let [n0, n1, _] = self.dims;
        (0..extent[2])
            .into_par_iter()
            .map(|k| {
                let mut acc = 0.0;
                for j in 0..extent[1] {
                    let row = (j + k * n1) * n0;
                    for v in &self.data[row..row + extent[0]] {
                        acc += v * v;
                    }
                }
                acc
            })
            .sum()
    }
}
