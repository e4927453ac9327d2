//! Raw checkpoint slices.
//!
//! A checkpoint is a headerless stream of native-endian IEEE-754 doubles.
//! For a grid of dimensions `(n_mem, ny, nz)` the values are written with
//! `t` in `[0, n_mem)` outermost, then `j` in `[0, ny)`, then `k` in
//! `[0, nz)`. Reader and writer have to agree on the dimensions out of band.

use std::io::{Read, Write};

use crate::arrays::Grid3;
use crate::Result;

/// Write `grid` as a raw slice list.
pub fn buf_write<W: Write>(grid: &Grid3<f64>, writer: &mut W) -> Result<()> {
    let [n_mem, ny, nz] = grid.dims();
    let mut row = vec![0.0f64; nz];

    for t in 0..n_mem {
        for j in 0..ny {
            for (k, v) in row.iter_mut().enumerate() {
                *v = grid.get(t, j, k);
            }
            writer.write_all(bytemuck::cast_slice(&row))?;
        }
    }
    Ok(())
}

/// Read a raw slice list into `grid`, whose dimensions must already be set.
///
/// A truncated stream yields [`crate::Error::Io`].
pub fn buf_read<R: Read>(grid: &mut Grid3<f64>, reader: &mut R) -> Result<()> {
    let [n_mem, ny, nz] = grid.dims();
    let mut row = vec![0.0f64; nz];

    for t in 0..n_mem {
        for j in 0..ny {
            reader.read_exact(bytemuck::cast_slice_mut(&mut row))?;
            for (k, &v) in row.iter().enumerate() {
                grid.set(t, j, k, v);
            }
        }
    }
    Ok(())
}
