//! Voxel material grid and the material table it indexes.

use crate::arrays::Grid3;
use crate::extensions::material::{ConstantModel, MaterialModel, UpdateCoeffs};
use crate::fdtd::layout::{DomainLayout, MatsLayout};
use crate::{Axis, Error, Result};

/// Material ids over the logical domain.
///
/// In [`MatsLayout::Shared`] one grid serves all three E components; in
/// [`MatsLayout::PerAxis`] each component has its own.
#[derive(Debug, Clone)]
pub struct MatsGrid {
    layout: MatsLayout,
    grids: Vec<Grid3<u32>>,
}

impl MatsGrid {
    /// All-background grid over `extent`.
    pub fn new(layout: MatsLayout, extent: [usize; 3]) -> Result<Self> {
        let count = match layout {
            MatsLayout::Shared => 1,
            MatsLayout::PerAxis => 3,
        };
        let grids = (0..count)
            .map(|_| Grid3::try_new(extent))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layout, grids })
    }

    /// Storage layout.
    pub fn layout(&self) -> MatsLayout {
        self.layout
    }

    /// Id grid used by the E component along `axis`.
    #[inline]
    pub fn grid(&self, axis: Axis) -> &Grid3<u32> {
        match self.layout {
            MatsLayout::Shared => &self.grids[0],
            MatsLayout::PerAxis => &self.grids[axis.index()],
        }
    }

    pub(crate) fn ptrs(&self) -> [*const u32; 3] {
        Axis::ALL.map(|a| self.grid(a).as_ptr())
    }

    /// Copy `structure` into the structure region of the grid used by `axis`
    /// (every grid when `axis` is `None`) and clamp it outward.
    pub(crate) fn fill(&mut self, axis: Option<Axis>, structure: &Grid3<u32>, layout: &DomainLayout) {
        match (self.layout, axis) {
            (MatsLayout::PerAxis, Some(a)) => fill_clamped(&mut self.grids[a.index()], structure, layout),
            _ => {
                for grid in &mut self.grids {
                    fill_clamped(grid, structure, layout);
                }
            }
        }
    }

    /// Largest id present.
    pub fn max_id(&self) -> u32 {
        self.grids.iter().map(|g| g.max()).max().unwrap_or(0)
    }
}

/// Copy the structure region and replicate its edge values into the padding
/// and CPML on every axis.
fn fill_clamped(dst: &mut Grid3<u32>, src: &Grid3<u32>, layout: &DomainLayout) {
    let [nx, ny, nz] = layout.extent;
    let start = Axis::ALL.map(|a| layout.structure_start(a));
    let end = Axis::ALL.map(|a| layout.structure_end(a));
    let clamp = |i: usize, a: usize| i.clamp(start[a], end[a] - 1) - start[a];

    for k in 0..nz {
        let sk = clamp(k, 2);
        for j in 0..ny {
            let sj = clamp(j, 1);
            for i in 0..nx {
                dst.set(i, j, k, src.get(clamp(i, 0), sj, sk));
            }
        }
    }
}

/// Validate a caller-supplied structure grid against the layout and the
/// number of registered materials.
pub(crate) fn check_structure(
    structure: &Grid3<u32>,
    layout: &DomainLayout,
    n_materials: usize,
) -> Result<()> {
    if structure.dims() != layout.structure {
        return Err(Error::DimensionMismatch {
            what: "structure material grid",
            expected: layout.structure.to_vec(),
            found: structure.dims().to_vec(),
        });
    }
    if let Some(&bad) = structure
        .as_slice()
        .iter()
        .find(|&&id| id as usize >= n_materials)
    {
        return Err(Error::Config(format!(
            "material id {bad} is not registered ({n_materials} materials)"
        )));
    }
    Ok(())
}

fn zeroed(len: usize) -> Result<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::Allocation {
        bytes: len.saturating_mul(std::mem::size_of::<f64>()),
    })?;
    v.resize(len, 0.0);
    Ok(v)
}

/// One entry of the material table.
pub(crate) struct MaterialSlot {
    pub model: Box<dyn MaterialModel>,
    /// Field-linear indices of the owned voxels per component, ascending
    pub cells: [Vec<usize>; 3],
    /// `cells[c].len() * aux_per_voxel()` values per component
    pub aux: [Vec<f64>; 3],
}

impl MaterialSlot {
    fn new(model: Box<dyn MaterialModel>) -> Self {
        Self {
            model,
            cells: Default::default(),
            aux: Default::default(),
        }
    }
}

/// Ordered material models with their update coefficients and voxel state.
///
/// Slot 0 is vacuum until replaced.
pub struct MaterialTable {
    slots: Vec<MaterialSlot>,
    coeffs: Vec<[UpdateCoeffs; 3]>,
    spacing: [f64; 3],
    dt: f64,
}

impl MaterialTable {
    /// Table holding only vacuum, bound to the given spacing and timestep.
    pub fn new(spacing: [f64; 3], dt: f64) -> Self {
        let mut table = Self {
            slots: Vec::new(),
            coeffs: Vec::new(),
            spacing,
            dt,
        };
        let mut vacuum = ConstantModel::vacuum();
        vacuum.link_fdtd(spacing, dt);
        table.coeffs.push(Axis::ALL.map(|a| vacuum.coeffs(a)));
        table.slots.push(MaterialSlot::new(Box::new(vacuum)));
        table
    }

    /// Number of materials.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table is empty (never true).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Replace slot `index`, or append when `index == len()`.
    ///
    /// The model is linked to the spacing and timestep and its coefficients
    /// are cached. The slot's voxel list is left empty; call
    /// [`link_grid`](Self::link_grid) afterwards.
    pub fn set(&mut self, index: usize, mut model: Box<dyn MaterialModel>) -> Result<()> {
        if index > self.slots.len() || index > u32::MAX as usize {
            return Err(Error::Config(format!(
                "material index {index} skips past the end of the table (length {})",
                self.slots.len()
            )));
        }
        model.link_fdtd(self.spacing, self.dt);
        let coeffs = Axis::ALL.map(|a| model.coeffs(a));
        for (axis, c) in Axis::ALL.iter().zip(&coeffs) {
            if !(c.c1.is_finite() && c.c2a.is_finite() && c.c2b.is_finite()) {
                return Err(Error::Numerical(format!(
                    "material {index} ({}) has non-finite {axis} coefficients {c:?}",
                    model.name()
                )));
            }
        }

        let slot = MaterialSlot::new(model);
        if index == self.slots.len() {
            self.slots.push(slot);
            self.coeffs.push(coeffs);
        } else {
            self.slots[index] = slot;
            self.coeffs[index] = coeffs;
        }
        Ok(())
    }

    /// Collect the voxels owned by material `index` and allocate its
    /// auxiliary memory. `alloc` is the field grid extent used to linearise
    /// cell positions.
    pub fn link_grid(&mut self, mats: &MatsGrid, index: usize, alloc: [usize; 3]) -> Result<()> {
        let slot = &mut self.slots[index];
        let stride = slot.model.aux_per_voxel();
        let uses_hooks = slot.model.uses_hooks();
        let id = index as u32;

        for axis in Axis::ALL {
            let c = axis.index();
            slot.cells[c].clear();
            slot.aux[c] = Vec::new();
            if !uses_hooks {
                continue;
            }
            let grid = mats.grid(axis);
            let [nx, ny, nz] = grid.dims();
            let ids = grid.as_slice();
            for k in 0..nz {
                for j in 0..ny {
                    let row = (j + k * ny) * nx;
                    for i in 0..nx {
                        if ids[row + i] == id {
                            slot.cells[c].push(i + alloc[0] * (j + alloc[1] * k));
                        }
                    }
                }
            }
            slot.aux[c] = zeroed(slot.cells[c].len() * stride)?;
        }
        Ok(())
    }

    /// [`link_grid`](Self::link_grid) for every material.
    pub fn link_all(&mut self, mats: &MatsGrid, alloc: [usize; 3]) -> Result<()> {
        for index in 0..self.slots.len() {
            self.link_grid(mats, index, alloc)?;
        }
        Ok(())
    }

    /// Zero every material's auxiliary memory.
    pub fn clean_fields(&mut self) {
        for slot in &mut self.slots {
            for aux in &mut slot.aux {
                aux.fill(0.0);
            }
        }
    }

    /// Whether any material reads the D increment.
    pub fn needs_d_field(&self) -> bool {
        self.slots.iter().any(|s| s.model.needs_d_field())
    }

    /// Whether any material reads the B increment.
    pub fn needs_b_field(&self) -> bool {
        self.slots.iter().any(|s| s.model.needs_b_field())
    }

    /// Model of material `index`.
    pub fn model(&self, index: usize) -> &dyn MaterialModel {
        self.slots[index].model.as_ref()
    }

    /// Cached coefficients of material `index` for the component along `axis`.
    pub fn coeffs(&self, index: usize, axis: Axis) -> UpdateCoeffs {
        self.coeffs[index][axis.index()]
    }

    /// Owned voxels of material `index` for the component along `axis`.
    pub fn cells(&self, index: usize, axis: Axis) -> &[usize] {
        &self.slots[index].cells[axis.index()]
    }

    /// Auxiliary memory of material `index` for the component along `axis`.
    pub fn aux(&self, index: usize, axis: Axis) -> &[f64] {
        &self.slots[index].aux[axis.index()]
    }

    /// Bytes held by voxel lists and auxiliary memory.
    pub fn memory_bytes(&self) -> usize {
        let cells: usize = self.slots.iter().flat_map(|s| s.cells.iter()).map(Vec::len).sum();
        let aux: usize = self.slots.iter().flat_map(|s| s.aux.iter()).map(Vec::len).sum();
        cells * std::mem::size_of::<usize>() + aux * std::mem::size_of::<f64>()
    }

    pub(crate) fn coeff_table(&self) -> &[[UpdateCoeffs; 3]] {
        &self.coeffs
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [MaterialSlot] {
        &mut self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::material::Material;
    use crate::fdtd::layout::FdtdConfig;

    fn layout() -> DomainLayout {
        let config = FdtdConfig::new([3, 2, 2], [1e-9; 3]).padding([1, 2, 0, 1, 0, 0]);
        DomainLayout::from_config(&config).unwrap()
    }

    #[test]
    fn test_fill_clamps_outward() {
        let layout = layout();
        let mut structure: Grid3<u32> = Grid3::new([3, 2, 2]);
        structure.set(0, 0, 0, 1);
        structure.set(2, 1, 1, 2);

        let mut mats = MatsGrid::new(MatsLayout::Shared, layout.extent).unwrap();
        mats.fill(None, &structure, &layout);
        let g = mats.grid(Axis::X);
        assert_eq!(g.dims(), [6, 3, 2]);
        // structure origin sits at (1, 0, 0)
        assert_eq!(g.get(1, 0, 0), 1);
        assert_eq!(g.get(0, 0, 0), 1);
        // x+ padding and y+ padding replicate the far corner
        assert_eq!(g.get(3, 1, 1), 2);
        assert_eq!(g.get(5, 2, 1), 2);
        assert_eq!(g.get(2, 2, 0), 0);
        assert_eq!(mats.max_id(), 2);
    }

    #[test]
    fn test_per_axis_fill_touches_one_grid() {
        let layout = layout();
        let structure: Grid3<u32> = Grid3::filled([3, 2, 2], 1);
        let mut mats = MatsGrid::new(MatsLayout::PerAxis, layout.extent).unwrap();
        mats.fill(Some(Axis::Y), &structure, &layout);
        assert_eq!(mats.grid(Axis::Y).min(), 1);
        assert_eq!(mats.grid(Axis::X).max(), 0);
        assert_eq!(mats.grid(Axis::Z).max(), 0);
    }

    #[test]
    fn test_check_structure() {
        let layout = layout();
        let wrong: Grid3<u32> = Grid3::new([3, 2, 3]);
        assert!(matches!(
            check_structure(&wrong, &layout, 1),
            Err(Error::DimensionMismatch { .. })
        ));
        let bad_id: Grid3<u32> = Grid3::filled([3, 2, 2], 4);
        assert!(matches!(
            check_structure(&bad_id, &layout, 2),
            Err(Error::Config(_))
        ));
        assert!(check_structure(&Grid3::new([3, 2, 2]), &layout, 1).is_ok());
    }

    #[test]
    fn test_table_append_and_replace() {
        let mut table = MaterialTable::new([1e-9; 3], 1e-18);
        assert_eq!(table.len(), 1);
        assert_eq!(table.coeffs(0, Axis::Z).c1, 1.0);

        table.set(1, Material::dielectric(4.0).into_model()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.coeffs(1, Axis::X).c2a < table.coeffs(0, Axis::X).c2a);

        table.set(0, Material::dielectric(2.0).into_model()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.coeffs(0, Axis::X).c2a > table.coeffs(1, Axis::X).c2a);

        assert!(matches!(
            table.set(5, Material::vacuum().into_model()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_link_grid_collects_sorted_cells() {
        let layout = layout();
        let mut table = MaterialTable::new(layout.spacing, layout.dt);
        let dispersive = Material::dielectric(2.0)
            .with_pole(crate::extensions::dispersive::DebyeParams::new(1e-12, 1.0));
        table.set(1, dispersive.into_model()).unwrap();

        let mut structure: Grid3<u32> = Grid3::new([3, 2, 2]);
        structure.set(1, 1, 0, 1);
        structure.set(0, 0, 1, 1);
        let mut mats = MatsGrid::new(MatsLayout::Shared, layout.extent).unwrap();
        mats.fill(None, &structure, &layout);

        table.link_all(&mats, layout.alloc).unwrap();
        // (2,1,0) plus its y+ padding copy, and (1,0,1) plus its x- padding copy
        let [ax, ay, _] = layout.alloc;
        let lin = |i: usize, j: usize, k: usize| i + ax * (j + ay * k);
        let cells = table.cells(1, Axis::Z);
        assert_eq!(cells, &[lin(2, 1, 0), lin(2, 2, 0), lin(0, 0, 1), lin(1, 0, 1)]);
        let stride = table.model(1).aux_per_voxel();
        assert_eq!(table.aux(1, Axis::Z).len(), 4 * stride);
        // vacuum has no hooks and keeps no voxel list
        assert!(table.cells(0, Axis::X).is_empty());
        assert!(table.needs_d_field());
    }
}
