//! The FDTD driver.
//!
//! [`Fdtd`] owns the field grids, the material table, the CPML state and the
//! two worker pools. Each `update_e`/`update_h` call publishes a fresh
//! [`KernelContext`] and walks its pool through the phase sequence.

use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::sync::Arc;

use crate::arrays::Grid3;
use crate::constants::{EPS0, MU0};
use crate::diagnostics::{DiagnosticsSink, LogSink};
use crate::extensions::cpml::{Cpml, Face, PmlSide};
use crate::extensions::material::{Material, MaterialModel};
use crate::fdtd::kernels::{HookTarget, KernelContext, SendPtr, SendPtrMut, Stencil};
use crate::fdtd::layout::{DomainLayout, FdtdConfig, MatsLayout, OutputConfig};
use crate::fdtd::matsgrid::{check_structure, MaterialTable, MatsGrid};
use crate::fdtd::pool::{Phase, PhaseWork, WorkerPool};
use crate::{Axis, Error, Result};

/// Everything the workers may point into.
struct State {
    layout: DomainLayout,
    e: [Grid3<f64>; 3],
    h: [Grid3<f64>; 3],
    dt_d: Option<[Grid3<f64>; 3]>,
    dt_b: Option<[Grid3<f64>; 3]>,
    mats: MatsGrid,
    table: MaterialTable,
    cpml: Cpml,
}

impl State {
    /// Bytes held by fields, increment grids, material ids, voxel lists,
    /// auxiliary memory and CPML state.
    fn memory_bytes(&self) -> usize {
        let f64_bytes = std::mem::size_of::<f64>();
        let fields = self
            .e
            .iter()
            .chain(&self.h)
            .chain(self.dt_d.iter().flatten())
            .chain(self.dt_b.iter().flatten())
            .map(|g| g.len() * f64_bytes)
            .sum::<usize>();
        let mats = self.layout.cells()
            * std::mem::size_of::<u32>()
            * match self.mats.layout() {
                MatsLayout::Shared => 1,
                MatsLayout::PerAxis => 3,
            };
        fields + mats + self.table.memory_bytes() + self.cpml.memory_bytes()
    }
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Ok,
    /// A worker panicked; the barrier drained but the fields are suspect
    Poisoned,
    /// A barrier timed out; workers may still be writing
    Hung,
}

/// Multi-threaded FDTD engine.
///
/// One `update_e` followed by one `update_h` advances the fields by one
/// timestep. Sources are injected between the calls through the `_mut`
/// field accessors.
///
/// # Example
///
/// ```no_run
/// use fdtd_core::{Axis, Fdtd, FdtdConfig};
/// use fdtd_core::extensions::{CpmlBoundaries, Material};
///
/// let config = FdtdConfig::new([32, 32, 32], [1e-3; 3]).pml(CpmlBoundaries::uniform(8));
/// let mut fdtd = Fdtd::new(config)?;
/// fdtd.set_material(1, Material::dielectric(4.0))?;
/// for n in 0..200 {
///     fdtd.update_e()?;
///     fdtd.e_mut(Axis::Z).add(24, 24, 24, (n as f64 * 0.1).sin());
///     fdtd.update_h()?;
/// }
/// # Ok::<(), fdtd_core::Error>(())
/// ```
pub struct Fdtd {
    state: ManuallyDrop<State>,
    pool_e: WorkerPool,
    pool_h: WorkerPool,
    sink: Arc<dyn DiagnosticsSink>,
    output: OutputConfig,
    check_finite: bool,
    tstep: u64,
    fact: f64,
    health: Health,
}

impl Fdtd {
    /// Build an engine reporting through the `log` crate.
    pub fn new(config: FdtdConfig) -> Result<Self> {
        Self::with_sink(config, Arc::new(LogSink))
    }

    /// Build an engine reporting through `sink`.
    pub fn with_sink(config: FdtdConfig, sink: Arc<dyn DiagnosticsSink>) -> Result<Self> {
        let layout = DomainLayout::from_config(&config)?;
        let n_threads = config.resolved_threads();

        let e = alloc_fields(layout.alloc)?;
        let h = alloc_fields(layout.alloc)?;
        let mats = MatsGrid::new(config.mats_layout, layout.extent)?;
        let table = MaterialTable::new(layout.spacing, layout.dt);
        let cpml = Cpml::new(layout.extent, layout.spacing, layout.dt, config.pml)?;

        let pool_e = WorkerPool::new("fdtd-e", n_threads, config.barrier_timeout)?;
        let pool_h = WorkerPool::new("fdtd-h", n_threads, config.barrier_timeout)?;

        let [nx, ny, nz] = layout.extent;
        let state = State {
            layout,
            e,
            h,
            dt_d: None,
            dt_b: None,
            mats,
            table,
            cpml,
        };
        let layout = &state.layout;
        let cpml = &state.cpml;
        sink.info(&format!(
            "FDTD domain {nx}x{ny}x{nz} -> {} cells ({:?} mode, {} CPML faces)",
            layout.cells(),
            layout.mode,
            cpml.num_regions()
        ));
        sink.info(&format!(
            "FDTD timestep {:.6e} s (Courant number {:.3}), {} threads in {}/{}, {:.2} MB allocated",
            layout.dt,
            layout.courant_number(),
            n_threads,
            pool_e.name(),
            pool_h.name(),
            mib(state.memory_bytes())
        ));

        Ok(Self {
            state: ManuallyDrop::new(state),
            pool_e,
            pool_h,
            sink,
            output: config.output,
            check_finite: config.check_finite,
            tstep: 0,
            fact: 0.0,
            health: Health::Ok,
        })
    }

    fn ensure_healthy(&self) -> Result<()> {
        match self.health {
            Health::Ok => Ok(()),
            Health::Poisoned | Health::Hung => Err(Error::Poisoned),
        }
    }

    fn state(&self) -> &State {
        assert!(
            self.health != Health::Hung,
            "FDTD state accessed after a barrier timeout"
        );
        &self.state
    }

    fn state_mut(&mut self) -> &mut State {
        assert!(
            self.health != Health::Hung,
            "FDTD state accessed after a barrier timeout"
        );
        &mut self.state
    }

    /// Record a pool fault and poison the engine.
    fn fault(&mut self, err: Error) -> Error {
        match &err {
            Error::WorkerPanic { .. } => self.health = Health::Poisoned,
            Error::BarrierTimeout { .. } => self.health = Health::Hung,
            _ => {}
        }
        self.sink.error(&format!("{err}; engine poisoned"));
        err
    }

    // ---- material setup ---------------------------------------------------

    /// Install `material` at `index` (replace, or append at the end).
    pub fn set_material(&mut self, index: usize, material: Material) -> Result<()> {
        material.validate()?;
        self.set_material_model(index, material.into_model())
    }

    /// Install a custom model at `index` (replace, or append at the end).
    ///
    /// The model is linked to the spacing and timestep, its voxel list is
    /// collected from the current material grid and the D/B increment grids
    /// are allocated if it asks for them.
    pub fn set_material_model(&mut self, index: usize, model: Box<dyn MaterialModel>) -> Result<()> {
        self.ensure_healthy()?;
        let name = model.name().to_string();
        let st = self.state_mut();
        st.table.set(index, model)?;
        st.table.link_grid(&st.mats, index, st.layout.alloc)?;
        self.alloc_increment_grids()?;
        let cells: usize = Axis::ALL
            .iter()
            .map(|&a| self.state().table.cells(index, a).len())
            .sum();
        self.sink
            .debug(&format!("material {index} set to {name} ({cells} hooked voxels)"));
        Ok(())
    }

    fn alloc_increment_grids(&mut self) -> Result<()> {
        let st = self.state_mut();
        if st.table.needs_d_field() && st.dt_d.is_none() {
            st.dt_d = Some(alloc_fields(st.layout.alloc)?);
        }
        if st.table.needs_b_field() && st.dt_b.is_none() {
            st.dt_b = Some(alloc_fields(st.layout.alloc)?);
        }
        Ok(())
    }

    /// Load the structure material ids, shared by all three E components.
    ///
    /// The grid must have the structure size; it is copied into the structure
    /// region and its edges are replicated outward through padding and CPML.
    pub fn set_matsgrid(&mut self, structure: &Grid3<u32>) -> Result<()> {
        self.ensure_healthy()?;
        let st = self.state_mut();
        check_structure(structure, &st.layout, st.table.len())?;
        st.mats.fill(None, structure, &st.layout);
        st.table.link_all(&st.mats, st.layout.alloc)?;
        self.report_linked();
        Ok(())
    }

    /// Load one structure grid per E component. Requires
    /// [`MatsLayout::PerAxis`].
    pub fn set_matsgrid_axes(&mut self, structures: [&Grid3<u32>; 3]) -> Result<()> {
        self.ensure_healthy()?;
        let st = self.state_mut();
        if st.mats.layout() != MatsLayout::PerAxis {
            return Err(Error::Config(
                "per-axis material grids need MatsLayout::PerAxis".into(),
            ));
        }
        for structure in structures {
            check_structure(structure, &st.layout, st.table.len())?;
        }
        for (axis, structure) in Axis::ALL.into_iter().zip(structures) {
            st.mats.fill(Some(axis), structure, &st.layout);
        }
        st.table.link_all(&st.mats, st.layout.alloc)?;
        self.report_linked();
        Ok(())
    }

    fn report_linked(&self) {
        let st = self.state();
        self.sink.debug(&format!(
            "material grid linked: {} materials, {:.2} MB allocated",
            st.table.len(),
            mib(st.memory_bytes())
        ));
    }

    /// Replace the grading of one CPML face. Only allowed before the first
    /// timestep; the width is fixed at construction.
    pub fn set_pml(&mut self, face: Face, side: PmlSide) -> Result<()> {
        self.ensure_healthy()?;
        if self.tstep != 0 {
            return Err(Error::Config(format!(
                "CPML on face {face} can only change before the first timestep (now at {})",
                self.tstep
            )));
        }
        self.state_mut().cpml.set_side(face, side)
    }

    // ---- time stepping ----------------------------------------------------

    /// Advance E by one step: the four material hooks around the curl update,
    /// then the CPML correction.
    pub fn update_e(&mut self) -> Result<()> {
        self.ensure_healthy()?;
        if self.tstep == 0 && self.state_mut().cpml.recalc_if_dirty() {
            self.sink.info("CPML coefficients recalculated");
        }
        let job = self.kernel_context(true);
        for phase in Phase::E_CYCLE {
            if let Err(err) = self.pool_e.run_phase(phase, &job) {
                return Err(self.fault(err));
            }
        }
        Ok(())
    }

    /// Advance H by one step and bump the timestep counter.
    pub fn update_h(&mut self) -> Result<()> {
        self.ensure_healthy()?;
        let job = self.kernel_context(false);
        for phase in Phase::H_CYCLE {
            if let Err(err) = self.pool_h.run_phase(phase, &job) {
                return Err(self.fault(err));
            }
        }
        self.tstep += 1;
        let x = self.tstep as f64 / 99.0;
        self.fact = 1.0 - (-x * x).exp();
        Ok(())
    }

    fn kernel_context(&mut self, e_side: bool) -> Arc<dyn PhaseWork> {
        let check_finite = self.check_finite;
        let st = self.state_mut();
        let layout = &st.layout;
        let stencil = Stencil {
            extent: layout.extent,
            alloc: layout.alloc,
            guard: layout.guard,
        };
        let slab_axis = layout.slab_axis().index();
        let dt = layout.dt;
        let spacing = layout.spacing;
        let dtdm = Axis::ALL.map(|a| layout.dtdm(a));

        let (faces_e, faces_h, hooks) = if e_side {
            let hooks = st
                .table
                .slots_mut()
                .iter_mut()
                .filter(|slot| slot.model.uses_hooks())
                .map(|slot| HookTarget {
                    model: slot.model.as_ref() as *const dyn MaterialModel,
                    cells: [0, 1, 2].map(|c| (SendPtr::new(slot.cells[c].as_ptr()), slot.cells[c].len())),
                    aux: slot.aux.each_mut().map(|a| SendPtrMut::new(a.as_mut_ptr())),
                    stride: slot.model.aux_per_voxel(),
                })
                .collect();
            (st.cpml.raw_faces_e(), Vec::new(), hooks)
        } else {
            (Vec::new(), st.cpml.raw_faces_h(), Vec::new())
        };

        Arc::new(KernelContext {
            stencil,
            slab_axis,
            dt,
            spacing,
            dtdm,
            e: field_ptrs(&mut st.e),
            h: field_ptrs(&mut st.h),
            dt_d: st.dt_d.as_mut().map(field_ptrs),
            dt_b: st.dt_b.as_mut().map(field_ptrs),
            mats: st.mats.ptrs().map(SendPtr::new),
            coeffs: SendPtr::new(st.table.coeff_table().as_ptr()),
            inv_kappa_e: Axis::ALL.map(|a| SendPtr::new(st.cpml.profile_e(a).inv_kappa.as_ptr())),
            inv_kappa_h: Axis::ALL.map(|a| SendPtr::new(st.cpml.profile_h(a).inv_kappa.as_ptr())),
            faces_e,
            faces_h,
            hooks,
            check_finite,
        })
    }

    /// Zero fields, increment grids, CPML memories and material state, and
    /// rewind the timestep counter. Allocations and threads are kept.
    pub fn reset_fields(&mut self) {
        let st = self.state_mut();
        for g in st.e.iter_mut().chain(st.h.iter_mut()) {
            g.clear();
        }
        for g in st.dt_d.iter_mut().chain(st.dt_b.iter_mut()).flatten() {
            g.clear();
        }
        st.cpml.reset();
        st.table.clean_fields();
        self.tstep = 0;
        self.fact = 0.0;
    }

    /// Copy the periodic images into the E guard cells: `E[N] = E[0]` on
    /// every guarded axis. Call after `update_e` in oblique phase mode.
    pub fn copy_periodic_guards_e(&mut self) {
        let st = self.state_mut();
        let (extent, guard) = (st.layout.extent, st.layout.guard);
        for grid in &mut st.e {
            copy_guards(grid, extent, guard, |_| 0);
        }
    }

    /// Copy the periodic images into the H guard cells: `H[N] = H[N-1]` on
    /// every guarded axis. Call after `update_h` in oblique phase mode.
    pub fn copy_periodic_guards_h(&mut self) {
        let st = self.state_mut();
        let (extent, guard) = (st.layout.extent, st.layout.guard);
        for grid in &mut st.h {
            copy_guards(grid, extent, guard, |n| n - 1);
        }
    }

    // ---- accessors --------------------------------------------------------

    /// E component along `axis`.
    pub fn e(&self, axis: Axis) -> &Grid3<f64> {
        &self.state().e[axis.index()]
    }

    /// Mutable E component along `axis`.
    pub fn e_mut(&mut self, axis: Axis) -> &mut Grid3<f64> {
        &mut self.state_mut().e[axis.index()]
    }

    /// H component along `axis`.
    pub fn h(&self, axis: Axis) -> &Grid3<f64> {
        &self.state().h[axis.index()]
    }

    /// Mutable H component along `axis`.
    pub fn h_mut(&mut self, axis: Axis) -> &mut Grid3<f64> {
        &mut self.state_mut().h[axis.index()]
    }

    /// D increment of the last E update, if any material asked for it.
    pub fn dt_d(&self, axis: Axis) -> Option<&Grid3<f64>> {
        self.state().dt_d.as_ref().map(|g| &g[axis.index()])
    }

    /// B increment of the last H update, if any material asked for it.
    pub fn dt_b(&self, axis: Axis) -> Option<&Grid3<f64>> {
        self.state().dt_b.as_ref().map(|g| &g[axis.index()])
    }

    /// Resolved domain layout.
    pub fn layout(&self) -> &DomainLayout {
        &self.state().layout
    }

    /// Completed timesteps.
    pub fn tstep(&self) -> u64 {
        self.tstep
    }

    /// Excitation ramp `1 - exp(-(tstep/99)^2)`.
    pub fn fact(&self) -> f64 {
        self.fact
    }

    /// Timestep (s).
    pub fn dt(&self) -> f64 {
        self.state().layout.dt
    }

    /// Workers per pool.
    pub fn n_threads(&self) -> usize {
        self.pool_e.n_threads()
    }

    /// Material table.
    pub fn materials(&self) -> &MaterialTable {
        &self.state().table
    }

    /// Material id grids.
    pub fn matsgrid(&self) -> &MatsGrid {
        &self.state().mats
    }

    /// CPML state.
    pub fn cpml(&self) -> &Cpml {
        &self.state().cpml
    }

    /// Completed phases of the E and H pools.
    pub fn phases_run(&self) -> (u64, u64) {
        (self.pool_e.phases_run(), self.pool_h.phases_run())
    }

    /// Whether a worker fault poisoned the engine.
    pub fn is_poisoned(&self) -> bool {
        self.health != Health::Ok
    }

    /// Vacuum electromagnetic energy over the logical domain (J):
    /// `dV/2 * (eps0*|E|^2 + mu0*|H|^2)`.
    pub fn field_energy(&self) -> f64 {
        let st = self.state();
        let extent = st.layout.extent;
        let dv: f64 = st.layout.spacing.iter().product();
        let e: f64 = st.e.iter().map(|g| g.sum_sq_box(extent)).sum();
        let h: f64 = st.h.iter().map(|g| g.sum_sq_box(extent)).sum();
        0.5 * dv * (EPS0 * e + MU0 * h)
    }

    /// Bytes currently held by the engine's grids and material state.
    pub fn memory_bytes(&self) -> usize {
        self.state().memory_bytes()
    }

    /// Path of an output file named `name`.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output.path(name)
    }

    /// Diagnostics sink the engine reports through.
    pub fn sink(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.sink
    }
}

impl Drop for Fdtd {
    fn drop(&mut self) {
        if self.health == Health::Hung {
            // stalled workers may still hold pointers into the state
            self.pool_e.detach();
            self.pool_h.detach();
            self.sink
                .warn("FDTD dropped after a barrier timeout; leaking field memory");
            return;
        }
        self.pool_e.shutdown();
        self.pool_h.shutdown();
        // SAFETY: both pools are joined and nothing references the state
        unsafe { ManuallyDrop::drop(&mut self.state) }
    }
}

fn alloc_fields(dims: [usize; 3]) -> Result<[Grid3<f64>; 3]> {
    Ok([Grid3::try_new(dims)?, Grid3::try_new(dims)?, Grid3::try_new(dims)?])
}

fn field_ptrs(grids: &mut [Grid3<f64>; 3]) -> [SendPtrMut<f64>; 3] {
    grids.each_mut().map(|g| SendPtrMut::new(g.as_mut_ptr()))
}

/// Fill every guard cell from its periodic image. `source(n)` maps the
/// guard index `n` of a guarded axis to the index it copies.
fn copy_guards(grid: &mut Grid3<f64>, extent: [usize; 3], guard: [bool; 3], source: impl Fn(usize) -> usize) {
    if !guard.iter().any(|&g| g) {
        return;
    }
    let dims = grid.dims();
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let p = [i, j, k];
                if !(0..3).any(|a| guard[a] && p[a] == extent[a]) {
                    continue;
                }
                let mut q = p;
                for a in 0..3 {
                    if guard[a] && p[a] == extent[a] {
                        q[a] = source(extent[a]);
                    }
                }
                grid[p] = grid[q];
            }
        }
    }
}
