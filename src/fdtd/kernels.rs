//! Yee update kernels and per-phase dispatch.
//!
//! A [`KernelContext`] is built by the coordinator for each update call. It
//! carries raw pointers to every buffer the phases touch, so the persistent
//! workers can share it without borrowing the driver. Soundness rests on the
//! slab discipline: within a phase every thread writes a disjoint set of
//! cells, and no buffer is reallocated while a phase runs.

use std::ops::Range;
use std::slice;

use crate::extensions::cpml::FaceRaw;
use crate::extensions::material::{MaterialModel, UpdateCoeffs, VoxelBlock};
use crate::fdtd::pool::{slab, Phase, PhaseWork};
use crate::Axis;

/// Shared const pointer that may cross threads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendPtr<T>(*const T);

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    #[inline]
    pub(crate) fn new(ptr: *const T) -> Self {
        Self(ptr)
    }

    #[inline]
    unsafe fn read(&self, offset: usize) -> T
    where
        T: Copy,
    {
        *self.0.add(offset)
    }
}

/// Mutable version of SendPtr.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendPtrMut<T>(*mut T);

unsafe impl<T> Send for SendPtrMut<T> {}
unsafe impl<T> Sync for SendPtrMut<T> {}

impl<T> SendPtrMut<T> {
    #[inline]
    pub(crate) fn new(ptr: *mut T) -> Self {
        Self(ptr)
    }

    #[inline]
    unsafe fn add(&self, offset: usize) -> *mut T {
        self.0.add(offset)
    }
}

/// Voxel lists and auxiliary memory of one material with active hooks.
pub(crate) struct HookTarget {
    pub model: *const dyn MaterialModel,
    pub cells: [(SendPtr<usize>, usize); 3],
    pub aux: [SendPtrMut<f64>; 3],
    pub stride: usize,
}

/// Index arithmetic shared by all stencils.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stencil {
    /// Logical extent
    pub extent: [usize; 3],
    /// Allocated field extent
    pub alloc: [usize; 3],
    /// Axes reading a guard cell at index `N` instead of wrapping
    pub guard: [bool; 3],
}

impl Stencil {
    /// Field-linear index.
    #[inline]
    pub fn lin(&self, p: [usize; 3]) -> usize {
        p[0] + self.alloc[0] * (p[1] + self.alloc[1] * p[2])
    }

    /// Material-grid linear index.
    #[inline]
    pub fn lin_mats(&self, p: [usize; 3]) -> usize {
        p[0] + self.extent[0] * (p[1] + self.extent[1] * p[2])
    }

    /// Field-linear index of the backward neighbour along `a`.
    #[inline]
    pub fn back(&self, p: [usize; 3], a: usize) -> usize {
        let mut q = p;
        q[a] = if p[a] > 0 {
            p[a] - 1
        } else if self.guard[a] {
            self.extent[a]
        } else {
            self.extent[a] - 1
        };
        self.lin(q)
    }

    /// Field-linear index of the forward neighbour along `a`.
    #[inline]
    pub fn fwd(&self, p: [usize; 3], a: usize) -> usize {
        let mut q = p;
        q[a] = if p[a] + 1 < self.extent[a] {
            p[a] + 1
        } else if self.guard[a] {
            self.extent[a]
        } else {
            0
        };
        self.lin(q)
    }
}

/// Everything one update call needs, shared by the workers of a pool.
pub(crate) struct KernelContext {
    pub stencil: Stencil,
    pub slab_axis: usize,
    pub dt: f64,
    pub spacing: [f64; 3],
    pub dtdm: [f64; 3],
    pub e: [SendPtrMut<f64>; 3],
    pub h: [SendPtrMut<f64>; 3],
    pub dt_d: Option<[SendPtrMut<f64>; 3]>,
    pub dt_b: Option<[SendPtrMut<f64>; 3]>,
    pub mats: [SendPtr<u32>; 3],
    pub coeffs: SendPtr<[UpdateCoeffs; 3]>,
    pub inv_kappa_e: [SendPtr<f64>; 3],
    pub inv_kappa_h: [SendPtr<f64>; 3],
    pub faces_e: Vec<FaceRaw>,
    pub faces_h: Vec<FaceRaw>,
    pub hooks: Vec<HookTarget>,
    pub check_finite: bool,
}

// SAFETY: the raw pointers refer to buffers owned by the driver, which keeps
// them alive and unmoved for as long as any phase can run.
unsafe impl Send for KernelContext {}
unsafe impl Sync for KernelContext {}

impl PhaseWork for KernelContext {
    fn run(&self, phase: Phase, thread: usize, n_threads: usize) {
        let s = self.slab_axis;
        let range = slab(thread, n_threads, self.stencil.extent[s]);
        // SAFETY: every branch only writes cells of this thread's share
        unsafe {
            match phase {
                Phase::AnteCompute
                | Phase::ApplyE
                | Phase::PostCompute
                | Phase::SelfCompute => self.run_hooks(phase, thread, n_threads),
                Phase::FieldUpdateE => {
                    let (lo, hi) = self.slab_box(range);
                    for c in 0..3 {
                        self.adv_e(c, lo, hi);
                    }
                }
                Phase::FieldUpdateH => {
                    let (lo, hi) = self.slab_box(range);
                    for c in 0..3 {
                        self.adv_h(c, lo, hi);
                    }
                }
                Phase::PmlE => {
                    for face in &self.faces_e {
                        if let Some((lo, hi)) = self.face_box(face, range.clone()) {
                            self.pml_e(face, lo, hi);
                        }
                    }
                }
                Phase::PmlH => {
                    for face in &self.faces_h {
                        if let Some((lo, hi)) = self.face_box(face, range.clone()) {
                            self.pml_h(face, lo, hi);
                        }
                    }
                }
            }
        }
    }
}

impl KernelContext {
    fn slab_box(&self, range: Range<usize>) -> ([usize; 3], [usize; 3]) {
        let mut lo = [0; 3];
        let mut hi = self.stencil.extent;
        lo[self.slab_axis] = range.start;
        hi[self.slab_axis] = range.end;
        (lo, hi)
    }

    /// Intersection of a face's layer with this thread's slab.
    fn face_box(&self, face: &FaceRaw, range: Range<usize>) -> Option<([usize; 3], [usize; 3])> {
        let (mut lo, mut hi) = self.slab_box(range);
        let d = face.face.axis.index();
        lo[d] = lo[d].max(face.start);
        hi[d] = hi[d].min(face.start + face.width);
        (lo[d] < hi[d] && (0..3).all(|a| lo[a] < hi[a])).then_some((lo, hi))
    }

    #[inline]
    fn check(&self, what: &str, c: usize, p: [usize; 3], v: f64) {
        if cfg!(debug_assertions) && self.check_finite {
            assert!(v.is_finite(), "non-finite {what}{} at {p:?}", Axis::from_index(c));
        }
    }

    /// Curl update of the E component `c` over `[lo, hi)`.
    ///
    /// `Ec = C1*Ec + C2a/kappa_a1 * d_a1(H_a2) - C2b/kappa_a2 * d_a2(H_a1)`
    /// with backward differences.
    unsafe fn adv_e(&self, c: usize, lo: [usize; 3], hi: [usize; 3]) {
        let (a1, a2) = ((c + 1) % 3, (c + 2) % 3);
        let st = self.stencil;
        let e = self.e[c];
        let h1 = self.h[a1];
        let h2 = self.h[a2];
        let mats = self.mats[c];
        let (ik1, ik2) = (self.inv_kappa_e[a1], self.inv_kappa_e[a2]);
        let dt_d = self.dt_d.map(|d| d[c]);
        let (inv_d1, inv_d2) = (1.0 / self.spacing[a1], 1.0 / self.spacing[a2]);

        for k in lo[2]..hi[2] {
            for j in lo[1]..hi[1] {
                for i in lo[0]..hi[0] {
                    let p = [i, j, k];
                    let idx = st.lin(p);
                    let id = mats.read(st.lin_mats(p)) as usize;
                    let co = self.coeffs.read(id)[c];

                    let curl_a1 = ik1.read(p[a1]) * (*h2.add(idx) - *h2.add(st.back(p, a1)));
                    let curl_a2 = ik2.read(p[a2]) * (*h1.add(idx) - *h1.add(st.back(p, a2)));

                    let cell = e.add(idx);
                    *cell = co.c1 * *cell + co.c2a * curl_a1 - co.c2b * curl_a2;
                    self.check("E", c, p, *cell);

                    if let Some(d) = dt_d {
                        *d.add(idx) = self.dt * (curl_a1 * inv_d1 - curl_a2 * inv_d2);
                    }
                }
            }
        }
    }

    /// Curl update of the H component `c` over `[lo, hi)`.
    ///
    /// `Hc -= dtdm_a1/kappa_a1 * d_a1(E_a2) - dtdm_a2/kappa_a2 * d_a2(E_a1)`
    /// with forward differences.
    unsafe fn adv_h(&self, c: usize, lo: [usize; 3], hi: [usize; 3]) {
        let (a1, a2) = ((c + 1) % 3, (c + 2) % 3);
        let st = self.stencil;
        let h = self.h[c];
        let e1 = self.e[a1];
        let e2 = self.e[a2];
        let (ik1, ik2) = (self.inv_kappa_h[a1], self.inv_kappa_h[a2]);
        let (dtdm1, dtdm2) = (self.dtdm[a1], self.dtdm[a2]);
        let dt_b = self.dt_b.map(|b| b[c]);
        let (inv_d1, inv_d2) = (1.0 / self.spacing[a1], 1.0 / self.spacing[a2]);

        for k in lo[2]..hi[2] {
            for j in lo[1]..hi[1] {
                for i in lo[0]..hi[0] {
                    let p = [i, j, k];
                    let idx = st.lin(p);

                    let curl_a1 = ik1.read(p[a1]) * (*e2.add(st.fwd(p, a1)) - *e2.add(idx));
                    let curl_a2 = ik2.read(p[a2]) * (*e1.add(st.fwd(p, a2)) - *e1.add(idx));

                    let cell = h.add(idx);
                    *cell -= dtdm1 * curl_a1 - dtdm2 * curl_a2;
                    self.check("H", c, p, *cell);

                    if let Some(b) = dt_b {
                        *b.add(idx) = -self.dt * (curl_a1 * inv_d1 - curl_a2 * inv_d2);
                    }
                }
            }
        }
    }

    /// CPML correction of the two E components transverse to the face.
    unsafe fn pml_e(&self, face: &FaceRaw, lo: [usize; 3], hi: [usize; 3]) {
        let d = face.face.axis.index();
        let (a, b) = ((d + 1) % 3, (d + 2) % 3);
        let st = self.stencil;
        let (ea, eb) = (self.e[a], self.e[b]);
        let (ha, hb) = (self.h[a], self.h[b]);

        for k in lo[2]..hi[2] {
            for j in lo[1]..hi[1] {
                for i in lo[0]..hi[0] {
                    let p = [i, j, k];
                    let idx = st.lin(p);
                    debug_assert!(face.contains(p));
                    let back = st.back(p, d);
                    let dha = *ha.add(idx) - *ha.add(back);
                    let dhb = *hb.add(idx) - *hb.add(back);
                    let (psi_pos, psi_neg) = face.step(p, dha, dhb);

                    let m = st.lin_mats(p);
                    // d is the first curl axis of E_b and the second of E_a
                    let cb = self.coeffs.read(self.mats[b].read(m) as usize)[b];
                    let ca = self.coeffs.read(self.mats[a].read(m) as usize)[a];
                    *eb.add(idx) += cb.c2a * psi_pos;
                    *ea.add(idx) -= ca.c2b * psi_neg;
                }
            }
        }
    }

    /// CPML correction of the two H components transverse to the face.
    unsafe fn pml_h(&self, face: &FaceRaw, lo: [usize; 3], hi: [usize; 3]) {
        let d = face.face.axis.index();
        let (a, b) = ((d + 1) % 3, (d + 2) % 3);
        let st = self.stencil;
        let (ea, eb) = (self.e[a], self.e[b]);
        let (ha, hb) = (self.h[a], self.h[b]);
        let dtdm = self.dtdm[d];

        for k in lo[2]..hi[2] {
            for j in lo[1]..hi[1] {
                for i in lo[0]..hi[0] {
                    let p = [i, j, k];
                    let idx = st.lin(p);
                    debug_assert!(face.contains(p));
                    let fwd = st.fwd(p, d);
                    let dea = *ea.add(fwd) - *ea.add(idx);
                    let deb = *eb.add(fwd) - *eb.add(idx);
                    let (psi_pos, psi_neg) = face.step(p, dea, deb);

                    *hb.add(idx) -= dtdm * psi_pos;
                    *ha.add(idx) += dtdm * psi_neg;
                }
            }
        }
    }

    /// Run one material hook over this thread's share of every material's
    /// voxel list.
    unsafe fn run_hooks(&self, phase: Phase, thread: usize, n_threads: usize) {
        for target in &self.hooks {
            let model = &*target.model;
            let stride = target.stride;
            for c in 0..3 {
                let (cells_ptr, len) = target.cells[c];
                let r = slab(thread, n_threads, len);
                if r.is_empty() {
                    continue;
                }
                let cells = slice::from_raw_parts(cells_ptr.0.add(r.start), r.len());
                let aux = slice::from_raw_parts_mut(target.aux[c].add(r.start * stride), r.len() * stride);
                let dt_d = self.dt_d.map(|d| d[c].0 as *const f64);
                let mut block = VoxelBlock::from_raw(
                    Axis::from_index(c),
                    cells,
                    aux,
                    stride,
                    self.e[c].0,
                    dt_d,
                );
                match phase {
                    Phase::AnteCompute => model.ante_compute(&mut block),
                    Phase::ApplyE => model.apply_e(&mut block),
                    Phase::PostCompute => model.post_compute(&mut block),
                    Phase::SelfCompute => model.self_compute(&mut block),
                    _ => unreachable!("{phase} is not a material hook phase"),
                }
            }
        }
    }
}
