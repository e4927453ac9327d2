//! End-to-end tests of the FDTD engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fdtd_core::arrays::{checkpoint, Grid3};
use fdtd_core::constants::{C0, EPS0, MU0};
use fdtd_core::diagnostics::MemorySink;
use fdtd_core::extensions::{
    CpmlBoundaries, DebyeParams, Face, LorentzParams, Material, MaterialModel, PmlSide, Side,
    UpdateCoeffs, VoxelBlock,
};
use fdtd_core::fdtd::{Mode, Phase};
use fdtd_core::{Axis, Error, Fdtd, FdtdConfig};

/// Deterministic pseudo-random values in [-1, 1).
fn noise(seed: u64) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

fn fill_logical(fdtd: &mut Fdtd, seed: u64) {
    let mut rng = noise(seed);
    let [nx, ny, nz] = fdtd.layout().extent;
    for axis in Axis::ALL {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    fdtd.e_mut(axis).set(i, j, k, rng());
                }
            }
        }
    }
}

fn step(fdtd: &mut Fdtd) {
    fdtd.update_e().unwrap();
    fdtd.update_h().unwrap();
}

#[test]
fn test_leapfrog_energy_is_conserved_in_periodic_vacuum() {
    let config = FdtdConfig::new([8, 8, 8], [1e-3; 3]).n_threads(3);
    let mut fdtd = Fdtd::new(config).unwrap();
    fill_logical(&mut fdtd, 7);

    let dv = 1e-9;
    // eps*|E^n|^2 + mu*<H^(n-1/2), H^(n+1/2)> is exactly invariant for Yee
    let mut reference = None;
    for _ in 0..200 {
        fdtd.update_e().unwrap();
        let h_old: Vec<Vec<f64>> = Axis::ALL.iter().map(|&a| fdtd.h(a).as_slice().to_vec()).collect();
        fdtd.update_h().unwrap();

        let e2: f64 = Axis::ALL.iter().map(|&a| fdtd.e(a).sum_sq()).sum();
        let hh: f64 = Axis::ALL
            .iter()
            .zip(&h_old)
            .map(|(&a, old)| {
                fdtd.h(a)
                    .as_slice()
                    .iter()
                    .zip(old)
                    .map(|(n, o)| n * o)
                    .sum::<f64>()
            })
            .sum();
        let w = 0.5 * dv * (EPS0 * e2 + MU0 * hh);
        let w0 = *reference.get_or_insert(w);
        assert!(
            ((w - w0) / w0).abs() < 1e-9,
            "energy drifted at step {}: {w} vs {w0}",
            fdtd.tstep()
        );
    }
    assert!(fdtd.field_energy().is_finite());
}

#[test]
fn test_pml_absorbs_plane_pulse() {
    let dz = 1e-3;
    let config = FdtdConfig::new([1, 1, 168], [dz; 3])
        .dt(0.5 * dz / C0)
        .n_threads(2)
        .pml_side(Face::new(Axis::Z, Side::Low), PmlSide::new(16))
        .pml_side(Face::new(Axis::Z, Side::High), PmlSide::new(16));
    let mut fdtd = Fdtd::new(config).unwrap();
    let nz = fdtd.layout().extent[2];
    assert_eq!(nz, 200);

    for k in 0..nz {
        let z = (k as f64 - 100.0) / 10.0;
        fdtd.e_mut(Axis::X).set(0, 0, k, (-z * z).exp());
    }
    let initial = fdtd.field_energy();
    for _ in 0..500 {
        step(&mut fdtd);
    }
    let ratio = fdtd.field_energy() / initial;
    assert!(ratio < 1e-3, "residual energy ratio {ratio:e}");
}

fn run_threads(n_threads: usize) -> Fdtd {
    let config = FdtdConfig::new([9, 7, 11], [1e-6; 3])
        .n_threads(n_threads)
        .pml(CpmlBoundaries::uniform(3));
    let mut fdtd = Fdtd::new(config).unwrap();
    fdtd.set_material(1, Material::dielectric(3.0)).unwrap();
    fdtd.set_material(
        2,
        Material::conductor(2.0, 0.5).with_pole(LorentzParams::from_hz(2e13, 1e12, 1.5)),
    )
    .unwrap();

    let mut ids: Grid3<u32> = Grid3::new([9, 7, 11]);
    for k in 0..11 {
        for j in 0..7 {
            for i in 0..9 {
                ids.set(i, j, k, ((i + 2 * j + 3 * k) % 3) as u32);
            }
        }
    }
    fdtd.set_matsgrid(&ids).unwrap();
    fill_logical(&mut fdtd, 42);
    for _ in 0..25 {
        step(&mut fdtd);
    }
    fdtd
}

#[test]
fn test_results_are_bit_identical_across_thread_counts() {
    let reference = run_threads(1);
    for n in 2..=4 {
        let other = run_threads(n);
        for axis in Axis::ALL {
            assert_eq!(reference.e(axis).as_slice(), other.e(axis).as_slice(), "E{axis} with {n} threads");
            assert_eq!(reference.h(axis).as_slice(), other.h(axis).as_slice(), "H{axis} with {n} threads");
        }
    }
}

#[test]
fn test_single_pulse_spreads_one_cell_per_half_step() {
    let config = FdtdConfig::new([10, 10, 10], [1e-9; 3])
        .courant_fraction(0.9)
        .n_threads(2);
    let mut fdtd = Fdtd::new(config).unwrap();
    fdtd.e_mut(Axis::Z).set(5, 5, 5, 1.0);

    fdtd.update_h().unwrap();
    let dtdmx = fdtd.layout().dtdm(Axis::X);
    let dtdmy = fdtd.layout().dtdm(Axis::Y);
    assert_eq!(fdtd.h(Axis::X).get(5, 5, 5), dtdmy);
    assert_eq!(fdtd.h(Axis::X).get(5, 4, 5), -dtdmy);
    assert_eq!(fdtd.h(Axis::Y).get(5, 5, 5), -dtdmx);
    assert_eq!(fdtd.h(Axis::Y).get(4, 5, 5), dtdmx);
    assert_eq!(fdtd.h(Axis::Z).max(), 0.0);
    assert_eq!(fdtd.h(Axis::Z).min(), 0.0);

    fdtd.update_e().unwrap();
    for axis in Axis::ALL {
        for k in 0..10usize {
            for j in 0..10usize {
                for i in 0..10usize {
                    let dist = i.abs_diff(5) + j.abs_diff(5) + k.abs_diff(5);
                    if dist > 2 {
                        assert_eq!(fdtd.e(axis).get(i, j, k), 0.0, "E{axis} at ({i},{j},{k})");
                    }
                    if dist > 1 {
                        assert_eq!(fdtd.h(axis).get(i, j, k), 0.0, "H{axis} at ({i},{j},{k})");
                    }
                }
            }
        }
    }
    assert!(fdtd.e(Axis::Z).get(5, 5, 5) < 1.0);
}

/// Vacuum model that records every hook call.
struct Recorder {
    log: Arc<Mutex<Vec<(&'static str, Axis, usize, f64)>>>,
    coeffs: [UpdateCoeffs; 3],
}

impl MaterialModel for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn link_fdtd(&mut self, spacing: [f64; 3], dt: f64) {
        for axis in Axis::ALL {
            let (a1, a2) = axis.cyclic();
            self.coeffs[axis.index()] = UpdateCoeffs {
                c1: 1.0,
                c2a: dt / (spacing[a1.index()] * EPS0),
                c2b: dt / (spacing[a2.index()] * EPS0),
            };
        }
    }

    fn coeffs(&self, axis: Axis) -> UpdateCoeffs {
        self.coeffs[axis.index()]
    }

    fn ante_compute(&self, block: &mut VoxelBlock<'_>) {
        self.record("ante_compute", block);
    }

    fn apply_e(&self, block: &mut VoxelBlock<'_>) {
        self.record("apply_e", block);
    }

    fn post_compute(&self, block: &mut VoxelBlock<'_>) {
        self.record("post_compute", block);
    }

    fn self_compute(&self, block: &mut VoxelBlock<'_>) {
        self.record("self_compute", block);
    }
}

impl Recorder {
    fn record(&self, hook: &'static str, block: &VoxelBlock<'_>) {
        let e = if block.is_empty() { 0.0 } else { block.e(0) };
        self.log.lock().unwrap().push((hook, block.axis(), block.len(), e));
    }
}

#[test]
fn test_hooks_run_in_order_around_curl_update() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = FdtdConfig::new([4, 4, 4], [1e-3; 3]).n_threads(1);
    let mut fdtd = Fdtd::new(config).unwrap();
    fdtd.set_material_model(
        1,
        Box::new(Recorder {
            log: Arc::clone(&log),
            coeffs: Default::default(),
        }),
    )
    .unwrap();
    let mut ids: Grid3<u32> = Grid3::new([4, 4, 4]);
    ids.set(1, 2, 2, 1);
    ids.set(2, 2, 2, 1);
    fdtd.set_matsgrid(&ids).unwrap();
    assert_eq!(fdtd.materials().cells(1, Axis::X).len(), 2);

    // a curl around voxel (1,2,2) so Ez there changes in the curl update
    fdtd.h_mut(Axis::Y).set(1, 2, 2, 1.0);
    fdtd.update_e().unwrap();

    let log = log.lock().unwrap();
    let hooks: Vec<&str> = log.iter().map(|r| r.0).collect();
    let expected: Vec<&str> = ["ante_compute", "apply_e", "post_compute", "self_compute"]
        .iter()
        .flat_map(|h| [*h; 3])
        .collect();
    assert_eq!(hooks, expected);
    assert!(log.iter().all(|r| r.2 == 2));

    let ante_z = log.iter().find(|r| r.0 == "ante_compute" && r.1 == Axis::Z).unwrap();
    let apply_z = log.iter().find(|r| r.0 == "apply_e" && r.1 == Axis::Z).unwrap();
    assert_eq!(ante_z.3, 0.0);
    assert!(apply_z.3 != 0.0, "apply_e must see the curl-updated field");
}

#[test]
fn test_phase_counters() {
    let mut fdtd = Fdtd::new(FdtdConfig::new([4, 4, 4], [1e-3; 3]).n_threads(2)).unwrap();
    for _ in 0..3 {
        step(&mut fdtd);
    }
    let (e, h) = fdtd.phases_run();
    assert_eq!(e, 3 * Phase::E_CYCLE.len() as u64);
    assert_eq!(h, 3 * Phase::H_CYCLE.len() as u64);
    assert_eq!((e, h), (18, 6));
}

#[test]
fn test_dispersive_material_allocates_d_increment() {
    let mut fdtd = Fdtd::new(FdtdConfig::new([4, 4, 4], [1e-6; 3]).n_threads(1)).unwrap();
    fdtd.set_material(1, Material::dielectric(2.0)).unwrap();
    assert!(fdtd.dt_d(Axis::X).is_none());
    fdtd.set_material(2, Material::dielectric(2.0).with_pole(DebyeParams::new(1e-13, 1.0)))
        .unwrap();
    for axis in Axis::ALL {
        assert_eq!(fdtd.dt_d(axis).unwrap().dims(), fdtd.e(axis).dims());
        assert!(fdtd.dt_b(axis).is_none());
    }
}

/// Vacuum model that asks for the B increment.
struct MagneticVacuum {
    coeffs: [UpdateCoeffs; 3],
}

impl MaterialModel for MagneticVacuum {
    fn name(&self) -> &str {
        "magnetic"
    }

    fn link_fdtd(&mut self, spacing: [f64; 3], dt: f64) {
        for axis in Axis::ALL {
            let (a1, a2) = axis.cyclic();
            self.coeffs[axis.index()] = UpdateCoeffs {
                c1: 1.0,
                c2a: dt / (spacing[a1.index()] * EPS0),
                c2b: dt / (spacing[a2.index()] * EPS0),
            };
        }
    }

    fn coeffs(&self, axis: Axis) -> UpdateCoeffs {
        self.coeffs[axis.index()]
    }

    fn needs_b_field(&self) -> bool {
        true
    }
}

#[test]
fn test_b_increment_matches_h_update() {
    let config = FdtdConfig::new([5, 4, 3], [1e-3, 2e-3, 1.5e-3]).n_threads(2);
    let mut fdtd = Fdtd::new(config).unwrap();
    assert!(fdtd.dt_b(Axis::X).is_none());
    fdtd.set_material_model(1, Box::new(MagneticVacuum { coeffs: Default::default() }))
        .unwrap();
    for axis in Axis::ALL {
        assert_eq!(fdtd.dt_b(axis).unwrap().dims(), fdtd.h(axis).dims());
        assert!(fdtd.dt_d(axis).is_none());
    }

    fill_logical(&mut fdtd, 11);
    fdtd.update_e().unwrap();
    let before: Vec<Grid3<f64>> = Axis::ALL.iter().map(|&a| fdtd.h(a).clone()).collect();
    fdtd.update_h().unwrap();

    let [nx, ny, nz] = fdtd.layout().extent;
    for axis in Axis::ALL {
        let (h0, h1) = (&before[axis.index()], fdtd.h(axis));
        let dt_b = fdtd.dt_b(axis).unwrap();
        let scale = dt_b.max().abs().max(dt_b.min().abs());
        assert!(scale > 0.0);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let db = MU0 * (h1.get(i, j, k) - h0.get(i, j, k));
                    let diff = (db - dt_b.get(i, j, k)).abs();
                    assert!(diff <= 1e-12 * scale, "{axis:?} at ({i},{j},{k}): {diff}");
                }
            }
        }
    }
}

#[cfg(debug_assertions)]
#[test]
fn test_check_finite_flags_nan_in_curl_update() {
    let config = FdtdConfig::new([4, 4, 4], [1e-3; 3]).n_threads(2).check_finite(true);
    let mut fdtd = Fdtd::new(config).unwrap();
    fdtd.e_mut(Axis::Y).set(2, 1, 3, f64::NAN);
    match fdtd.update_e() {
        Err(Error::WorkerPanic { phase, message, .. }) => {
            assert_eq!(phase, "field_update_e");
            assert!(message.contains("non-finite E"), "{message}");
        }
        other => panic!("expected a non-finite field report, got {other:?}"),
    }
    assert!(fdtd.is_poisoned());

    // without the flag the NaN propagates silently
    let mut quiet = Fdtd::new(FdtdConfig::new([4, 4, 4], [1e-3; 3]).n_threads(2)).unwrap();
    quiet.e_mut(Axis::Y).set(2, 1, 3, f64::NAN);
    step(&mut quiet);
    assert!(quiet.e(Axis::Y).get(2, 1, 3).is_nan());
}

#[test]
fn test_debye_medium_relaxes_to_static_permittivity() {
    let config = FdtdConfig::new([4, 4, 4], [1e-6; 3]).n_threads(2);
    let mut fdtd = Fdtd::new(config).unwrap();
    let dt = fdtd.dt();
    let (eps_inf, delta) = (2.0, 3.0);
    fdtd.set_material(0, Material::dielectric(eps_inf).with_pole(DebyeParams::new(50.0 * dt, delta)))
        .unwrap();
    assert_eq!(fdtd.materials().cells(0, Axis::Z).len(), 64);

    // uniform field: no curl, so D stays constant while the pole charges
    fdtd.e_mut(Axis::Z).fill(1.0);
    for _ in 0..2000 {
        step(&mut fdtd);
    }
    let expected = eps_inf / (eps_inf + delta);
    let e = fdtd.e(Axis::Z).get(2, 1, 3);
    assert!((e - expected).abs() < 1e-6, "E = {e}, expected {expected}");
    assert_eq!(fdtd.h(Axis::X).max(), 0.0);
}

#[test]
fn test_matsgrid_validation() {
    let mut fdtd = Fdtd::new(FdtdConfig::new([5, 4, 3], [1e-3; 3]).n_threads(1)).unwrap();
    let wrong: Grid3<u32> = Grid3::new([5, 4, 4]);
    match fdtd.set_matsgrid(&wrong) {
        Err(Error::DimensionMismatch { expected, found, .. }) => {
            assert_eq!(expected, vec![5, 4, 3]);
            assert_eq!(found, vec![5, 4, 4]);
        }
        other => panic!("expected a dimension mismatch, got {other:?}"),
    }

    let mut ids: Grid3<u32> = Grid3::new([5, 4, 3]);
    ids.set(0, 0, 0, 1);
    assert!(matches!(fdtd.set_matsgrid(&ids), Err(Error::Config(_))));
    fdtd.set_material(1, Material::dielectric(4.0)).unwrap();
    fdtd.set_matsgrid(&ids).unwrap();
    assert_eq!(fdtd.matsgrid().max_id(), 1);
}

#[test]
fn test_matsgrid_is_clamped_into_padding_and_pml() {
    let config = FdtdConfig::new([3, 3, 3], [1e-3; 3])
        .n_threads(1)
        .padding([1, 0, 0, 0, 0, 2])
        .pml_side(Face::new(Axis::X, Side::High), PmlSide::new(2));
    let mut fdtd = Fdtd::new(config).unwrap();
    fdtd.set_material(1, Material::dielectric(4.0)).unwrap();
    let mut ids: Grid3<u32> = Grid3::new([3, 3, 3]);
    ids.set(2, 1, 2, 1);
    fdtd.set_matsgrid(&ids).unwrap();

    let grid = fdtd.matsgrid().grid(Axis::X);
    assert_eq!(grid.dims(), [6, 3, 5]);
    // structure (2,1,2) sits at (3,1,2); x+ PML and z+ padding replicate it
    for i in 3..6 {
        for k in 2..5 {
            assert_eq!(grid.get(i, 1, k), 1, "({i},1,{k})");
        }
    }
    assert_eq!(grid.get(2, 1, 2), 0);
    assert_eq!(grid.get(3, 0, 2), 0);
}

/// Model whose `apply_e` panics on every voxel block it sees.
struct Faulty;

impl MaterialModel for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn link_fdtd(&mut self, _spacing: [f64; 3], _dt: f64) {}

    fn coeffs(&self, _axis: Axis) -> UpdateCoeffs {
        UpdateCoeffs {
            c1: 1.0,
            c2a: 0.0,
            c2b: 0.0,
        }
    }

    fn apply_e(&self, block: &mut VoxelBlock<'_>) {
        if !block.is_empty() {
            panic!("apply_e failed on {} voxels", block.len());
        }
    }
}

#[test]
fn test_worker_panic_poisons_engine() {
    let sink = Arc::new(MemorySink::new());
    let config = FdtdConfig::new([4, 4, 4], [1e-3; 3]).n_threads(2);
    let mut fdtd = Fdtd::with_sink(config, sink.clone()).unwrap();
    fdtd.set_material_model(1, Box::new(Faulty)).unwrap();
    let mut ids: Grid3<u32> = Grid3::new([4, 4, 4]);
    ids.set(1, 1, 1, 1);
    fdtd.set_matsgrid(&ids).unwrap();

    match fdtd.update_e() {
        Err(Error::WorkerPanic { pool, phase, message, .. }) => {
            assert_eq!(pool, "fdtd-e");
            assert_eq!(phase, "apply_e");
            assert!(message.contains("apply_e failed"));
        }
        other => panic!("expected a worker panic, got {other:?}"),
    }
    assert!(fdtd.is_poisoned());
    assert!(matches!(fdtd.update_h(), Err(Error::Poisoned)));
    assert!(matches!(fdtd.update_e(), Err(Error::Poisoned)));
    assert!(sink.count(log::Level::Error) >= 1);
    assert!(sink.contains("poisoned"));
    // the barrier drained, so the fields are still readable
    assert_eq!(fdtd.e(Axis::X).dims(), [4, 4, 4]);
}

/// Model whose last hook stalls far beyond the barrier timeout.
struct Stalling;

impl MaterialModel for Stalling {
    fn name(&self) -> &str {
        "stalling"
    }

    fn link_fdtd(&mut self, _spacing: [f64; 3], _dt: f64) {}

    fn coeffs(&self, _axis: Axis) -> UpdateCoeffs {
        UpdateCoeffs {
            c1: 1.0,
            c2a: 0.0,
            c2b: 0.0,
        }
    }

    fn self_compute(&self, block: &mut VoxelBlock<'_>) {
        if !block.is_empty() {
            thread::sleep(Duration::from_secs(2));
        }
    }
}

#[test]
fn test_barrier_timeout_is_reported() {
    let sink = Arc::new(MemorySink::new());
    let config = FdtdConfig::new([4, 4, 4], [1e-3; 3])
        .n_threads(2)
        .barrier_timeout(Duration::from_millis(300));
    let mut fdtd = Fdtd::with_sink(config, sink.clone()).unwrap();
    fdtd.set_material_model(1, Box::new(Stalling)).unwrap();
    let mut ids: Grid3<u32> = Grid3::new([4, 4, 4]);
    ids.set(0, 0, 0, 1);
    fdtd.set_matsgrid(&ids).unwrap();

    match fdtd.update_e() {
        Err(Error::BarrierTimeout { pool, phase, waited }) => {
            assert_eq!(pool, "fdtd-e");
            assert_eq!(phase, "self_compute");
            assert!(waited >= Duration::from_millis(300));
        }
        other => panic!("expected a barrier timeout, got {other:?}"),
    }
    assert!(fdtd.is_poisoned());
    assert!(matches!(fdtd.update_e(), Err(Error::Poisoned)));
    assert!(sink.contains("stalled"));

    let access = catch_unwind(AssertUnwindSafe(|| fdtd.e(Axis::X).len()));
    assert!(access.is_err());
}

#[test]
fn test_oblique_guards_match_periodic_wrap() {
    let size = [6, 5, 4];
    let mut normal = Fdtd::new(FdtdConfig::new(size, [1e-3; 3]).n_threads(2)).unwrap();
    let mut oblique = Fdtd::new(
        FdtdConfig::new(size, [1e-3; 3])
            .n_threads(3)
            .mode(Mode::ObliquePhase),
    )
    .unwrap();
    assert_eq!(oblique.layout().alloc, [7, 6, 4]);

    fill_logical(&mut normal, 3);
    fill_logical(&mut oblique, 3);
    oblique.copy_periodic_guards_e();
    oblique.copy_periodic_guards_h();

    for _ in 0..15 {
        normal.update_e().unwrap();
        oblique.update_e().unwrap();
        oblique.copy_periodic_guards_e();
        normal.update_h().unwrap();
        oblique.update_h().unwrap();
        oblique.copy_periodic_guards_h();
    }

    for axis in Axis::ALL {
        for k in 0..size[2] {
            for j in 0..size[1] {
                for i in 0..size[0] {
                    assert_eq!(normal.e(axis).get(i, j, k), oblique.e(axis).get(i, j, k));
                    assert_eq!(normal.h(axis).get(i, j, k), oblique.h(axis).get(i, j, k));
                }
            }
        }
    }
}

#[test]
fn test_field_checkpoint_round_trip() {
    let mut fdtd = Fdtd::new(FdtdConfig::new([5, 4, 3], [1e-3; 3]).n_threads(2)).unwrap();
    fill_logical(&mut fdtd, 11);
    step(&mut fdtd);

    let mut bytes = Vec::new();
    checkpoint::buf_write(fdtd.h(Axis::Y), &mut bytes).unwrap();
    assert_eq!(bytes.len(), 5 * 4 * 3 * 8);

    let mut restored: Grid3<f64> = Grid3::new([5, 4, 3]);
    checkpoint::buf_read(&mut restored, &mut bytes.as_slice()).unwrap();
    assert_eq!(&restored, fdtd.h(Axis::Y));

    fdtd.reset_fields();
    checkpoint::buf_read(fdtd.h_mut(Axis::Y), &mut bytes.as_slice()).unwrap();
    assert_eq!(&restored, fdtd.h(Axis::Y));
}

#[test]
fn test_pml_regrading_before_first_step() {
    let face = Face::new(Axis::Z, Side::High);
    let config = FdtdConfig::new([4, 4, 8], [1e-3; 3])
        .n_threads(1)
        .pml_side(face, PmlSide::new(3));
    let mut fdtd = Fdtd::new(config).unwrap();
    let before = fdtd.cpml().profile_e(Axis::Z).kappa.as_slice().to_vec();
    fdtd.set_pml(face, PmlSide::new(3).with_kappa_max(5.0)).unwrap();
    assert!(fdtd.set_pml(face, PmlSide::new(4)).is_err());
    step(&mut fdtd);
    let after = fdtd.cpml().profile_e(Axis::Z).kappa.as_slice();
    assert_ne!(before.as_slice(), after);
    assert!(after.iter().all(|&k| (1.0..=5.0).contains(&k)));
}
