//! High-level run control.
//!
//! [`Simulation`] wraps an [`Fdtd`] and drives it until an
//! [`EndCondition`] is met, sampling the field energy, reporting progress and
//! calling an optional per-step hook where sources can be injected.

use indicatif::{ProgressBar, ProgressStyle};
use instant::Instant;
use log::info;

use crate::fdtd::engine::Fdtd;
use crate::{Error, Result};

/// Simulation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    /// Ready to run
    Ready,
    /// Currently running
    Running,
    /// Ran to its step limit
    Finished,
    /// Stopped early by energy decay
    Stopped,
}

/// End condition for simulation
#[derive(Debug, Clone)]
pub enum EndCondition {
    /// Run for fixed number of timesteps
    Timesteps(u64),
    /// Run until energy decays by this many dB below its peak
    EnergyDecay(f64),
    /// Run for fixed simulation time (s)
    SimulationTime(f64),
}

impl Default for EndCondition {
    fn default() -> Self {
        Self::Timesteps(10000)
    }
}

/// Statistics from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationStats {
    /// Total timesteps executed
    pub timesteps: u64,
    /// Total simulation time (seconds)
    pub sim_time: f64,
    /// Wall clock time (seconds)
    pub wall_time: f64,
    /// Peak sampled energy (J)
    pub peak_energy: f64,
    /// Final energy (J)
    pub final_energy: f64,
    /// Average speed (million cell updates per second)
    pub speed_mcells_per_sec: f64,
}

/// Callback run after every `update_h`.
pub type StepHook = Box<dyn FnMut(&mut Fdtd) -> Result<()> + Send>;

/// Step limit used when only an energy decay ends the run.
const ENERGY_DECAY_MAX_STEPS: u64 = 1_000_000;

/// Main simulation controller.
pub struct Simulation {
    fdtd: Fdtd,
    end_condition: EndCondition,
    state: SimulationState,
    /// Verbosity level
    verbose: u8,
    /// Show progress bar
    show_progress: bool,
    /// Caller-provided bar, e.g. one line of a `MultiProgress`
    progress_bar: Option<ProgressBar>,
    /// Steps between energy samples
    energy_interval: u64,
    on_step: Option<StepHook>,
}

impl Simulation {
    /// Wrap a configured engine.
    pub fn new(fdtd: Fdtd) -> Self {
        Self {
            fdtd,
            end_condition: EndCondition::default(),
            state: SimulationState::Ready,
            verbose: 1,
            show_progress: true,
            progress_bar: None,
            energy_interval: 100,
            on_step: None,
        }
    }

    /// Set end condition.
    pub fn set_end_condition(&mut self, condition: EndCondition) -> &mut Self {
        self.end_condition = condition;
        self
    }

    /// Set verbosity level (0=quiet, 1=normal, 2=verbose).
    pub fn set_verbose(&mut self, level: u8) -> &mut Self {
        self.verbose = level;
        self
    }

    /// Enable/disable progress bar.
    pub fn set_show_progress(&mut self, show: bool) -> &mut Self {
        self.show_progress = show;
        self
    }

    /// Report progress on `bar` instead of a bar of our own.
    /// Takes effect even when [`set_show_progress`](Self::set_show_progress) is off.
    pub fn set_progress_bar(&mut self, bar: ProgressBar) -> &mut Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Set the number of steps between energy samples (at least 1).
    pub fn set_energy_interval(&mut self, steps: u64) -> &mut Self {
        self.energy_interval = steps.max(1);
        self
    }

    /// Install a callback run after every `update_h`, e.g. to inject a source.
    pub fn set_on_step(&mut self, hook: StepHook) -> &mut Self {
        self.on_step = Some(hook);
        self
    }

    fn max_timesteps(&self) -> Result<u64> {
        match self.end_condition {
            EndCondition::Timesteps(n) => Ok(n),
            EndCondition::SimulationTime(t) => {
                if !(t.is_finite() && t >= 0.0) {
                    return Err(Error::Config(format!("simulation time must be finite and non-negative, got {t}")));
                }
                Ok((t / self.fdtd.dt()).ceil() as u64)
            }
            EndCondition::EnergyDecay(_) => Ok(ENERGY_DECAY_MAX_STEPS),
        }
    }

    /// Run until the end condition is met.
    pub fn run(&mut self) -> Result<SimulationStats> {
        if self.state == SimulationState::Running {
            return Err(Error::Config("simulation is already running".into()));
        }
        let max_timesteps = self.max_timesteps()?;
        let decay_db = match self.end_condition {
            EndCondition::EnergyDecay(db) => Some(db.abs()),
            _ => None,
        };
        self.state = SimulationState::Running;

        let progress = if let Some(pb) = self.progress_bar.clone() {
            pb.set_length(max_timesteps);
            pb.set_position(0);
            Some(pb)
        } else if self.show_progress {
            let pb = ProgressBar::new(max_timesteps);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec})")
            {
                pb.set_style(style.progress_chars("##-"));
            }
            Some(pb)
        } else {
            None
        };

        let start_time = Instant::now();
        let mut peak_energy = 0.0f64;
        let mut timesteps_run = 0u64;
        let mut stopped = false;

        while timesteps_run < max_timesteps {
            if let Err(err) = self.step() {
                self.state = SimulationState::Stopped;
                if let Some(pb) = &progress {
                    pb.abandon_with_message(format!("Simulation stopped at timestep {timesteps_run}: {err}"));
                }
                return Err(err);
            }
            timesteps_run += 1;

            if timesteps_run % self.energy_interval == 0 {
                let energy = self.fdtd.field_energy();
                peak_energy = peak_energy.max(energy);
                if let Some(pb) = &progress {
                    pb.set_position(timesteps_run);
                }
                if let Some(db) = decay_db {
                    if peak_energy > 0.0 {
                        let decay = 10.0 * (peak_energy / energy.max(f64::MIN_POSITIVE)).log10();
                        if decay >= db {
                            if self.verbose >= 1 {
                                info!("Energy decay reached: {decay:.1} dB at timestep {timesteps_run}");
                            }
                            stopped = true;
                            break;
                        }
                    }
                }
                if self.verbose >= 2 {
                    info!("timestep {timesteps_run}: energy {energy:.6e} J");
                }
            }
        }

        if let Some(pb) = progress {
            pb.set_position(timesteps_run);
            pb.finish_with_message("Simulation complete");
        }

        let wall_time = start_time.elapsed().as_secs_f64();
        let final_energy = self.fdtd.field_energy();
        peak_energy = peak_energy.max(final_energy);

        let num_cells = self.fdtd.layout().cells();
        let speed = if wall_time > 0.0 {
            (timesteps_run as f64 * num_cells as f64) / wall_time / 1e6
        } else {
            0.0
        };

        self.state = if stopped {
            SimulationState::Stopped
        } else {
            SimulationState::Finished
        };

        let stats = SimulationStats {
            timesteps: timesteps_run,
            sim_time: timesteps_run as f64 * self.fdtd.dt(),
            wall_time,
            peak_energy,
            final_energy,
            speed_mcells_per_sec: speed,
        };

        if self.verbose >= 1 {
            info!(
                "Completed {} timesteps in {:.2}s ({:.2} MC/s)",
                stats.timesteps, stats.wall_time, stats.speed_mcells_per_sec
            );
        }

        Ok(stats)
    }

    fn step(&mut self) -> Result<()> {
        self.fdtd.update_e()?;
        self.fdtd.update_h()?;
        if let Some(hook) = self.on_step.as_mut() {
            hook(&mut self.fdtd)?;
        }
        Ok(())
    }

    /// The wrapped engine.
    pub fn fdtd(&self) -> &Fdtd {
        &self.fdtd
    }

    /// The wrapped engine, mutably.
    pub fn fdtd_mut(&mut self) -> &mut Fdtd {
        &mut self.fdtd
    }

    /// Unwrap the engine.
    pub fn into_inner(self) -> Fdtd {
        self.fdtd
    }

    /// Get the current state.
    pub fn state(&self) -> SimulationState {
        self.state
    }
}
