//! One device wired to ideal sources and resistors.
//!
//! Unknown layout: index 0 is ground, then one voltage per named node, one
//! branch current per node, then the device's internal unknowns. A node
//! terminated by a resistor keeps its branch unknown pinned at zero so the
//! layout never depends on the terminations.

use log::{debug, info, trace};

use super::newton::{NewtonDriver, NonlinearSystem};
use crate::device::{Device, DeviceInstance, DeviceMaster, DeviceOptions, SolverState};
use crate::error::{DevsimError, Result};
use crate::linalg::DenseMatrix;
use crate::ltra::{LtraInstance, LtraMaster};
use crate::netlist::Netlist;
use crate::pde::{DiodePdeInstance, PdeMaster};

/// Node names that mean ground.
pub const GROUND_NAMES: [&str; 2] = ["0", "gnd"];

/// Time dependence of an ideal voltage source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Constant voltage
    Dc(f64),
    /// Linear ramp from `from` to `to`, starting at `delay`, lasting `rise`
    Step {
        from: f64,
        to: f64,
        delay: f64,
        rise: f64,
    },
}

impl Waveform {
    /// Voltage at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        match *self {
            Self::Dc(v) => v,
            Self::Step { from, to, delay, rise } => {
                if t <= delay {
                    from
                } else if rise <= 0.0 || t >= delay + rise {
                    to
                } else {
                    from + (to - from) * (t - delay) / rise
                }
            }
        }
    }

    /// Times where the slope changes.
    pub fn corners(&self) -> Vec<f64> {
        match *self {
            Self::Dc(_) => Vec::new(),
            Self::Step { delay, rise, .. } => vec![delay, delay + rise.max(0.0)],
        }
    }
}

/// What a node is connected to besides the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    /// Ideal voltage source to ground
    Source(Waveform),
    /// Resistor to ground (ohms)
    Resistor(f64),
}

#[derive(Debug, Clone)]
struct BenchNode {
    name: String,
    termination: Termination,
}

/// One point of a DC sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    /// Swept source voltage
    pub value: f64,
    /// Current into the device at each terminal
    pub currents: Vec<f64>,
    /// Newton iterations spent on this point
    pub iterations: usize,
}

/// One accepted transient time point.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientPoint {
    pub time: f64,
    /// Voltage of every named node
    pub voltages: Vec<f64>,
    /// Current into the device at each terminal
    pub currents: Vec<f64>,
    pub iterations: usize,
}

#[derive(Debug)]
enum Master {
    Ltra(LtraMaster),
    Pde(PdeMaster),
}

impl Master {
    fn as_dyn(&mut self) -> &mut dyn DeviceMaster {
        match self {
            Self::Ltra(m) => m,
            Self::Pde(m) => m,
        }
    }

    fn instance(&self) -> &dyn DeviceInstance {
        match self {
            Self::Ltra(m) => &m.instances()[0],
            Self::Pde(m) => &m.instances()[0],
        }
    }

    fn instance_mut(&mut self) -> &mut dyn DeviceInstance {
        match self {
            Self::Ltra(m) => &mut m.instances_mut()[0],
            Self::Pde(m) => &mut m.instances_mut()[0],
        }
    }
}

/// A single device under test.
#[derive(Debug)]
pub struct Bench {
    master: Master,
    nodes: Vec<BenchNode>,
    /// Unknown index of each device terminal (0 for ground)
    terminals: Vec<usize>,
    size: usize,
    state: SolverState,
    opts: DeviceOptions,
    driver: NewtonDriver,
    x: Vec<f64>,
    sta: Vec<f64>,
    sta_prev: Vec<f64>,
    q: Vec<f64>,
    q_prev: Vec<f64>,
    dq: DenseMatrix,
    /// Multiplies every source value; zero while finding equilibrium
    source_scale: f64,
    dc_done: bool,
}

impl Bench {
    /// Wire `device` to the named nodes, one per external terminal. Every
    /// node starts tied to a 0 V source.
    pub fn new(device: Device, node_names: &[String], opts: DeviceOptions) -> Result<Self> {
        let num_ext = device.instance().num_ext_vars();
        if node_names.len() != num_ext {
            return Err(DevsimError::lid_count(
                device.instance().name(),
                "terminal node",
                num_ext,
                node_names.len(),
            ));
        }

        let mut nodes: Vec<BenchNode> = Vec::new();
        let mut terminal_nodes = Vec::with_capacity(num_ext);
        for name in node_names {
            let lower = name.to_ascii_lowercase();
            if GROUND_NAMES.contains(&lower.as_str()) {
                terminal_nodes.push(None);
                continue;
            }
            let k = match nodes.iter().position(|n| n.name == lower) {
                Some(k) => k,
                None => {
                    nodes.push(BenchNode {
                        name: lower,
                        termination: Termination::Source(Waveform::Dc(0.0)),
                    });
                    nodes.len() - 1
                }
            };
            terminal_nodes.push(Some(k));
        }

        let mut master = match device {
            Device::Ltra(inst) => Master::Ltra(LtraMaster::new(vec![inst])),
            Device::DiodePde(inst) => Master::Pde(PdeMaster::new(vec![inst])),
        };

        let num_nodes = nodes.len();
        let terminals: Vec<usize> = terminal_nodes
            .iter()
            .map(|t| t.map_or(0, |k| 1 + k))
            .collect();
        let first_int = 1 + 2 * num_nodes;
        let inst = master.instance_mut();
        let num_int = inst.num_int_vars();
        let num_sta = inst.num_state_vars();
        let size = first_int + num_int;
        let internals: Vec<usize> = (first_int..size).collect();
        let states: Vec<usize> = (0..num_sta).collect();

        inst.register_lids(&terminals, &internals)?;
        inst.register_state_lids(&states)?;
        inst.register_jac_lids(&DenseMatrix::new(size))?;
        let mut x = vec![0.0; size];
        inst.set_initial_guess(&mut x)?;

        debug!(
            "Bench for {}: {} nodes, {} unknowns, {} state variables",
            inst.name(),
            num_nodes,
            size,
            num_sta
        );

        Ok(Self {
            master,
            nodes,
            terminals,
            size,
            state: SolverState::default(),
            opts,
            driver: NewtonDriver::default(),
            x,
            sta: vec![0.0; num_sta],
            sta_prev: vec![0.0; num_sta],
            q: vec![0.0; size],
            q_prev: vec![0.0; size],
            dq: DenseMatrix::new(size),
            source_scale: 1.0,
            dc_done: false,
        })
    }

    /// Build the only device of a deck and wire it to its card nodes.
    pub fn from_netlist(netlist: &Netlist, opts: DeviceOptions) -> Result<Self> {
        if netlist.devices.len() != 1 {
            return Err(DevsimError::bench(format!(
                "deck must hold exactly one device, found {}",
                netlist.devices.len()
            )));
        }
        let nodes = netlist.devices[0].nodes.clone();
        let mut devices = Device::build_all(netlist, &opts)?;
        match devices.pop() {
            Some(device) => Self::new(device, &nodes, opts),
            None => Err(DevsimError::bench("deck holds no device")),
        }
    }

    /// Replace the Newton solver settings.
    pub fn with_driver(mut self, driver: NewtonDriver) -> Self {
        self.driver = driver;
        self
    }

    fn node_index(&self, node: &str) -> Result<usize> {
        let lower = node.to_ascii_lowercase();
        self.nodes
            .iter()
            .position(|n| n.name == lower)
            .ok_or_else(|| DevsimError::bench(format!("no node named '{}'", node)))
    }

    /// Attach `termination` to a named node.
    pub fn set_termination(&mut self, node: &str, termination: Termination) -> Result<()> {
        let k = self.node_index(node)?;
        if let Termination::Resistor(r) = termination {
            if r <= 0.0 {
                return Err(DevsimError::bench(format!("resistance on '{}' must be positive", node)));
            }
        }
        self.nodes[k].termination = termination;
        Ok(())
    }

    /// Tie a node to a constant voltage.
    pub fn set_source(&mut self, node: &str, volts: f64) -> Result<()> {
        self.set_termination(node, Termination::Source(Waveform::Dc(volts)))
    }

    /// Names of the non-ground nodes, in unknown order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Voltage of a named node.
    pub fn node_voltage(&self, node: &str) -> Result<f64> {
        Ok(self.x[1 + self.node_index(node)?])
    }

    /// Current flowing from a node into its source.
    pub fn source_current(&self, node: &str) -> Result<f64> {
        Ok(self.x[1 + self.nodes.len() + self.node_index(node)?])
    }

    /// The full solution vector.
    pub fn solution(&self) -> &[f64] {
        &self.x
    }

    /// Solver context as seen by the device.
    pub fn state(&self) -> &SolverState {
        &self.state
    }

    /// Device options.
    pub fn options(&self) -> &DeviceOptions {
        &self.opts
    }

    /// The device instance contract.
    pub fn device(&self) -> &dyn DeviceInstance {
        self.master.instance()
    }

    /// The drift-diffusion instance, if that is the device.
    pub fn pde(&self) -> Option<&DiodePdeInstance> {
        match &self.master {
            Master::Pde(m) => m.instances().first(),
            Master::Ltra(_) => None,
        }
    }

    /// The transmission line instance, if that is the device.
    pub fn ltra(&self) -> Option<&LtraInstance> {
        match &self.master {
            Master::Ltra(m) => m.instances().first(),
            Master::Pde(_) => None,
        }
    }

    /// Current into the device at each terminal.
    pub fn terminal_currents(&self) -> Vec<f64> {
        match &self.master {
            Master::Pde(m) => m
                .instances()
                .first()
                .map(|inst| inst.terminal_currents())
                .unwrap_or_default(),
            Master::Ltra(m) => m
                .instances()
                .first()
                .map(|inst| {
                    let (i1, i2) = inst.port_currents();
                    vec![i1, -i1, i2, -i2]
                })
                .unwrap_or_default(),
        }
    }

    fn node_voltages(&self) -> Vec<f64> {
        self.x[1..=self.nodes.len()].to_vec()
    }

    /// Device loads plus terminations at `self.x`-shaped `x`. The Jacobian
    /// is only assembled when `jac` is given; `dt` selects backward Euler.
    fn load(&mut self, x: &mut [f64], f: &mut [f64], jac: Option<&mut DenseMatrix>, dt: Option<f64>) -> Result<()> {
        let master = self.master.as_dyn();
        master.update_state(&self.state, &self.opts, x, &mut self.sta)?;
        if let Some(h) = dt {
            let deriv: Vec<f64> = self
                .sta
                .iter()
                .zip(&self.sta_prev)
                .map(|(now, prev)| (now - prev) / h)
                .collect();
            master.update_secondary_state(&self.state, &self.opts, &deriv)?;
        }

        self.q.fill(0.0);
        master.load_dae_vectors(&self.state, &self.opts, x, f, &mut self.q)?;
        if let Some(h) = dt {
            for ((fi, q), q_prev) in f.iter_mut().zip(&self.q).zip(&self.q_prev) {
                *fi += (q - q_prev) / h;
            }
        }

        let num_nodes = self.nodes.len();
        let t = self.state.curr_time;
        let mut jac = jac;
        if let Some(jac) = jac.as_deref_mut() {
            self.dq.clear();
            master.load_dae_matrices(&self.state, &self.opts, &mut *jac, &mut self.dq)?;
            if let Some(h) = dt {
                jac.add_scaled(&self.dq, 1.0 / h);
            }
        }

        for (k, node) in self.nodes.iter().enumerate() {
            let (v, br) = (1 + k, 1 + num_nodes + k);
            match node.termination {
                Termination::Source(wave) => {
                    f[v] += x[br];
                    f[br] += x[v] - self.source_scale * wave.value(t);
                    if let Some(jac) = jac.as_deref_mut() {
                        jac.add(v, br, 1.0);
                        jac.add(br, v, 1.0);
                    }
                }
                Termination::Resistor(r) => {
                    f[v] += x[v] / r;
                    f[br] += x[br];
                    if let Some(jac) = jac.as_deref_mut() {
                        jac.add(v, v, 1.0 / r);
                        jac.add(br, br, 1.0);
                    }
                }
            }
        }

        f[0] = x[0];
        if let Some(jac) = jac {
            for col in 0..self.size {
                jac.set(0, col, 0.0);
            }
            jac.set(0, 0, 1.0);
        }
        Ok(())
    }

    fn newton(&mut self, dt: Option<f64>) -> Result<usize> {
        let driver = self.driver;
        let mut x = std::mem::take(&mut self.x);
        let result = driver.solve(&mut BenchStep { bench: self, dt }, &mut x);
        self.x = x;
        result
    }

    /// Re-evaluate the device at the converged solution so its state,
    /// charges and currents match `x` exactly.
    fn refresh(&mut self, dt: Option<f64>) -> Result<()> {
        let mut x = std::mem::take(&mut self.x);
        let mut f = vec![0.0; self.size];
        let result = self.load(&mut x, &mut f, None, dt);
        self.x = x;
        result
    }

    fn pde_master(&mut self) -> Option<&mut PdeMaster> {
        match &mut self.master {
            Master::Pde(m) => Some(m),
            Master::Ltra(_) => None,
        }
    }

    /// Move a drift-diffusion device to the present source values,
    /// ramping its contact voltages when they change.
    fn continuation_solve(&mut self) -> Result<usize> {
        let t = self.state.curr_time;
        for (k, node) in self.nodes.iter().enumerate() {
            if let Termination::Source(wave) = node.termination {
                self.x[1 + k] = self.source_scale * wave.value(t);
            }
        }

        self.state.max_pde_continuation_steps = 1;
        let x = std::mem::take(&mut self.x);
        let (state, opts) = (&mut self.state, &self.opts);
        let changed = match &mut self.master {
            Master::Pde(m) => m.enable_continuation(state, opts, &x),
            Master::Ltra(_) => Ok(false),
        };
        self.x = x;
        let changed = changed?;

        let mut iterations = 0;
        if changed {
            let steps = self.state.max_pde_continuation_steps;
            trace!("Continuation over {} steps", steps);
            self.state.pde_continuation = true;
            for s in 1..=steps {
                if let Some(m) = self.pde_master() {
                    m.set_continuation_alpha(s as f64 / steps as f64);
                }
                match self.newton(None) {
                    Ok(n) => iterations += n,
                    Err(e) => {
                        self.state.pde_continuation = false;
                        return Err(e);
                    }
                }
            }
            self.state.pde_continuation = false;
        }
        if let Some(m) = self.pde_master() {
            m.disable_continuation();
        }
        iterations += self.newton(None)?;
        Ok(iterations)
    }

    /// Solve the DC operating point and accept it as time point 0.
    ///
    /// A drift-diffusion device is first solved at equilibrium (nonlinear
    /// Poisson, then full drift-diffusion with every source at zero) and
    /// then ramped to the applied voltages.
    pub fn dc_operating_point(&mut self) -> Result<usize> {
        self.state.dcop = true;
        self.state.curr_time = 0.0;

        let iterations = if matches!(self.master, Master::Pde(_)) {
            self.source_scale = 0.0;
            self.state.double_dcop_step = 0;
            let poisson = self.newton(None);
            let equilibrium = poisson.and_then(|n| {
                self.state.double_dcop_step = 1;
                self.newton(None).map(|m| n + m)
            });
            self.source_scale = 1.0;
            let mut iterations = equilibrium?;
            debug!("Equilibrium reached in {} Newton iterations", iterations);
            iterations += self.continuation_solve()?;
            iterations
        } else {
            self.newton(None)?
        };

        self.refresh(None)?;
        let master = self.master.as_dyn();
        master.accept_step(&mut self.state, &self.opts)?;
        self.q_prev.copy_from_slice(&self.q);
        self.sta_prev.copy_from_slice(&self.sta);
        self.dc_done = true;
        info!("DC operating point converged in {} Newton iterations", iterations);
        Ok(iterations)
    }

    /// Step the source on `node` from `start` to `stop` and record the
    /// terminal currents at every point.
    pub fn dc_sweep(&mut self, node: &str, start: f64, stop: f64, step: f64) -> Result<Vec<SweepPoint>> {
        if step == 0.0 || (stop - start) * step < 0.0 {
            return Err(DevsimError::bench(format!(
                "sweep step {} does not lead from {} to {}",
                step, start, stop
            )));
        }
        let count = ((stop - start) / step + 1e-9).floor() as usize + 1;

        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let value = start + i as f64 * step;
            self.set_source(node, value)?;
            let iterations = if i == 0 && !self.dc_done {
                self.dc_operating_point()?
            } else if matches!(self.master, Master::Pde(_)) {
                self.continuation_solve()?
            } else {
                self.newton(None)?
            };
            self.refresh(None)?;
            trace!("Sweep {} = {:.4} V: {} iterations", node, value, iterations);
            points.push(SweepPoint {
                value,
                currents: self.terminal_currents(),
                iterations,
            });
        }
        info!("DC sweep of {}: {} points", node, points.len());
        Ok(points)
    }

    /// Fixed-step backward Euler transient from the DC operating point.
    ///
    /// The step is cut to the device's largest safe step and to pending
    /// breakpoints. The LTRA time list grows by one point per accepted
    /// step and shrinks back by one whenever the device compacts.
    pub fn transient(&mut self, tstop: f64, tstep: f64) -> Result<Vec<TransientPoint>> {
        if tstep <= 0.0 || tstop <= 0.0 {
            return Err(DevsimError::bench("transient needs positive TSTOP and TSTEP"));
        }
        if !self.dc_done {
            self.dc_operating_point()?;
        }

        let mut breakpoints: Vec<f64> = self
            .nodes
            .iter()
            .filter_map(|n| match n.termination {
                Termination::Source(wave) => Some(wave.corners()),
                Termination::Resistor(_) => None,
            })
            .flatten()
            .filter(|&b| b > 0.0)
            .collect();
        breakpoints.sort_by(f64::total_cmp);

        let mut points = vec![TransientPoint {
            time: 0.0,
            voltages: self.node_voltages(),
            currents: self.terminal_currents(),
            iterations: 0,
        }];

        self.state.dcop = false;
        self.state.init_tran = true;
        let min_step = tstop * 1e-12;
        let mut t = 0.0;
        let mut total = 0;

        while tstop - t > min_step {
            let mut h = tstep
                .min(self.master.instance().max_time_step())
                .min(tstop - t);
            breakpoints.retain(|&b| b > t + min_step);
            if let Some(&b) = breakpoints.first() {
                if b < t + h {
                    h = b - t;
                }
            }

            self.state.curr_time = t + h;
            let iterations = self.newton(Some(h))?;
            self.refresh(Some(h))?;
            self.accept(&mut breakpoints)?;
            total += iterations;

            t = self.state.curr_time;
            points.push(TransientPoint {
                time: t,
                voltages: self.node_voltages(),
                currents: self.terminal_currents(),
                iterations,
            });
        }

        info!(
            "Transient to {:e} s: {} steps, {} Newton iterations",
            tstop,
            points.len() - 1,
            total
        );
        Ok(points)
    }

    fn accept(&mut self, breakpoints: &mut Vec<f64>) -> Result<()> {
        let state = &mut self.state;
        state.ltra_time_index += 1;
        state.ltra_time_points.push(state.curr_time);

        self.master.as_dyn().accept_step(state, &self.opts)?;

        if state.ltra_do_compact {
            let k = state.ltra_time_index;
            state.ltra_time_points[k - 1] = state.ltra_time_points[k];
            state.ltra_time_points.pop();
            state.ltra_time_index -= 1;
            state.ltra_do_compact = false;
            trace!("Time list compacted to {} points", state.ltra_time_points.len());
        }

        self.q_prev.copy_from_slice(&self.q);
        self.sta_prev.copy_from_slice(&self.sta);
        state.time_step_number += 1;
        state.init_tran = false;

        let mut pending = Vec::new();
        self.master.instance_mut().breakpoints(&self.state, &mut pending);
        if !pending.is_empty() {
            breakpoints.extend(pending);
            breakpoints.sort_by(f64::total_cmp);
            breakpoints.dedup();
        }
        Ok(())
    }
}

/// The bench seen as a nonlinear system at one time point.
struct BenchStep<'a> {
    bench: &'a mut Bench,
    dt: Option<f64>,
}

impl NonlinearSystem for BenchStep<'_> {
    fn size(&self) -> usize {
        self.bench.size
    }

    fn evaluate(&mut self, iter: usize, x: &mut [f64], f: &mut [f64], jac: &mut DenseMatrix) -> Result<()> {
        self.bench.state.newton_iter = iter;
        self.bench.load(x, f, Some(jac), self.dt)
    }
}
