//! Devsim - single-device test bench
//!
//! Reads a device deck and prints a setup summary of every device. A deck
//! holding a single LTRA or DiodePDE device is then wired to ideal sources
//! and solved at its DC operating point, over a DC sweep or in transient.
//!
//! # Usage
//!
//! ```bash
//! devsim line.deck --tstop 20n --tstep 0.1n --load 50
//! devsim diode.deck --sweep-start 0 --sweep-stop 0.6 --sweep-step 0.05
//! ```

use std::path::PathBuf;

use clap::Parser;
use devsim_core::{
    bench::{SweepPoint, TransientPoint},
    error::{DevsimError, Result},
    netlist, Bench, Device, DeviceOptions, NewtonDriver, Termination, Waveform,
};

/// Single-device test bench for LTRA and DiodePDE models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the device deck
    #[arg(value_name = "DECK")]
    deck: PathBuf,

    /// Transient stop time (s)
    #[arg(long, value_parser = parse_number)]
    tstop: Option<f64>,

    /// Transient time step (s)
    #[arg(long, value_parser = parse_number)]
    tstep: Option<f64>,

    /// First sweep voltage
    #[arg(long, value_parser = parse_number)]
    sweep_start: Option<f64>,

    /// Last sweep voltage
    #[arg(long, value_parser = parse_number)]
    sweep_stop: Option<f64>,

    /// Sweep increment
    #[arg(long, value_parser = parse_number, default_value_t = 0.05)]
    sweep_step: f64,

    /// Node whose source is swept (defaults to the first non-ground node)
    #[arg(long)]
    sweep_node: Option<String>,

    /// Final value of the step driving the first node in a transient
    #[arg(long, value_parser = parse_number, default_value_t = 1.0)]
    amplitude: f64,

    /// Load resistor on the far port of a transmission line (ohms)
    #[arg(long, value_parser = parse_number, default_value_t = 50.0)]
    load: f64,

    /// Let the transmission line drop redundant history points
    #[arg(long)]
    compact: bool,

    /// Maximum Newton iterations per solve
    #[arg(long, default_value_t = devsim_core::MAX_ITERATIONS)]
    max_iterations: usize,
}

fn parse_number(text: &str) -> std::result::Result<f64, String> {
    netlist::parse_value(text).ok_or_else(|| format!("'{}' is not a number", text))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let deck = netlist::parse_file(&args.deck)?;
    let opts = DeviceOptions::default().with_try_to_compact(args.compact);
    let devices = Device::build_all(&deck, &opts)?;
    for (device, def) in devices.iter().zip(&deck.devices) {
        print_summary(device, &def.nodes);
    }

    let analysis = (args.tstop.is_some() && args.tstep.is_some())
        || (args.sweep_start.is_some() && args.sweep_stop.is_some());
    if devices.len() != 1 && !analysis {
        return Ok(());
    }

    let driver = NewtonDriver::new().with_max_iterations(args.max_iterations);
    let mut bench = Bench::from_netlist(&deck, opts)?.with_driver(driver);

    if let (Some(tstop), Some(tstep)) = (args.tstop, args.tstep) {
        let nodes: Vec<String> = bench.node_names().iter().map(|s| s.to_string()).collect();
        let drive = nodes
            .first()
            .ok_or_else(|| DevsimError::bench("every device node is grounded"))?;
        bench.set_termination(
            drive,
            Termination::Source(Waveform::Step {
                from: 0.0,
                to: args.amplitude,
                delay: 0.0,
                rise: tstep,
            }),
        )?;
        if bench.ltra().is_some() {
            if let Some(far) = nodes.get(1) {
                bench.set_termination(far, Termination::Resistor(args.load))?;
            }
        }
        let points = bench.transient(tstop, tstep)?;
        print_transient(&nodes, &points);
    } else if let (Some(start), Some(stop)) = (args.sweep_start, args.sweep_stop) {
        let node = match args.sweep_node {
            Some(node) => node,
            None => bench
                .node_names()
                .first()
                .map(|s| s.to_string())
                .ok_or_else(|| DevsimError::bench("every device node is grounded"))?,
        };
        let points = bench.dc_sweep(&node, start, stop, args.sweep_step)?;
        print_sweep(&node, &points);
    } else {
        let iterations = bench.dc_operating_point()?;
        println!("DC operating point ({} iterations)", iterations);
        for name in bench.node_names() {
            println!("  V({}) = {:.6}", name, bench.node_voltage(name)?);
        }
        println!("  terminal currents: {:?}", bench.terminal_currents());
    }

    Ok(())
}

fn print_summary(device: &Device, nodes: &[String]) {
    println!("Device {}", device.instance().name());
    match device {
        Device::Ltra(line) => {
            let model = line.model();
            println!("  type:      LTRA ({:?})", model.special_case);
            println!("  impedance: {:.4} ohm", model.imped);
            println!("  delay:     {:.4e} s", model.td);
        }
        Device::DiodePde(pde) => {
            println!("  type:      DiodePDE, {} terminals", pde.electrodes().len());
            println!("  material:  {}", pde.params().bulk_material);
            println!("  mesh:      {} nodes", pde.params().nx);
            println!("  ni:        {:.4e} cm^-3", pde.intrinsic_concentration());
            println!("  Vbi:       {:.4} V", pde.built_in_potential());
        }
    }
    println!("  nodes:     {}", nodes.join(", "));
    println!();
}

fn print_transient(nodes: &[String], points: &[TransientPoint]) {
    print!("{:>14}", "time");
    for node in nodes {
        print!("{:>14}", format!("V({})", node));
    }
    println!("{:>6}", "iter");
    for p in points {
        print!("{:>14.6e}", p.time);
        for v in &p.voltages {
            print!("{:>14.6}", v);
        }
        println!("{:>6}", p.iterations);
    }
}

fn print_sweep(node: &str, points: &[SweepPoint]) {
    let terminals = points.first().map_or(0, |p| p.currents.len());
    print!("{:>12}", format!("V({})", node));
    for k in 0..terminals {
        print!("{:>14}", format!("I{}", k));
    }
    println!("{:>6}", "iter");
    for p in points {
        print!("{:>12.4}", p.value);
        for i in &p.currents {
            print!("{:>14.6e}", i);
        }
        println!("{:>6}", p.iterations);
    }
}
