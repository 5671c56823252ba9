//! Electrode records and the mapping of terminals onto mesh nodes.
//!
//! Every external node of a DiodePDE instance is an electrode sitting on
//! one mesh node. An electrode on the first or last node is an *edge*
//! contact: V, n and p all take Dirichlet values there. Any other electrode
//! is an *internal* contact: V and the majority carrier are fixed while the
//! minority carrier keeps its continuity equation.

use std::fmt;

use crate::error::{DevsimError, Result};

use super::mesh::{Doping, Mesh};
use super::params::{DiodePdeParams, ElectrodeSpec};

/// Majority carrier at an electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierType {
    /// Positive net doping
    NType,
    /// Zero or negative net doping
    PType,
}

impl fmt::Display for CarrierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NType => f.write_str("ntype"),
            Self::PType => f.write_str("ptype"),
        }
    }
}

/// One contact between the mesh and the circuit.
///
/// Voltages are held in scaled units once the instance has been scaled;
/// currents are always in amperes.
#[derive(Debug, Clone, PartialEq)]
pub struct Electrode {
    /// Electrode name (`anode`, `cathode`, `base`, ...)
    pub name: String,
    /// Mesh node the electrode sits on
    pub mesh_index: usize,
    /// Interior neighbour used for the one-sided current stencil
    pub neighbor: usize,
    /// Contact area
    pub area: f64,
    /// Sits on the first or last mesh node
    pub edge: bool,
    /// Majority carrier at the contact
    pub carrier: CarrierType,

    /// Potential boundary value (applied plus built-in)
    pub v_bc: f64,
    /// Built-in (equilibrium) potential
    pub v_equ: f64,
    /// `v_equ` came from a user `*.BC` parameter
    pub v_equ_given: bool,
    /// Electron density boundary value
    pub n_bc: f64,
    /// Hole density boundary value
    pub p_bc: f64,

    /// Applied circuit voltage
    pub v_ckt: f64,
    /// Applied voltage at the start of a continuation
    pub v_ckt_old: f64,
    /// Target applied voltage of a continuation
    pub v_ckt_final: f64,
    /// Applied voltage before limiting
    pub v_ckt_orig: f64,
    /// `final - old`
    pub v_ckt_delta: f64,
    /// Per-step voltage increment
    pub v_ckt_delta_c: f64,
    /// Applied voltage at the current continuation alpha
    pub v_ckt_ramp: f64,
    /// Applied voltage seen by the last inner solve (two-level coupling)
    pub v_ckt_inner: f64,

    /// Terminal current into the device
    pub current: f64,
    /// Electron contribution
    pub elec_current: f64,
    /// Hole contribution
    pub hole_current: f64,
    /// Displacement contribution
    pub displ_current: f64,
    /// `dI/dx` for the mesh unknowns: (local column, value)
    pub di_dx: Vec<(usize, f64)>,
}

impl Electrode {
    fn new(name: &str, mesh_index: usize, neighbor: usize, area: f64, last: usize, carrier: CarrierType) -> Self {
        Self {
            name: name.to_string(),
            mesh_index,
            neighbor,
            area,
            edge: mesh_index == 0 || mesh_index == last,
            carrier,
            v_bc: 0.0,
            v_equ: 0.0,
            v_equ_given: false,
            n_bc: 0.0,
            p_bc: 0.0,
            v_ckt: 0.0,
            v_ckt_old: 0.0,
            v_ckt_final: 0.0,
            v_ckt_orig: 0.0,
            v_ckt_delta: 0.0,
            v_ckt_delta_c: 0.0,
            v_ckt_ramp: 0.0,
            v_ckt_inner: 0.0,
            current: 0.0,
            elec_current: 0.0,
            hole_current: 0.0,
            displ_current: 0.0,
            di_dx: Vec::new(),
        }
    }

    /// Lower of the electrode and neighbour indices: the mesh edge whose
    /// flux leaves through this contact.
    pub fn edge_index(&self) -> usize {
        self.mesh_index.min(self.neighbor)
    }

    /// +1 when the neighbour lies to the right, -1 otherwise.
    pub fn flux_sign(&self) -> f64 {
        if self.neighbor > self.mesh_index {
            1.0
        } else {
            -1.0
        }
    }

    /// Weights of the (electron, hole) fluxes in the terminal current.
    /// Internal contacts only pass their majority carrier.
    pub fn carrier_weights(&self) -> (f64, f64) {
        match (self.edge, self.carrier) {
            (true, _) => (1.0, 1.0),
            (false, CarrierType::NType) => (1.0, 0.0),
            (false, CarrierType::PType) => (0.0, 1.0),
        }
    }

    /// Terminal current without the displacement term.
    pub fn conduction_current(&self) -> f64 {
        let (wn, wp) = self.carrier_weights();
        wn * self.elec_current + wp * self.hole_current
    }

    /// Every potential that changes units with the voltage scale.
    pub(super) fn voltages_mut(&mut self) -> [&mut f64; 10] {
        [
            &mut self.v_bc,
            &mut self.v_equ,
            &mut self.v_ckt,
            &mut self.v_ckt_old,
            &mut self.v_ckt_final,
            &mut self.v_ckt_orig,
            &mut self.v_ckt_delta,
            &mut self.v_ckt_delta_c,
            &mut self.v_ckt_ramp,
            &mut self.v_ckt_inner,
        ]
    }
}

/// Place the electrodes of an instance with `num_nodes` external nodes.
///
/// Explicit electrode specifications win; otherwise two nodes give
/// `[cathode, anode]` and three give `[collector, base, emitter]`.
pub fn layout(
    device: &str,
    num_nodes: usize,
    mesh: &Mesh,
    doping: &Doping,
    params: &DiodePdeParams,
) -> Result<Vec<Electrode>> {
    if num_nodes > 3 {
        return Err(DevsimError::TooManyTerminals {
            device: device.to_string(),
            count: num_nodes,
        });
    }
    if num_nodes < 2 {
        return Err(DevsimError::invalid_parameter(
            device,
            "NODES",
            format!("need 2 or 3 external nodes, got {}", num_nodes),
        ));
    }

    let last = mesh.last();
    let carrier_at = |i: usize| {
        if doping.net[i] > 0.0 {
            CarrierType::NType
        } else {
            CarrierType::PType
        }
    };
    let build = |name: &str, index: usize, neighbor: usize| {
        Electrode::new(
            name,
            index,
            neighbor,
            params.electrode_area(name),
            last,
            carrier_at(index),
        )
    };

    if params.electrodes.is_empty() {
        let electrodes = if num_nodes == 2 {
            vec![build("cathode", last, last - 1), build("anode", 0, 1)]
        } else {
            let (base, neighbor) = middle(mesh, params.base_location);
            vec![
                build("collector", last, last - 1),
                build("base", base, neighbor),
                build("emitter", 0, 1),
            ]
        };
        check_slots(device, last, &electrodes)?;
        return Ok(electrodes);
    }

    if params.electrodes.len() > 3 {
        return Err(DevsimError::TooManyTerminals {
            device: device.to_string(),
            count: params.electrodes.len(),
        });
    }
    if params.electrodes.len() != num_nodes {
        return Err(DevsimError::invalid_parameter(
            device,
            "NODES",
            format!(
                "{} electrodes specified for {} external nodes",
                params.electrodes.len(),
                num_nodes
            ),
        ));
    }

    let mut electrodes = Vec::with_capacity(num_nodes);
    for spec in &params.electrodes {
        let (index, neighbor) = place(device, spec, mesh)?;
        let mut electrode = build(&spec.name, index, neighbor);
        if let Some(area) = spec.area {
            electrode.area = area;
        }
        electrodes.push(electrode);
    }
    check_slots(device, last, &electrodes)?;
    Ok(electrodes)
}

/// Mesh node and neighbour for an explicit electrode.
fn place(device: &str, spec: &ElectrodeSpec, mesh: &Mesh) -> Result<(usize, usize)> {
    let last = mesh.last();
    let side = match &spec.side {
        Some(side) => side.to_ascii_lowercase(),
        None if spec.name.eq_ignore_ascii_case("anode") => "left".to_string(),
        None => "right".to_string(),
    };
    match side.as_str() {
        "left" => Ok((0, 1)),
        "right" => Ok((last, last - 1)),
        "middle" | "mid" => Ok(middle(mesh, spec.location)),
        _ => Err(DevsimError::UnknownElectrodeSide {
            device: device.to_string(),
            electrode: spec.name.clone(),
            side,
        }),
    }
}

/// Node nearest `location`, looking left for its neighbour.
fn middle(mesh: &Mesh, location: f64) -> (usize, usize) {
    let index = mesh.nearest(location);
    if index == 0 {
        (0, 1)
    } else {
        (index, index - 1)
    }
}

fn check_slots(device: &str, last: usize, electrodes: &[Electrode]) -> Result<()> {
    for (k, electrode) in electrodes.iter().enumerate() {
        if electrodes[..k]
            .iter()
            .any(|other| other.mesh_index == electrode.mesh_index)
        {
            return Err(DevsimError::ElectrodeSlotInUse {
                device: device.to_string(),
                electrode: electrode.name.clone(),
                mesh_index: electrode.mesh_index,
            });
        }
    }
    for end in [0, last] {
        if !electrodes.iter().any(|e| e.mesh_index == end) {
            return Err(DevsimError::invalid_parameter(
                device,
                "NODES",
                format!("mesh node {} needs an electrode", end),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(params: &DiodePdeParams) -> (Mesh, Doping) {
        let mesh = Mesh::uniform(params.nx, params.width());
        let doping = Doping::step("YD1", &mesh, params.na, params.nd).unwrap();
        (mesh, doping)
    }

    #[test]
    fn test_two_terminal_default_layout() {
        let params = DiodePdeParams::default();
        let (mesh, doping) = setup(&params);
        let e = layout("YD1", 2, &mesh, &doping, &params).unwrap();
        assert_eq!(e.len(), 2);
        assert_eq!(e[0].name, "cathode");
        assert_eq!(e[0].mesh_index, 10);
        assert_eq!(e[0].neighbor, 9);
        assert_eq!(e[1].name, "anode");
        assert_eq!(e[1].mesh_index, 0);
        assert!(e.iter().all(|e| e.edge));
        // n side on the left
        assert_eq!(e[1].carrier, CarrierType::NType);
        assert_eq!(e[0].carrier, CarrierType::PType);
        assert_eq!(e[1].flux_sign(), 1.0);
        assert_eq!(e[0].edge_index(), 9);
    }

    #[test]
    fn test_three_terminal_default_layout() {
        let params = DiodePdeParams::default().with_base_location(0.31e-3);
        let (mesh, doping) = setup(&params);
        let e = layout("YQ1", 3, &mesh, &doping, &params).unwrap();
        let names: Vec<_> = e.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["collector", "base", "emitter"]);
        assert_eq!(e[1].mesh_index, mesh.nearest(0.31e-3));
        assert_eq!(e[1].mesh_index, 3);
        assert_eq!(e[1].neighbor, 2);
        assert!(!e[1].edge);
        assert_eq!(e[1].flux_sign(), -1.0);
    }

    #[test]
    fn test_explicit_electrodes() {
        let params = DiodePdeParams::default()
            .with_electrode(ElectrodeSpec::new("anode", "right").with_area(2.0))
            .with_electrode(ElectrodeSpec::new("cathode", "LEFT"));
        let (mesh, doping) = setup(&params);
        let e = layout("YD1", 2, &mesh, &doping, &params).unwrap();
        assert_eq!(e[0].mesh_index, 10);
        assert_eq!(e[0].area, 2.0);
        assert_eq!(e[1].mesh_index, 0);
        assert_eq!(e[1].area, 1.0);
    }

    #[test]
    fn test_layout_errors() {
        let params = DiodePdeParams::default();
        let (mesh, doping) = setup(&params);
        assert!(matches!(
            layout("YD1", 4, &mesh, &doping, &params),
            Err(DevsimError::TooManyTerminals { count: 4, .. })
        ));

        let twice = DiodePdeParams::default()
            .with_electrode(ElectrodeSpec::new("anode", "left"))
            .with_electrode(ElectrodeSpec::new("cathode", "left"));
        assert!(matches!(
            layout("YD1", 2, &mesh, &doping, &twice),
            Err(DevsimError::ElectrodeSlotInUse { mesh_index: 0, .. })
        ));

        let sideways = DiodePdeParams::default()
            .with_electrode(ElectrodeSpec::new("anode", "top"))
            .with_electrode(ElectrodeSpec::new("cathode", "right"));
        assert!(matches!(
            layout("YD1", 2, &mesh, &doping, &sideways),
            Err(DevsimError::UnknownElectrodeSide { .. })
        ));
    }
}
