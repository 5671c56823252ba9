//! DiodePDE instance parameters.

use crate::error::{DevsimError, Result};
use crate::netlist::ParamMap;

use super::REF_TEMP;

/// A parameter value plus whether the user set it.
///
/// Some physics only uses a value when it was given explicitly (the
/// scaling overrides, contact potentials, per-electrode areas).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Given<T> {
    pub value: T,
    pub given: bool,
}

impl<T: Copy> Given<T> {
    /// A default that was not given.
    pub fn default_to(value: T) -> Self {
        Self { value, given: false }
    }

    /// A value the user set.
    pub fn set(value: T) -> Self {
        Self { value, given: true }
    }

    /// The value, only if it was given.
    pub fn get(&self) -> Option<T> {
        if self.given {
            Some(self.value)
        } else {
            None
        }
    }
}

/// A user-placed electrode.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeSpec {
    /// Electrode name (`anode`, `base`, ...)
    pub name: String,
    /// `left`, `right`, `middle`/`mid`; `None` picks left for an anode and
    /// right otherwise
    pub side: Option<String>,
    /// Location (cm), used by middle electrodes
    pub location: f64,
    /// Contact area (cm^2); `None` uses the device `AREA`
    pub area: Option<f64>,
}

impl ElectrodeSpec {
    /// An electrode on the given side.
    pub fn new(name: &str, side: &str) -> Self {
        Self {
            name: name.to_string(),
            side: Some(side.to_string()),
            location: 0.0,
            area: None,
        }
    }

    /// Set the location.
    pub fn with_location(mut self, location: f64) -> Self {
        self.location = location;
        self
    }

    /// Set the contact area.
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }
}

/// Parameters of a 1-D drift-diffusion device.
#[derive(Debug, Clone)]
pub struct DiodePdeParams {
    /// Anode contact potential (V)
    pub anode_bc: Given<f64>,
    /// Cathode contact potential (V)
    pub cathode_bc: Given<f64>,
    /// Emitter contact potential (V)
    pub emitter_bc: Given<f64>,
    /// Collector contact potential (V)
    pub collector_bc: Given<f64>,
    /// Base contact potential (V)
    pub base_bc: Given<f64>,
    /// Base electrode location (cm)
    pub base_location: f64,
    /// Device cross-section area (cm^2)
    pub area: f64,
    pub anode_area: Given<f64>,
    pub cathode_area: Given<f64>,
    pub emitter_area: Given<f64>,
    pub collector_area: Given<f64>,
    pub base_area: Given<f64>,
    /// Length scale override (cm)
    pub x0: Given<f64>,
    /// Density scale override (cm^-3)
    pub c0: Given<f64>,
    /// Time scale override (s)
    pub t0: Given<f64>,
    /// Scale densities to a fraction of the peak doping
    pub scale_density_to_max_doping: bool,
    /// Fraction of the peak doping used as the density scale
    pub density_scalar_fraction: f64,
    /// Acceptor concentration (cm^-3)
    pub na: f64,
    /// Donor concentration (cm^-3)
    pub nd: f64,
    /// Graded junction width (cm)
    pub wj: Given<f64>,
    /// Device temperature (K)
    pub temp: f64,
    /// Device length (cm), also the width unless `W` is given
    pub length: f64,
    /// Device width (cm), the extent of the mesh
    pub width: Given<f64>,
    /// Largest applied-voltage step per continuation step (V)
    pub max_volt_delta: f64,
    /// Linearly graded junction instead of a step
    pub graded: bool,
    /// Mobility model name
    pub mobility_model: String,
    /// Apply high-field mobility saturation
    pub field_dependent: bool,
    /// Bulk material name
    pub bulk_material: String,
    /// Add displacement current to the terminal currents
    pub displacement_current: bool,
    /// Include Auger recombination
    pub auger: bool,
    /// Include SRH recombination
    pub srh: bool,
    /// Limit terminal voltage steps
    pub voltage_limit: bool,
    /// Number of mesh points
    pub nx: usize,
    /// Explicit electrodes; empty selects the default layout
    pub electrodes: Vec<ElectrodeSpec>,
}

impl Default for DiodePdeParams {
    fn default() -> Self {
        Self {
            anode_bc: Given::default_to(0.5),
            cathode_bc: Given::default_to(0.0),
            emitter_bc: Given::default_to(0.5),
            collector_bc: Given::default_to(0.0),
            base_bc: Given::default_to(0.0),
            base_location: 0.5e-3,
            area: 1.0,
            anode_area: Given::default_to(0.0),
            cathode_area: Given::default_to(0.0),
            emitter_area: Given::default_to(0.0),
            collector_area: Given::default_to(0.0),
            base_area: Given::default_to(0.0),
            x0: Given::default_to(1.0e-7),
            c0: Given::default_to(1.0e15),
            t0: Given::default_to(1.0e-6),
            scale_density_to_max_doping: true,
            density_scalar_fraction: 0.1,
            na: 1.0e15,
            nd: 1.0e15,
            wj: Given::default_to(1.0e-4),
            temp: REF_TEMP,
            length: 1.0e-3,
            width: Given::default_to(1.0e-3),
            max_volt_delta: 0.025,
            graded: false,
            mobility_model: "arora".to_string(),
            field_dependent: false,
            bulk_material: "si".to_string(),
            displacement_current: false,
            auger: true,
            srh: true,
            voltage_limit: false,
            nx: 11,
            electrodes: Vec::new(),
        }
    }
}

impl DiodePdeParams {
    /// Create parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read parameters from an instance card.
    pub fn from_params(device: &str, params: &ParamMap) -> Result<Self> {
        let mut p = Self::default();

        let given = |key: &str, slot: &mut Given<f64>| -> Result<()> {
            if let Some(v) = params.number(device, key)? {
                *slot = Given::set(v);
            }
            Ok(())
        };
        given("ANODE.BC", &mut p.anode_bc)?;
        given("CATHODE.BC", &mut p.cathode_bc)?;
        given("EMITTER.BC", &mut p.emitter_bc)?;
        given("COLLECTOR.BC", &mut p.collector_bc)?;
        given("BASE.BC", &mut p.base_bc)?;
        given("ANODE.AREA", &mut p.anode_area)?;
        given("CATHODE.AREA", &mut p.cathode_area)?;
        given("EMITTER.AREA", &mut p.emitter_area)?;
        given("COLLECTOR.AREA", &mut p.collector_area)?;
        given("BASE.AREA", &mut p.base_area)?;
        given("X0", &mut p.x0)?;
        given("C0", &mut p.c0)?;
        given("T0", &mut p.t0)?;
        given("WJ", &mut p.wj)?;
        given("W", &mut p.width)?;

        let number = |key: &str, slot: &mut f64| -> Result<()> {
            if let Some(v) = params.number(device, key)? {
                *slot = v;
            }
            Ok(())
        };
        number("BASE.LOC", &mut p.base_location)?;
        number("AREA", &mut p.area)?;
        number("DENSITYSCALARFRACTION", &mut p.density_scalar_fraction)?;
        number("NA", &mut p.na)?;
        number("ND", &mut p.nd)?;
        number("TEMP", &mut p.temp)?;
        number("L", &mut p.length)?;
        number("MAXVOLTDELTA", &mut p.max_volt_delta)?;

        let flag = |key: &str, slot: &mut bool| -> Result<()> {
            if let Some(v) = params.flag(device, key)? {
                *slot = v;
            }
            Ok(())
        };
        flag("SCALEDENSITYTOMAXDOPING", &mut p.scale_density_to_max_doping)?;
        flag("GRADED", &mut p.graded)?;
        flag("FIELDDEP", &mut p.field_dependent)?;
        flag("DISPLCUR", &mut p.displacement_current)?;
        flag("AUGER", &mut p.auger)?;
        flag("SRH", &mut p.srh)?;
        flag("VOLTLIM", &mut p.voltage_limit)?;

        if let Some(model) = params.text(device, "MOBMODEL")? {
            p.mobility_model = model;
        }
        if let Some(material) = params.text(device, "BULKMATERIAL")? {
            p.bulk_material = material;
        }

        if let Some(nx) = params.number(device, "NX")? {
            if nx < 3.0 || nx.fract() != 0.0 {
                return Err(DevsimError::invalid_parameter(
                    device,
                    "NX",
                    format!("need an integer of at least 3, got {}", nx),
                ));
            }
            p.nx = nx as usize;
        }

        p.validate(device)?;
        Ok(p)
    }

    /// Check values that would make the mesh or scaling meaningless.
    pub fn validate(&self, device: &str) -> Result<()> {
        if self.nx < 3 {
            return Err(DevsimError::invalid_parameter(device, "NX", "need at least 3 mesh points"));
        }
        if self.width() <= 0.0 {
            return Err(DevsimError::invalid_parameter(device, "W", "device width must be positive"));
        }
        if self.temp <= 0.0 {
            return Err(DevsimError::invalid_parameter(device, "TEMP", "temperature must be positive"));
        }
        if self.max_volt_delta <= 0.0 {
            return Err(DevsimError::invalid_parameter(
                device,
                "MAXVOLTDELTA",
                "voltage step must be positive",
            ));
        }
        Ok(())
    }

    /// Mesh extent: `W` if given, else `L`.
    pub fn width(&self) -> f64 {
        if self.width.given {
            self.width.value
        } else {
            self.length
        }
    }

    /// Set the acceptor concentration.
    pub fn with_na(mut self, na: f64) -> Self {
        self.na = na;
        self
    }

    /// Set the donor concentration.
    pub fn with_nd(mut self, nd: f64) -> Self {
        self.nd = nd;
        self
    }

    /// Set the number of mesh points.
    pub fn with_nx(mut self, nx: usize) -> Self {
        self.nx = nx;
        self
    }

    /// Set the device length (and width, unless `W` was given).
    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    /// Set the device width explicitly.
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Given::set(width);
        self
    }

    /// Set the device temperature.
    pub fn with_temp(mut self, temp: f64) -> Self {
        self.temp = temp;
        self
    }

    /// Set the cross-section area.
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = area;
        self
    }

    /// Set the base electrode location.
    pub fn with_base_location(mut self, location: f64) -> Self {
        self.base_location = location;
        self
    }

    /// Select a mobility model by name.
    pub fn with_mobility_model(mut self, model: &str) -> Self {
        self.mobility_model = model.to_ascii_lowercase();
        self
    }

    /// Select the bulk material by name.
    pub fn with_bulk_material(mut self, material: &str) -> Self {
        self.bulk_material = material.to_ascii_lowercase();
        self
    }

    /// Use a linearly graded junction.
    pub fn with_graded(mut self, graded: bool) -> Self {
        self.graded = graded;
        self
    }

    /// Enable high-field mobility.
    pub fn with_field_dependent(mut self, enabled: bool) -> Self {
        self.field_dependent = enabled;
        self
    }

    /// Enable displacement current.
    pub fn with_displacement_current(mut self, enabled: bool) -> Self {
        self.displacement_current = enabled;
        self
    }

    /// Enable or disable the recombination terms.
    pub fn with_recombination(mut self, srh: bool, auger: bool) -> Self {
        self.srh = srh;
        self.auger = auger;
        self
    }

    /// Enable terminal voltage limiting.
    pub fn with_voltage_limit(mut self, enabled: bool) -> Self {
        self.voltage_limit = enabled;
        self
    }

    /// Set the largest continuation voltage step.
    pub fn with_max_volt_delta(mut self, delta: f64) -> Self {
        self.max_volt_delta = delta;
        self
    }

    /// Add an explicit electrode.
    pub fn with_electrode(mut self, spec: ElectrodeSpec) -> Self {
        self.electrodes.push(spec);
        self
    }

    /// Contact potential override for a named electrode.
    pub fn contact_potential(&self, electrode: &str) -> Option<f64> {
        self.named(electrode, |p| {
            [p.anode_bc, p.cathode_bc, p.emitter_bc, p.collector_bc, p.base_bc]
        })
    }

    /// Area of a named electrode, defaulting to `AREA`.
    pub fn electrode_area(&self, electrode: &str) -> f64 {
        self.named(electrode, |p| {
            [p.anode_area, p.cathode_area, p.emitter_area, p.collector_area, p.base_area]
        })
        .unwrap_or(self.area)
    }

    fn named(&self, electrode: &str, slots: impl Fn(&Self) -> [Given<f64>; 5]) -> Option<f64> {
        let slots = slots(self);
        let index = match electrode.to_ascii_lowercase().as_str() {
            "anode" => 0,
            "cathode" => 1,
            "emitter" => 2,
            "collector" => 3,
            "base" => 4,
            _ => return None,
        };
        slots[index].get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = DiodePdeParams::default();
        assert_eq!(p.nx, 11);
        assert_eq!(p.width(), 1.0e-3);
        assert_eq!(p.mobility_model, "arora");
        assert!(p.srh && p.auger);
        assert!(!p.anode_bc.given);
        assert_eq!(p.contact_potential("anode"), None);
        assert_eq!(p.electrode_area("anode"), 1.0);
    }

    #[test]
    fn test_from_params() {
        let map = ParamMap::new()
            .with_number("NA", 1e17)
            .with_number("anode.bc", 0.7)
            .with_number("BASE.AREA", 2e-4)
            .with_number("L", 5e-4)
            .with_number("nx", 21.0)
            .with_text("mobmodel", "CARR")
            .with_text("graded", "yes");
        let p = DiodePdeParams::from_params("YD1", &map).unwrap();
        assert_eq!(p.na, 1e17);
        assert_eq!(p.contact_potential("ANODE"), Some(0.7));
        assert_eq!(p.electrode_area("base"), 2e-4);
        assert_eq!(p.electrode_area("collector"), 1.0);
        // L sets the width when W is absent
        assert_eq!(p.width(), 5e-4);
        assert_eq!(p.nx, 21);
        assert_eq!(p.mobility_model, "carr");
        assert!(p.graded);
    }

    #[test]
    fn test_explicit_width_wins() {
        let map = ParamMap::new().with_number("L", 5e-4).with_number("W", 2e-4);
        let p = DiodePdeParams::from_params("YD1", &map).unwrap();
        assert_eq!(p.width(), 2e-4);
    }

    #[test]
    fn test_bad_mesh_size() {
        let map = ParamMap::new().with_number("NX", 2.5);
        assert!(DiodePdeParams::from_params("YD1", &map).is_err());
        assert!(DiodePdeParams::default().with_nx(2).validate("YD1").is_err());
    }
}
