//! Carrier mobility models.
//!
//! - Analytic (Caughey-Thomas): doping and temperature only
//! - Arora: doping and temperature only
//! - Carr: adds carrier-carrier scattering, so it depends on the local
//!   electron and hole densities
//!
//! Optional high-field saturation is applied on top of any model. Inputs
//! that the solver differentiates (densities and field) are generic over
//! [`DualNum`]; doping and temperature are plain `f64`.

use num_dual::DualNum;

use crate::error::{DevsimError, Result};

use super::material::Material;
use super::REF_TEMP;

/// Low-field mobility model selected by `MOBMODEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobilityModel {
    /// Caughey-Thomas doping dependence
    Analytic,
    /// Arora doping and temperature dependence
    Arora,
    /// Carr carrier-carrier scattering
    Carr,
}

impl MobilityModel {
    /// Look up a model by (case-insensitive) name.
    pub fn parse(name: &str, material: Material) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "analytic" | "caughey-thomas" => Ok(Self::Analytic),
            "arora" => Ok(Self::Arora),
            "carr" => Ok(Self::Carr),
            other => Err(DevsimError::UnknownMobilityModel {
                model: other.to_string(),
                material: material.name().to_string(),
            }),
        }
    }

    /// Lower-case model name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analytic => "analytic",
            Self::Arora => "arora",
            Self::Carr => "carr",
        }
    }
}

/// Electron or hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Electron,
    Hole,
}

/// Where a mobility is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct MobilityPoint<D> {
    /// Total doping magnitude (cm^-3), never zero
    pub doping: f64,
    /// Electron density (cm^-3)
    pub n: D,
    /// Hole density (cm^-3)
    pub p: D,
    /// Field magnitude parallel to the current (V/cm)
    pub epar: D,
    /// Lattice temperature (K)
    pub temp: f64,
}

#[derive(Debug, Clone, Copy)]
struct CaugheyThomas {
    mu_min: f64,
    mu_max: f64,
    nref: f64,
    nu: f64,
    xi: f64,
    alpha: f64,
}

impl CaugheyThomas {
    fn eval(&self, doping: f64, t: f64) -> f64 {
        self.mu_min
            + (self.mu_max * t.powf(self.nu) - self.mu_min)
                / (1.0 + t.powf(self.xi) * (doping / self.nref).powf(self.alpha))
    }
}

#[derive(Debug, Clone, Copy)]
struct Arora {
    mu1: f64,
    mu2: f64,
    a: f64,
    c: f64,
    e1: f64,
    e2: f64,
    e3: f64,
    e4: f64,
}

impl Arora {
    fn eval(&self, doping: f64, t: f64) -> f64 {
        let alpha = self.a * t.powf(self.e4);
        self.mu1 * t.powf(self.e1)
            + self.mu2 * t.powf(self.e2) / (1.0 + (doping / self.c * t.powf(self.e3)).powf(alpha))
    }
}

#[derive(Debug, Clone, Copy)]
struct Carr {
    al: f64,
    bl: f64,
    ai: f64,
    bi: f64,
}

impl Carr {
    fn eval<D: DualNum<f64> + Copy>(&self, point: &MobilityPoint<D>) -> D {
        let temp = point.temp;
        let n_dop = point.doping;
        let t15 = temp.powf(1.5);
        let t2 = temp * temp;

        let lattice = self.al * (temp / REF_TEMP).powf(self.bl);
        let impurity = (self.ai * t15 / n_dop)
            * ((1.0 + self.bi * t2 / n_dop).ln() - self.bi * t2 / (n_dop + self.bi * t2));

        let nn = nonzero_magnitude(point.n);
        let pp = nonzero_magnitude(point.p);
        let pn = nn * pp;
        let log_term = (pn.powf(-1.0 / 3.0) * (8.28e8 * t2) + 1.0).ln();
        let carrier = pn.sqrt().recip() * (2.0e17 * t15) / log_term;

        let x = ((carrier + impurity) * (6.0 * lattice) / (carrier * impurity)).sqrt();
        (((x / 1.68).powf(1.43) + 1.0).recip() * 1.025 - 0.025) * lattice
    }
}

#[derive(Debug, Clone, Copy)]
enum LowField {
    CaugheyThomas(CaugheyThomas),
    Arora(Arora),
    Carr(Carr),
}

#[derive(Debug, Clone, Copy)]
enum HighField {
    /// mu / (1 + mu E / vsat)
    Saturating { vsat: f64 },
    /// (mu + (vsat / E)(E / E0)^4) / (1 + (E / E0)^4)
    Barnes { vsat: f64, e0: f64 },
    Unchanged,
}

impl HighField {
    fn apply<D: DualNum<f64> + Copy>(&self, mu: D, epar: D) -> D {
        match *self {
            Self::Saturating { vsat } => mu / (mu * epar / vsat + 1.0),
            Self::Barnes { vsat, e0 } => {
                let r4 = (epar / e0).powi(4);
                (mu + epar.recip() * vsat * r4) / (r4 + 1.0)
            }
            Self::Unchanged => mu,
        }
    }
}

/// Resolved mobility tables for one material and model.
#[derive(Debug, Clone)]
pub struct Mobility {
    model: MobilityModel,
    material: Material,
    field_dependent: bool,
    electron: LowField,
    hole: LowField,
    electron_field: HighField,
    hole_field: HighField,
}

impl Mobility {
    /// Resolve tables; fails if the model is not tabulated for `material`.
    pub fn new(model: MobilityModel, material: Material, field_dependent: bool) -> Result<Self> {
        let (electron, hole) = low_field_tables(model, material).ok_or_else(|| {
            DevsimError::UnknownMobilityModel {
                model: model.name().to_string(),
                material: material.name().to_string(),
            }
        })?;
        let (electron_field, hole_field) = high_field_tables(material);
        Ok(Self {
            model,
            material,
            field_dependent,
            electron,
            hole,
            electron_field,
            hole_field,
        })
    }

    /// Selected model.
    pub fn model(&self) -> MobilityModel {
        self.model
    }

    /// Material the tables belong to.
    pub fn material(&self) -> Material {
        self.material
    }

    /// Mobility (cm^2/Vs) of `carrier` at `point`.
    pub fn eval<D: DualNum<f64> + Copy>(&self, carrier: Carrier, point: &MobilityPoint<D>) -> D {
        let (low, high) = match carrier {
            Carrier::Electron => (&self.electron, &self.electron_field),
            Carrier::Hole => (&self.hole, &self.hole_field),
        };
        let t = point.temp / REF_TEMP;
        let mu = match low {
            LowField::CaugheyThomas(table) => D::from(table.eval(point.doping, t)),
            LowField::Arora(table) => D::from(table.eval(point.doping, t)),
            LowField::Carr(table) => table.eval(point),
        };
        if self.field_dependent && point.epar.re() > 0.0 {
            high.apply(mu, point.epar)
        } else {
            mu
        }
    }
}

fn nonzero_magnitude<D: DualNum<f64> + Copy>(x: D) -> D {
    let re = x.re();
    if re == 0.0 {
        D::from(1.0)
    } else if re < 0.0 {
        -x
    } else {
        x
    }
}

fn ct(mu_min: f64, mu_max: f64, nref: f64, nu: f64, xi: f64, alpha: f64) -> LowField {
    LowField::CaugheyThomas(CaugheyThomas {
        mu_min,
        mu_max,
        nref,
        nu,
        xi,
        alpha,
    })
}

#[allow(clippy::too_many_arguments)]
fn arora(mu1: f64, mu2: f64, a: f64, c: f64, e1: f64, e2: f64, e3: f64, e4: f64) -> LowField {
    LowField::Arora(Arora {
        mu1,
        mu2,
        a,
        c,
        e1,
        e2,
        e3,
        e4,
    })
}

fn carr(al: f64, bl: f64, ai: f64, bi: f64) -> LowField {
    LowField::Carr(Carr { al, bl, ai, bi })
}

/// (electron, hole) low-field tables.
fn low_field_tables(model: MobilityModel, material: Material) -> Option<(LowField, LowField)> {
    use Material::*;
    let tables = match (model, material) {
        (MobilityModel::Analytic, Si) => (
            ct(55.24, 1429.23, 1.072e17, -2.3, -3.8, 0.733),
            ct(49.7, 479.37, 1.606e17, -2.2, -3.7, 0.70),
        ),
        (MobilityModel::Analytic, GaAs) => (
            ct(0.0, 8500.0, 1.69e17, -1.0, 0.0, 0.436),
            ct(0.0, 400.0, 2.75e17, -2.1, 0.0, 0.395),
        ),
        (MobilityModel::Analytic, SiO2) => (
            ct(10.0, 20.0, 1.072e17, -2.3, -3.8, 0.733),
            ct(1.0e-5, 1.0e-5, 1.606e17, -2.2, -3.7, 0.70),
        ),
        (MobilityModel::Analytic, InAlAs) | (MobilityModel::Analytic, InP) => (
            ct(497.0, 2.41e4, 1.0e17, 0.0, 0.0, 1.0),
            ct(0.0, 480.0, 1.0e30, 0.0, 0.0, 1.0),
        ),
        (MobilityModel::Analytic, InGaAs) => (
            ct(4000.0, 2.73e4, 3.63e17, 0.0, 0.0, 1.0),
            ct(0.0, 480.0, 1.0e30, 0.0, 0.0, 1.0),
        ),
        (MobilityModel::Analytic, InGaP) => (
            ct(0.95, 200.0, 1.0e17, 0.0, 0.0, 1.0),
            ct(0.0, 150.0, 1.0e30, 0.0, 0.0, 1.0),
        ),
        (MobilityModel::Arora, Si) => (
            arora(88.0, 1252.0, 0.88, 1.26e17, -0.57, -2.33, 2.4, -0.146),
            arora(54.3, 407.0, 0.88, 2.35e17, -0.57, -2.33, 2.4, -0.146),
        ),
        (MobilityModel::Arora, GaAs) => (
            arora(8.5e3, 0.0, 0.0, 1.26e17, -0.57, 0.0, 0.0, 0.0),
            arora(400.0, 0.0, 0.0, 2.35e17, 0.0, 0.0, 0.0, 0.0),
        ),
        (MobilityModel::Arora, SiO2) => (
            arora(10.0, 20.0, 0.88, 1.26e17, -0.57, -2.33, 2.4, -0.146),
            arora(1.0e-5, 2.0e-5, 0.88, 2.35e17, -0.57, -2.33, 2.4, -0.146),
        ),
        (MobilityModel::Arora, InAlAs) | (MobilityModel::Arora, InP) => (
            arora(2.41e4, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
            arora(480.0, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
        ),
        (MobilityModel::Arora, InGaAs) => (
            arora(2.73e4, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
            arora(480.0, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
        ),
        (MobilityModel::Arora, InGaP) => (
            arora(200.0, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
            arora(150.0, 0.0, 1.0, 1.0e20, 0.0, 0.0, 0.0, 0.0),
        ),
        (MobilityModel::Carr, Si) => (
            carr(1430.0, -2.2, 4.61e17, 1.52e15),
            carr(495.0, -2.2, 1.0e17, 6.25e14),
        ),
        (MobilityModel::Carr, GaAs) => (
            carr(8.5e3, 0.0, 4.61e17, 1.52e15),
            carr(400.0, 0.0, 1.0e17, 6.25e14),
        ),
        _ => return None,
    };
    Some(tables)
}

/// (electron, hole) high-field corrections.
fn high_field_tables(material: Material) -> (HighField, HighField) {
    let sat = |vsat| HighField::Saturating { vsat };
    let barnes = |vsat, e0| HighField::Barnes { vsat, e0 };
    match material {
        Material::Si | Material::Ge => (sat(1.035e7), sat(1.035e7)),
        Material::GaAs | Material::InGaP => (barnes(7.7e6, 4000.0), sat(7.7e6)),
        Material::InAlAs => (barnes(4.7e6, 8.4e3), sat(3.0e6)),
        Material::InGaAs => (barnes(8.4e6, 5.07e3), sat(4.8e6)),
        Material::InP => (barnes(1.3e7, 1.06e4), sat(6.6e6)),
        _ => (HighField::Unchanged, HighField::Unchanged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_dual::Dual64;

    fn point(doping: f64, epar: f64) -> MobilityPoint<f64> {
        MobilityPoint {
            doping,
            n: 1.0e16,
            p: 1.0e4,
            epar,
            temp: REF_TEMP,
        }
    }

    #[test]
    fn test_parse_model_names() {
        assert_eq!(MobilityModel::parse("Caughey-Thomas", Material::Si).unwrap(), MobilityModel::Analytic);
        assert_eq!(MobilityModel::parse("ARORA", Material::Si).unwrap(), MobilityModel::Arora);
        assert!(matches!(
            MobilityModel::parse("lombardi", Material::Si),
            Err(DevsimError::UnknownMobilityModel { .. })
        ));
    }

    #[test]
    fn test_carr_only_for_si_and_gaas() {
        assert!(Mobility::new(MobilityModel::Carr, Material::Si, false).is_ok());
        assert!(Mobility::new(MobilityModel::Carr, Material::InP, false).is_err());
        assert!(Mobility::new(MobilityModel::Arora, Material::Ge, false).is_err());
    }

    #[test]
    fn test_analytic_silicon_limits() {
        let mob = Mobility::new(MobilityModel::Analytic, Material::Si, false).unwrap();
        // Light doping approaches mu_max, heavy doping mu_min
        let light = mob.eval(Carrier::Electron, &point(1.0, 0.0));
        let heavy = mob.eval(Carrier::Electron, &point(1.0e22, 0.0));
        assert_relative_eq!(light, 1429.23, max_relative = 1e-6);
        assert!(heavy < 60.0 && heavy > 55.24);
    }

    #[test]
    fn test_arora_silicon_reference_temperature() {
        let mob = Mobility::new(MobilityModel::Arora, Material::Si, false).unwrap();
        let mu = mob.eval(Carrier::Electron, &point(1.26e17, 0.0));
        // At N = c and T = Tref: mu1 + mu2 / 2
        assert_relative_eq!(mu, 88.0 + 1252.0 / 2.0, max_relative = 1e-12);
        let hole = mob.eval(Carrier::Hole, &point(2.35e17, 0.0));
        assert_relative_eq!(hole, 54.3 + 407.0 / 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_carr_is_positive_and_below_lattice_limit() {
        let mob = Mobility::new(MobilityModel::Carr, Material::Si, false).unwrap();
        let mu = mob.eval(Carrier::Electron, &point(1.0e16, 0.0));
        assert!(mu > 0.0 && mu < 1430.0, "mu = {mu}");
    }

    #[test]
    fn test_field_saturation() {
        let low = Mobility::new(MobilityModel::Arora, Material::Si, false).unwrap();
        let high = Mobility::new(MobilityModel::Arora, Material::Si, true).unwrap();
        let mu0 = low.eval(Carrier::Electron, &point(1.0e16, 1.0e5));
        let mu = high.eval(Carrier::Electron, &point(1.0e16, 1.0e5));
        assert_relative_eq!(mu, mu0 / (1.0 + mu0 * 1.0e5 / 1.035e7), max_relative = 1e-12);
        // Zero field leaves the value alone
        assert_relative_eq!(high.eval(Carrier::Electron, &point(1.0e16, 0.0)), mu0);
    }

    #[test]
    fn test_carr_density_derivative() {
        let mob = Mobility::new(MobilityModel::Carr, Material::Si, false).unwrap();
        // Carrier-carrier scattering dominates at high injection
        let n = 1.0e17;
        let eval = |n: f64| {
            mob.eval(
                Carrier::Hole,
                &MobilityPoint {
                    n,
                    p: 1.0e17,
                    ..point(1.0e14, 0.0)
                },
            )
        };
        let dual = mob.eval(
            Carrier::Hole,
            &MobilityPoint {
                doping: 1.0e14,
                n: Dual64::new(n, 1.0),
                p: Dual64::from(1.0e17),
                epar: Dual64::from(0.0),
                temp: REF_TEMP,
            },
        );
        let h = n * 1e-6;
        let fd = (eval(n + h) - eval(n - h)) / (2.0 * h);
        assert_relative_eq!(dual.eps, fd, max_relative = 1e-5);
    }
}
