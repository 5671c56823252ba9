//! Material tables: band structure, permittivity and carrier lifetimes.

use std::f64::consts::PI;
use std::fmt;

use crate::error::{DevsimError, Result};

use super::{BOLTZMANN, BOLTZMANN_EV, ELECTRON_MASS, PLANCK};

/// Bulk or insulator material known to the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    Si,
    Ge,
    GaAs,
    SiO2,
    Nitride,
    Sapphire,
    InAlAs,
    InGaAs,
    InP,
    InGaP,
}

impl Material {
    /// Look up a material by (case-insensitive) name.
    pub fn parse(name: &str) -> Result<Self> {
        let material = match name.to_ascii_lowercase().as_str() {
            "si" => Self::Si,
            "ge" => Self::Ge,
            "gaas" => Self::GaAs,
            "sio2" => Self::SiO2,
            "nitride" => Self::Nitride,
            "sapphire" => Self::Sapphire,
            "inalas" | "alinas" => Self::InAlAs,
            "ingaas" | "gainas" => Self::InGaAs,
            "inp" => Self::InP,
            "ingap" => Self::InGaP,
            _ => {
                return Err(DevsimError::UnknownMaterial {
                    material: name.to_string(),
                })
            }
        };
        Ok(material)
    }

    /// Lower-case table name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Si => "si",
            Self::Ge => "ge",
            Self::GaAs => "gaas",
            Self::SiO2 => "sio2",
            Self::Nitride => "nitride",
            Self::Sapphire => "sapphire",
            Self::InAlAs => "inalas",
            Self::InGaAs => "ingaas",
            Self::InP => "inp",
            Self::InGaP => "ingap",
        }
    }

    fn unknown(&self) -> DevsimError {
        DevsimError::UnknownMaterial {
            material: self.name().to_string(),
        }
    }

    /// Relative permittivity.
    pub fn rel_perm(&self) -> Result<f64> {
        match self {
            Self::Si => Ok(11.8),
            Self::SiO2 => Ok(3.9),
            Self::Ge => Ok(16.0),
            Self::GaAs => Ok(13.2),
            Self::InAlAs => Ok(12.5),
            Self::InGaAs => Ok(14.0),
            Self::InP => Ok(12.6),
            _ => Err(self.unknown()),
        }
    }

    /// Electron affinity in eV.
    pub fn affinity(&self) -> Result<f64> {
        match self {
            Self::Si => Ok(4.17),
            Self::Ge => Ok(4.00),
            Self::GaAs => Ok(4.07),
            Self::SiO2 | Self::Nitride | Self::Sapphire => Ok(0.97),
            _ => Err(self.unknown()),
        }
    }

    /// Band gap in eV at temperature `temp` (K).
    pub fn band_gap(&self, temp: f64) -> Result<f64> {
        let t2 = temp * temp;
        match self {
            Self::Si => Ok(1.17 - 4.73e-4 * t2 / (temp + 636.0)),
            Self::Ge => Ok(0.7437 - 4.774e-4 * t2 / (temp + 235.0)),
            Self::GaAs => Ok(1.519 - 5.405e-4 * t2 / (temp + 204.0)),
            Self::SiO2 => Ok(9.0),
            Self::Nitride | Self::Sapphire => Ok(4.7),
            Self::InAlAs => Ok(1.46),
            Self::InGaAs => Ok(0.96 - 0.21),
            Self::InP => Ok(1.21 + 0.14),
            Self::InGaP => Err(self.unknown()),
        }
    }

    /// Density-of-states effective masses (electron, hole) in units of the
    /// free electron mass.
    pub fn dos_masses(&self) -> Result<(f64, f64)> {
        let valley = |ml: f64, mt: f64| (ml * mt * mt).cbrt();
        let holes = |mlh: f64, mhh: f64| (mlh.powf(1.5) + mhh.powf(1.5)).powf(2.0 / 3.0);
        match self {
            Self::Si => Ok((valley(0.98, 0.19) * 6.0_f64.powf(2.0 / 3.0), holes(0.16, 0.49))),
            Self::Ge => Ok((valley(1.64, 0.082) * 2.0, holes(0.04, 0.28))),
            Self::GaAs => Ok((0.067, holes(0.074, 0.5))),
            Self::InAlAs => Ok((0.074, holes(0.08, 0.6))),
            Self::InGaAs => Ok((0.041, holes(0.05, 0.54))),
            Self::InP => Ok((0.079, holes(0.074, 0.5))),
            _ => Err(self.unknown()),
        }
    }

    /// Effective conduction and valence band densities of states (cm^-3).
    pub fn band_edge_densities(&self, temp: f64) -> Result<(f64, f64)> {
        let (mn, mp) = self.dos_masses()?;
        // 2 (2 pi m kT / h^2)^1.5, converted from m^-3 to cm^-3
        let base = 2.0 * (2.0 * PI * ELECTRON_MASS * BOLTZMANN * temp / (PLANCK * PLANCK)).powf(1.5)
            / 1.0e6;
        Ok((base * mn.powf(1.5), base * mp.powf(1.5)))
    }

    /// Intrinsic carrier concentration (cm^-3).
    pub fn intrinsic_concentration(&self, temp: f64) -> Result<f64> {
        let (nc, nv) = self.band_edge_densities(temp)?;
        let gap = self.band_gap(temp)?;
        Ok((nc * nv).sqrt() * (-gap / (2.0 * BOLTZMANN_EV * temp)).exp())
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Doping-dependent SRH lifetime (s) of electrons or holes.
pub fn srh_lifetime(holes: bool, conc: f64) -> f64 {
    const NREF: f64 = 7.1e15;
    let lt0 = if holes { 3.52e-5 } else { 3.95e-4 };
    lt0 / (1.0 + conc.abs() / NREF)
}
