//! Uniform 1-D mesh, doping profiles and the per-node arrays.

use crate::error::{DevsimError, Result};

use super::scaling::ScalingVars;

/// Node coordinates and spacings.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Node coordinates
    pub x: Vec<f64>,
    /// `dx[i] = x[i+1] - x[i]`; the last entry repeats the one before
    pub dx: Vec<f64>,
}

impl Mesh {
    /// `nx` evenly spaced nodes from 0 to `width`.
    pub fn uniform(nx: usize, width: f64) -> Self {
        let lx = nx - 1;
        let x: Vec<f64> = (0..nx).map(|i| i as f64 * width / lx as f64).collect();
        let mut dx: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        dx.push(dx[lx - 1]);
        Self { x, dx }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Always false; a mesh has at least three nodes.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Index of the last node.
    pub fn last(&self) -> usize {
        self.x.len() - 1
    }

    /// Mesh extent.
    pub fn width(&self) -> f64 {
        self.x[self.last()]
    }

    /// Node nearest `location`; ties go to the lower index.
    pub fn nearest(&self, location: f64) -> usize {
        let mut best = 0;
        let mut min_delta = f64::INFINITY;
        for (i, &x) in self.x.iter().enumerate() {
            let delta = (x - location).abs();
            if delta < min_delta {
                min_delta = delta;
                best = i;
            }
        }
        best
    }

    /// Mean spacing around interior node `i`.
    pub fn ave_dx(&self, i: usize) -> f64 {
        0.5 * (self.dx[i - 1] + self.dx[i])
    }
}

/// Net, donor and acceptor doping per node (cm^-3 before scaling).
#[derive(Debug, Clone, PartialEq)]
pub struct Doping {
    /// Net doping `Nd - Na`
    pub net: Vec<f64>,
    /// Positive part of the net doping
    pub donor: Vec<f64>,
    /// Magnitude of the negative part of the net doping
    pub acceptor: Vec<f64>,
}

impl Doping {
    /// Abrupt junction at mid-width: n-type on the left, p-type on the right.
    pub fn step(device: &str, mesh: &Mesh, na: f64, nd: f64) -> Result<Self> {
        check_doping(device, na, nd)?;
        let mid = mesh.width() / 2.0;
        let net = mesh
            .x
            .iter()
            .map(|&x| if x < mid { nd } else { -na })
            .collect();
        Ok(Self::from_net(net))
    }

    /// Linear grade of width `wj` centred at mid-width.
    pub fn graded(device: &str, mesh: &Mesh, na: f64, nd: f64, wj: f64) -> Result<Self> {
        check_doping(device, na, nd)?;
        let mid = mesh.width() / 2.0;
        let xl = mid - wj / 2.0;
        let xr = mid + wj / 2.0;
        let slope = (na + nd) / (xr - xl);
        let net = mesh
            .x
            .iter()
            .map(|&x| {
                if x <= xl {
                    nd
                } else if x < xr {
                    nd - slope * (x - xl)
                } else {
                    -na
                }
            })
            .collect();
        Ok(Self::from_net(net))
    }

    fn from_net(net: Vec<f64>) -> Self {
        let donor = net.iter().map(|&c: &f64| c.max(0.0)).collect();
        let acceptor = net.iter().map(|&c: &f64| (-c).max(0.0)).collect();
        Self { net, donor, acceptor }
    }

    /// Largest doping magnitude.
    pub fn peak(&self) -> f64 {
        self.net.iter().fold(0.0, |m, c| m.max(c.abs()))
    }
}

fn check_doping(device: &str, na: f64, nd: f64) -> Result<()> {
    if na == 0.0 || nd == 0.0 {
        Err(DevsimError::ZeroDoping {
            device: device.to_string(),
            na,
            nd,
        })
    } else {
        Ok(())
    }
}

/// Per-node arrays that change units when the device is scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFields {
    pub x: Vec<f64>,
    pub dx: Vec<f64>,
    /// Net doping
    pub c: Vec<f64>,
    pub donor: Vec<f64>,
    pub acceptor: Vec<f64>,
    /// Electrostatic potential
    pub v: Vec<f64>,
    /// Electron density
    pub n: Vec<f64>,
    /// Hole density
    pub p: Vec<f64>,
    /// Electron SRH lifetime
    pub tn: Vec<f64>,
    /// Hole SRH lifetime
    pub tp: Vec<f64>,
}

impl MeshFields {
    /// Arrays for `mesh` and `doping`, with zero potential and densities.
    pub fn new(mesh: &Mesh, doping: &Doping) -> Self {
        let nx = mesh.len();
        Self {
            x: mesh.x.clone(),
            dx: mesh.dx.clone(),
            c: doping.net.clone(),
            donor: doping.donor.clone(),
            acceptor: doping.acceptor.clone(),
            v: vec![0.0; nx],
            n: vec![0.0; nx],
            p: vec![0.0; nx],
            tn: vec![0.0; nx],
            tp: vec![0.0; nx],
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// True if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Convert to scaled units.
    pub fn scale(&mut self, s: &ScalingVars) {
        self.apply(s, |value, factor| value / factor);
    }

    /// Convert back to physical units.
    pub fn unscale(&mut self, s: &ScalingVars) {
        self.apply(s, |value, factor| value * factor);
    }

    fn apply(&mut self, s: &ScalingVars, op: impl Fn(f64, f64) -> f64) {
        let groups: [(&mut Vec<f64>, f64); 10] = [
            (&mut self.x, s.x0),
            (&mut self.dx, s.x0),
            (&mut self.c, s.c0),
            (&mut self.donor, s.c0),
            (&mut self.acceptor, s.c0),
            (&mut self.v, s.v0),
            (&mut self.n, s.c0),
            (&mut self.p, s.c0),
            (&mut self.tn, s.t0),
            (&mut self.tp, s.t0),
        ];
        for (values, factor) in groups {
            for value in values.iter_mut() {
                *value = op(*value, factor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pde::scaling::ScalingInputs;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_mesh() {
        let mesh = Mesh::uniform(11, 1.0e-3);
        assert_eq!(mesh.len(), 11);
        assert_eq!(mesh.x[0], 0.0);
        assert_relative_eq!(mesh.width(), 1.0e-3);
        assert_relative_eq!(mesh.dx[3], 1.0e-4, max_relative = 1e-12);
        assert_eq!(mesh.dx[10], mesh.dx[9]);
    }

    #[test]
    fn test_nearest_node() {
        let mesh = Mesh::uniform(11, 1.0e-3);
        assert_eq!(mesh.nearest(0.5e-3), 5);
        assert_eq!(mesh.nearest(0.26e-3), 3);
        assert_eq!(mesh.nearest(-1.0), 0);
        assert_eq!(mesh.nearest(2.0e-3), 10);
    }

    #[test]
    fn test_step_doping() {
        let mesh = Mesh::uniform(11, 1.0e-3);
        let d = Doping::step("YD1", &mesh, 1e16, 1e15).unwrap();
        assert_eq!(d.net[0], 1e15);
        assert_eq!(d.net[4], 1e15);
        assert_eq!(d.net[6], -1e16);
        assert_eq!(d.acceptor[10], 1e16);
        assert_eq!(d.donor[10], 0.0);
        assert_eq!(d.peak(), 1e16);
    }

    #[test]
    fn test_graded_doping() {
        let mesh = Mesh::uniform(11, 1.0e-3);
        let d = Doping::graded("YD1", &mesh, 1e15, 1e15, 4e-4).unwrap();
        assert_relative_eq!(d.net[2], 1e15);
        // Linear through zero at the centre
        assert_relative_eq!(d.net[5], 0.0, epsilon = 1e3);
        assert!(d.net[4] > 0.0 && d.net[4] < 1e15);
        assert_eq!(d.net[8], -1e15);
    }

    #[test]
    fn test_zero_doping_rejected() {
        let mesh = Mesh::uniform(5, 1.0e-3);
        assert!(matches!(
            Doping::step("YD1", &mesh, 0.0, 1e15),
            Err(DevsimError::ZeroDoping { .. })
        ));
    }

    #[test]
    fn test_scale_round_trip() {
        let mesh = Mesh::uniform(11, 1.0e-3);
        let doping = Doping::step("YD1", &mesh, 1e16, 1e15).unwrap();
        let mut fields = MeshFields::new(&mesh, &doping);
        for i in 0..fields.len() {
            fields.v[i] = 0.1 * i as f64 - 0.3;
            fields.n[i] = 1e15 / (i as f64 + 1.0);
            fields.p[i] = 1e5 * (i as f64 + 1.0);
            fields.tn[i] = 1e-6;
            fields.tp[i] = 2e-7;
        }
        let before = fields.clone();
        let s = ScalingVars::new(&ScalingInputs {
            thermal_voltage: 0.0258,
            width: 1.0e-3,
            x0: None,
            c0: None,
            t0: None,
            peak_density: Some(1e15),
        });
        fields.scale(&s);
        assert_relative_eq!(fields.x[10], 1.0, max_relative = 1e-12);
        fields.unscale(&s);
        for (a, b) in [
            (&fields.x, &before.x),
            (&fields.dx, &before.dx),
            (&fields.c, &before.c),
            (&fields.v, &before.v),
            (&fields.n, &before.n),
            (&fields.p, &before.p),
        ] {
            for (x, y) in a.iter().zip(b.iter()) {
                assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-300);
            }
        }
    }
}
