//! Variable layout and Jacobian stencil of a DiodePDE instance.
//!
//! Local variables are numbered external first, then three unknowns
//! (V, n, p) per mesh node. Mesh nodes carrying an electrode come first, in
//! electrode order, followed by the remaining nodes in mesh order. Local
//! rows `0..num_ext` are the KCL rows of the terminals.

use super::electrode::Electrode;

/// What a mesh node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Plain interior node: Poisson plus both continuity equations
    Interior,
    /// Electrode on the first or last node
    Edge(usize),
    /// Electrode strictly inside the mesh
    Internal(usize),
}

/// Mapping from mesh quantities to local variable indices.
#[derive(Debug, Clone, PartialEq)]
pub struct VarLayout {
    num_ext: usize,
    mesh_to_slot: Vec<usize>,
    kinds: Vec<NodeKind>,
}

impl VarLayout {
    /// Layout for `nx` mesh nodes and the given electrodes.
    pub fn new(nx: usize, electrodes: &[Electrode]) -> Self {
        let mut kinds = vec![NodeKind::Interior; nx];
        for (k, e) in electrodes.iter().enumerate() {
            kinds[e.mesh_index] = if e.edge {
                NodeKind::Edge(k)
            } else {
                NodeKind::Internal(k)
            };
        }

        let mut mesh_to_slot = vec![0; nx];
        let mut slot = 0;
        for e in electrodes {
            mesh_to_slot[e.mesh_index] = slot;
            slot += 1;
        }
        for (i, kind) in kinds.iter().enumerate() {
            if *kind == NodeKind::Interior {
                mesh_to_slot[i] = slot;
                slot += 1;
            }
        }

        Self {
            num_ext: electrodes.len(),
            mesh_to_slot,
            kinds,
        }
    }

    /// External variables.
    pub fn num_ext(&self) -> usize {
        self.num_ext
    }

    /// Mesh nodes.
    pub fn nx(&self) -> usize {
        self.kinds.len()
    }

    /// Internal variables.
    pub fn num_int(&self) -> usize {
        3 * self.nx()
    }

    /// All local variables.
    pub fn len(&self) -> usize {
        self.num_ext + self.num_int()
    }

    /// Always false; a layout has mesh nodes.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Role of mesh node `i`.
    pub fn kind(&self, i: usize) -> NodeKind {
        self.kinds[i]
    }

    /// Local index of the potential at node `i`.
    pub fn v(&self, i: usize) -> usize {
        self.num_ext + 3 * self.mesh_to_slot[i]
    }

    /// Local index of the electron density at node `i`.
    pub fn n(&self, i: usize) -> usize {
        self.v(i) + 1
    }

    /// Local index of the hole density at node `i`.
    pub fn p(&self, i: usize) -> usize {
        self.v(i) + 2
    }

    /// Local indices of `[V, V+1, n, n+1, p, p+1]` on edge `i`, in the
    /// order of the edge flux derivatives.
    pub fn edge_columns(&self, i: usize) -> [usize; 6] {
        [self.v(i), self.v(i + 1), self.n(i), self.n(i + 1), self.p(i), self.p(i + 1)]
    }

    /// Columns of a continuity row at interior node `i`: the own carrier,
    /// then V, then the other carrier, each over `i-1, i, i+1`.
    fn continuity_columns(&self, i: usize, own: fn(&Self, usize) -> usize, other: fn(&Self, usize) -> usize) -> Vec<usize> {
        let mut cols = Vec::with_capacity(9);
        for var in [own, Self::v, other] {
            cols.extend([var(self, i - 1), var(self, i), var(self, i + 1)]);
        }
        cols
    }

    /// Local Jacobian stamp.
    pub fn jacobian_stamp(&self, electrodes: &[Electrode]) -> Vec<Vec<usize>> {
        let mut stamp = vec![Vec::new(); self.len()];

        for (k, e) in electrodes.iter().enumerate() {
            let (m, nb) = (e.mesh_index, e.neighbor);
            let mut row: Vec<usize> = (0..self.num_ext).collect();
            row.extend([self.v(m), self.v(nb), self.n(m), self.n(nb), self.p(m), self.p(nb)]);
            stamp[k] = row;
        }

        for i in 0..self.nx() {
            match self.kind(i) {
                NodeKind::Edge(k) => {
                    let nb = electrodes[k].neighbor;
                    stamp[self.v(i)] = vec![k, self.v(i), self.v(nb)];
                    let densities = vec![self.n(i), self.n(nb), self.p(i), self.p(nb)];
                    stamp[self.n(i)] = densities.clone();
                    stamp[self.p(i)] = densities;
                }
                NodeKind::Internal(k) => {
                    stamp[self.v(i)] = vec![
                        k,
                        self.v(i - 1),
                        self.v(i),
                        self.v(i + 1),
                        self.n(i),
                        self.p(i),
                    ];
                    stamp[self.n(i)] = self.continuity_columns(i, Self::n, Self::p);
                    stamp[self.p(i)] = self.continuity_columns(i, Self::p, Self::n);
                }
                NodeKind::Interior => {
                    stamp[self.v(i)] = vec![self.v(i - 1), self.v(i), self.v(i + 1), self.n(i), self.p(i)];
                    stamp[self.n(i)] = self.continuity_columns(i, Self::n, Self::p);
                    stamp[self.p(i)] = self.continuity_columns(i, Self::p, Self::n);
                }
            }
        }

        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pde::electrode::layout;
    use crate::pde::mesh::{Doping, Mesh};
    use crate::pde::params::DiodePdeParams;
    use std::collections::HashSet;

    fn electrodes(num_nodes: usize) -> Vec<Electrode> {
        let params = DiodePdeParams::default();
        let mesh = Mesh::uniform(params.nx, params.width());
        let doping = Doping::step("YD1", &mesh, params.na, params.nd).unwrap();
        layout("YD1", num_nodes, &mesh, &doping, &params).unwrap()
    }

    #[test]
    fn test_electrode_nodes_come_first() {
        let e = electrodes(2);
        let layout = VarLayout::new(11, &e);
        assert_eq!(layout.len(), 2 + 33);
        // cathode (node 10) owns the first triple, anode (node 0) the next
        assert_eq!(layout.v(10), 2);
        assert_eq!(layout.p(10), 4);
        assert_eq!(layout.v(0), 5);
        assert_eq!(layout.v(1), 8);
        assert_eq!(layout.kind(0), NodeKind::Edge(1));
        assert_eq!(layout.kind(5), NodeKind::Interior);
    }

    #[test]
    fn test_indices_are_a_permutation() {
        let e = electrodes(3);
        let layout = VarLayout::new(11, &e);
        let mut seen = HashSet::new();
        for i in 0..11 {
            for var in [layout.v(i), layout.n(i), layout.p(i)] {
                assert!(var >= 3 && var < layout.len());
                assert!(seen.insert(var));
            }
        }
        assert_eq!(seen.len(), 33);
    }

    #[test]
    fn test_stamp_shapes() {
        let e = electrodes(3);
        let layout = VarLayout::new(11, &e);
        let stamp = layout.jacobian_stamp(&e);
        assert_eq!(stamp.len(), layout.len());

        // Edge V rows: own terminal, self and neighbour
        assert_eq!(stamp[layout.v(0)], vec![2, layout.v(0), layout.v(1)]);
        // Interior continuity rows have nine entries
        assert_eq!(stamp[layout.n(7)].len(), 9);
        assert_eq!(stamp[layout.p(7)][0], layout.p(6));
        // Base electrode rows
        let base = e[1].mesh_index;
        assert_eq!(stamp[layout.v(base)].len(), 6);
        assert_eq!(stamp[layout.n(base)].len(), 9);
        // KCL rows see every terminal plus six mesh unknowns
        assert!(stamp[..3].iter().all(|row| row.len() == 9));

        for row in &stamp {
            let unique: HashSet<_> = row.iter().collect();
            assert_eq!(unique.len(), row.len());
        }
    }
}
