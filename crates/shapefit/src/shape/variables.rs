//! DOF binding: solver slots, concrete updates, and symbolic coordinates.
//!
//! Composition law (shared by the concrete and symbolic paths)
//! - A shape's nine DOF values `(t, r, s)` define the delta
//!   `D(q) = p + t + R(r) · diag(s) · (q − p)` about the pivot `p`
//!   (the `current`-transformed origin), with `R(r) = Rx · Ry · Rz`.
//! - Neutral values are `t = 0`, `r = 0`, `s = 1`; locked DOFs keep them.
//! - Along a primary-parent chain `[self, parent, grandparent, …]` the world
//!   position of an intrinsic point `x` is
//!   `D_root ∘ … ∘ D_parent ∘ D_self (current · x)`.
//!
//! `update_variable_values` applies `D_self` to `current`; the reconstruction
//! applies the whole chain. Evaluating the expressions from
//! `compute_transformed_point_coordinates` at `x` gives the same point as the
//! concrete update with the same `x`, up to rounding.

use nalgebra::{Matrix3, Point3, Vector3};

use super::Shape;
use crate::error::VariableError;
use crate::expr::Expr;
use crate::geom::Affine3;

/// Number of transform DOFs per shape.
pub const NUM_DOFS: usize = 9;

/// One scalar parameter of a shape's transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dof {
    Tx,
    Ty,
    Tz,
    Rx,
    Ry,
    Rz,
    Sx,
    Sy,
    Sz,
}

impl Dof {
    pub const ALL: [Dof; NUM_DOFS] = [
        Dof::Tx,
        Dof::Ty,
        Dof::Tz,
        Dof::Rx,
        Dof::Ry,
        Dof::Rz,
        Dof::Sx,
        Dof::Sy,
        Dof::Sz,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Value that leaves the transform unchanged.
    #[inline]
    pub fn neutral(self) -> f64 {
        match self {
            Dof::Sx | Dof::Sy | Dof::Sz => 1.0,
            _ => 0.0,
        }
    }
}

/// DOF values grouped as translation, rotation angles, scale factors.
type DofTriple<T> = ([T; 3], [T; 3], [T; 3]);

impl Shape {
    /// Always nine, locked or not.
    #[inline]
    pub fn n_variables(&self) -> usize {
        NUM_DOFS
    }

    /// `None` locks all nine DOFs; otherwise copy up to nine weights.
    pub fn set_inertia(&mut self, inertias: Option<&[f64]>) {
        match inertias {
            None => self.variable_inertias = [f64::INFINITY; NUM_DOFS],
            Some(w) => {
                let n = w.len().min(NUM_DOFS);
                self.variable_inertias[..n].copy_from_slice(&w[..n]);
            }
        }
    }

    #[inline]
    pub fn inertia(&self, dof: Dof) -> f64 {
        self.variable_inertias[dof.index()]
    }

    #[inline]
    pub fn inertias(&self) -> &[f64; NUM_DOFS] {
        &self.variable_inertias
    }

    /// Infinite inertia excludes the DOF from optimization.
    #[inline]
    pub fn is_locked(&self, dof: Dof) -> bool {
        self.variable_inertias[dof.index()].is_infinite()
    }

    #[inline]
    pub fn variable_index(&self, dof: Dof) -> Option<usize> {
        self.variable_index[dof.index()]
    }

    /// Give each unlocked DOF the next slot of the shared counter.
    ///
    /// Slots depend on call order across shapes, so callers must visit
    /// shapes in a stable order.
    pub fn update_variable_index(&mut self, nvariables: &mut usize) {
        let start = *nvariables;
        for dof in Dof::ALL {
            self.variable_index[dof.index()] = if self.is_locked(dof) {
                None
            } else {
                let slot = *nvariables;
                *nvariables += 1;
                Some(slot)
            };
        }
        tracing::debug!(
            shape = ?self.reconstruction_index,
            first = start,
            assigned = *nvariables - start,
            "assigned variable slots"
        );
    }

    /// Forget slot assignments (e.g. before re-locking DOFs).
    pub fn clear_variable_index(&mut self) {
        self.variable_index = [None; NUM_DOFS];
    }

    /// Write neutral values into this shape's slots of `x`.
    pub fn initial_variable_values(&self, x: &mut [f64]) -> Result<(), VariableError> {
        for dof in Dof::ALL {
            if let Some(slot) = self.variable_index(dof) {
                let len = x.len();
                *x.get_mut(slot)
                    .ok_or(VariableError::SlotOutOfRange { slot, len })? = dof.neutral();
            }
        }
        Ok(())
    }

    fn has_free_dofs(&self) -> bool {
        Dof::ALL.iter().any(|&d| !self.is_locked(d))
    }

    fn dof_slot(&self, dof: Dof) -> Result<Option<usize>, VariableError> {
        if self.is_locked(dof) {
            return Ok(None);
        }
        match self.variable_index(dof) {
            Some(slot) => Ok(Some(slot)),
            None => Err(VariableError::Unassigned {
                shape: self.id(),
                dof,
            }),
        }
    }

    fn dof_values(&self, x: &[f64]) -> Result<DofTriple<f64>, VariableError> {
        let mut v = [0.0; NUM_DOFS];
        for dof in Dof::ALL {
            v[dof.index()] = match self.dof_slot(dof)? {
                None => dof.neutral(),
                Some(slot) => *x.get(slot).ok_or(VariableError::SlotOutOfRange {
                    slot,
                    len: x.len(),
                })?,
            };
        }
        Ok(([v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]))
    }

    fn dof_exprs(&self) -> Result<DofTriple<Expr>, VariableError> {
        let e = |dof: Dof| -> Result<Expr, VariableError> {
            Ok(match self.dof_slot(dof)? {
                None => Expr::constant(dof.neutral()),
                Some(slot) => Expr::var(slot),
            })
        };
        Ok((
            [e(Dof::Tx)?, e(Dof::Ty)?, e(Dof::Tz)?],
            [e(Dof::Rx)?, e(Dof::Ry)?, e(Dof::Rz)?],
            [e(Dof::Sx)?, e(Dof::Sy)?, e(Dof::Sz)?],
        ))
    }

    /// This shape's own delta `D_self` for the solver vector `x`.
    pub fn delta_transformation(&self, x: &[f64]) -> Result<Affine3, VariableError> {
        if !self.has_free_dofs() {
            return Ok(Affine3::identity());
        }
        let (t, r, s) = self.dof_values(x)?;
        let l = Affine3::rotation_xyz(Vector3::from(r))
            * Matrix3::from_diagonal(&Vector3::from(s));
        Ok(Affine3::about(&self.pivot(), l, Vector3::from(t)))
    }

    /// `D_last ∘ … ∘ D_ancestor0 ∘ D_self` for `ancestors` ordered nearest first.
    pub fn chain_delta(&self, ancestors: &[&Shape], x: &[f64]) -> Result<Affine3, VariableError> {
        let mut delta = self.delta_transformation(x)?;
        for a in ancestors {
            delta = a.delta_transformation(x)?.compose(&delta);
        }
        Ok(delta)
    }

    /// Fold this shape's DOF values from `x` into `current`.
    pub fn update_variable_values(&mut self, x: &[f64]) -> Result<(), VariableError> {
        let delta = self.delta_transformation(x)?;
        self.set_transformation(delta.compose(&self.current));
        Ok(())
    }

    /// Symbolic world coordinates of an intrinsic point through the chain.
    ///
    /// `ancestors` is the primary-parent chain, nearest first (empty for a
    /// root). Fails if any shape in the chain has a free DOF without a slot.
    pub fn compute_transformed_point_coordinates(
        &self,
        ancestors: &[&Shape],
        position: &Point3<f64>,
    ) -> Result<[Expr; 3], VariableError> {
        let p = self.current.apply_point(position);
        let mut q = [p.x, p.y, p.z].map(Expr::constant);
        q = self.apply_symbolic_delta(q, true)?;
        for a in ancestors {
            q = a.apply_symbolic_delta(q, true)?;
        }
        Ok(q)
    }

    /// Symbolic world components of an intrinsic vector (no translation).
    pub fn compute_transformed_vector_coordinates(
        &self,
        ancestors: &[&Shape],
        vector: &Vector3<f64>,
    ) -> Result<[Expr; 3], VariableError> {
        let v = self.current.apply_vector(vector);
        let mut q = [v.x, v.y, v.z].map(Expr::constant);
        q = self.apply_symbolic_delta(q, false)?;
        for a in ancestors {
            q = a.apply_symbolic_delta(q, false)?;
        }
        Ok(q)
    }

    fn apply_symbolic_delta(&self, q: [Expr; 3], is_point: bool) -> Result<[Expr; 3], VariableError> {
        if !self.has_free_dofs() {
            return Ok(q);
        }
        let (t, r, s) = self.dof_exprs()?;
        let l = symbolic_linear(r, s);
        let pivot = self.pivot();
        let local: [Expr; 3] = if is_point {
            let [a, b, c] = q;
            [
                a - Expr::constant(pivot.x),
                b - Expr::constant(pivot.y),
                c - Expr::constant(pivot.z),
            ]
        } else {
            q
        };
        let mut out: [Expr; 3] = [Expr::zero(), Expr::zero(), Expr::zero()];
        for (i, (row, offset)) in l.into_iter().zip(t).enumerate() {
            let mut acc = Expr::zero();
            for (lij, qj) in row.into_iter().zip(local.iter()) {
                acc = acc + lij * qj.clone();
            }
            out[i] = if is_point {
                Expr::constant(pivot[i]) + offset + acc
            } else {
                acc
            };
        }
        Ok(out)
    }
}

/// `Rx(r0) · Ry(r1) · Rz(r2) · diag(s)` as expressions, row-major.
fn symbolic_linear(r: [Expr; 3], s: [Expr; 3]) -> [[Expr; 3]; 3] {
    let [rx, ry, rz] = r;
    let (cx, sx) = (Expr::cos(rx.clone()), Expr::sin(rx));
    let (cy, sy) = (Expr::cos(ry.clone()), Expr::sin(ry));
    let (cz, sz) = (Expr::cos(rz.clone()), Expr::sin(rz));
    let zero = Expr::zero;
    let one = Expr::one;
    let mx = [
        [one(), zero(), zero()],
        [zero(), cx.clone(), -sx.clone()],
        [zero(), sx, cx],
    ];
    let my = [
        [cy.clone(), zero(), sy.clone()],
        [zero(), one(), zero()],
        [-sy, zero(), cy],
    ];
    let mz = [
        [cz.clone(), -sz.clone(), zero()],
        [sz, cz, zero()],
        [zero(), zero(), one()],
    ];
    let rot = mat_mul(&mat_mul(&mx, &my), &mz);
    let mut out = rot;
    for row in out.iter_mut() {
        for (j, e) in row.iter_mut().enumerate() {
            *e = std::mem::replace(e, Expr::zero()) * s[j].clone();
        }
    }
    out
}

fn mat_mul(a: &[[Expr; 3]; 3], b: &[[Expr; 3]; 3]) -> [[Expr; 3]; 3] {
    std::array::from_fn(|i| {
        std::array::from_fn(|j| {
            (0..3).fold(Expr::zero(), |acc, k| acc + a[i][k].clone() * b[k][j].clone())
        })
    })
}
