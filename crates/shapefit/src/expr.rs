//! Symbolic expressions over the global solver vector.
//!
//! Shapes describe their transformed coordinates as `Expr` trees whose leaves
//! are constants and solver variables (`Var(slot)`). The solver can evaluate
//! them, differentiate them, or compile them once into `Bytecode` for the
//! stack VM when the same residual is evaluated many times.
//!
//! Smart constructors fold constants eagerly, so locked DOFs collapse into
//! plain numbers and a fully locked shape yields constant coordinates.

use std::collections::BTreeSet;
use std::ops::{Add, Mul, Neg, Sub};

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    /// Slot in the global variable vector.
    Var(usize),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
}

impl Expr {
    #[inline]
    pub fn constant(c: f64) -> Self {
        Expr::Const(c)
    }

    #[inline]
    pub fn var(slot: usize) -> Self {
        Expr::Var(slot)
    }

    #[inline]
    pub fn zero() -> Self {
        Expr::Const(0.0)
    }

    #[inline]
    pub fn one() -> Self {
        Expr::Const(1.0)
    }

    /// Value of a folded constant node.
    #[inline]
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    #[inline]
    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    pub fn sum(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x + y),
            (Expr::Const(z), e) | (e, Expr::Const(z)) if z == 0.0 => e,
            (a, b) => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn product(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x * y),
            (Expr::Const(z), _) | (_, Expr::Const(z)) if z == 0.0 => Expr::Const(0.0),
            (Expr::Const(o), e) | (e, Expr::Const(o)) if o == 1.0 => e,
            (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    pub fn negate(a: Expr) -> Expr {
        match a {
            Expr::Const(x) => Expr::Const(-x),
            Expr::Neg(inner) => *inner,
            e => Expr::Neg(Box::new(e)),
        }
    }

    pub fn sin(a: Expr) -> Expr {
        match a {
            Expr::Const(x) => Expr::Const(x.sin()),
            e => Expr::Sin(Box::new(e)),
        }
    }

    pub fn cos(a: Expr) -> Expr {
        match a {
            Expr::Const(x) => Expr::Const(x.cos()),
            e => Expr::Cos(Box::new(e)),
        }
    }

    /// Evaluate at the global vector `x`.
    ///
    /// Panics if a `Var` slot is outside `x`; slots come from
    /// `update_variable_index`, so a short vector is a caller bug.
    pub fn eval(&self, x: &[f64]) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(i) => x[*i],
            Expr::Add(a, b) => a.eval(x) + b.eval(x),
            Expr::Mul(a, b) => a.eval(x) * b.eval(x),
            Expr::Neg(a) => -a.eval(x),
            Expr::Sin(a) => a.eval(x).sin(),
            Expr::Cos(a) => a.eval(x).cos(),
        }
    }

    /// Partial derivative with respect to slot `var`.
    pub fn derivative(&self, var: usize) -> Expr {
        match self {
            Expr::Const(_) => Expr::zero(),
            Expr::Var(i) => Expr::Const(if *i == var { 1.0 } else { 0.0 }),
            Expr::Add(a, b) => Expr::sum(a.derivative(var), b.derivative(var)),
            Expr::Mul(a, b) => Expr::sum(
                Expr::product(a.derivative(var), (**b).clone()),
                Expr::product((**a).clone(), b.derivative(var)),
            ),
            Expr::Neg(a) => Expr::negate(a.derivative(var)),
            Expr::Sin(a) => Expr::product(Expr::cos((**a).clone()), a.derivative(var)),
            Expr::Cos(a) => Expr::negate(Expr::product(
                Expr::sin((**a).clone()),
                a.derivative(var),
            )),
        }
    }

    /// Slots referenced anywhere in the tree, ascending.
    pub fn variables(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(i) => {
                out.insert(*i);
            }
            Expr::Add(a, b) | Expr::Mul(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Neg(a) | Expr::Sin(a) | Expr::Cos(a) => a.collect_variables(out),
        }
    }

    /// Flatten into postfix bytecode for `VM::execute`.
    pub fn compile(&self) -> Bytecode {
        let mut ops = Vec::new();
        self.compile_recursive(&mut ops);
        Bytecode { ops }
    }

    fn compile_recursive(&self, ops: &mut Vec<OpCode>) {
        match self {
            Expr::Const(c) => ops.push(OpCode::LoadConst(*c)),
            Expr::Var(i) => ops.push(OpCode::LoadVar(*i)),
            Expr::Add(a, b) => {
                a.compile_recursive(ops);
                b.compile_recursive(ops);
                ops.push(OpCode::Add);
            }
            Expr::Mul(a, b) => {
                a.compile_recursive(ops);
                b.compile_recursive(ops);
                ops.push(OpCode::Mul);
            }
            Expr::Neg(a) => {
                a.compile_recursive(ops);
                ops.push(OpCode::Neg);
            }
            Expr::Sin(a) => {
                a.compile_recursive(ops);
                ops.push(OpCode::Sin);
            }
            Expr::Cos(a) => {
                a.compile_recursive(ops);
                ops.push(OpCode::Cos);
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::Const(c)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(self, rhs)
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum(self, Expr::negate(rhs))
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(self, rhs)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::negate(self)
    }
}

/// Stack machine instructions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    LoadVar(usize),
    /// Pops b, a; pushes a + b.
    Add,
    /// Pops b, a; pushes a * b.
    Mul,
    Neg,
    Sin,
    Cos,
}

/// Compiled postfix program for one expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stateless evaluator for `Bytecode`; `stack` is caller-owned scratch.
pub struct VM;

impl VM {
    pub fn execute(bytecode: &Bytecode, x: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(c) => stack.push(c),
                OpCode::LoadVar(i) => stack.push(x[i]),
                OpCode::Add => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(a + b);
                }
                OpCode::Mul => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(a * b);
                }
                OpCode::Neg => {
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(-a);
                }
                OpCode::Sin => {
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(a.sin());
                }
                OpCode::Cos => {
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(a.cos());
                }
            }
        }
        // Compiled from a tree, so exactly one value remains.
        stack.pop().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_fold() {
        let e = Expr::constant(2.0) * Expr::constant(3.0) + Expr::constant(1.0);
        assert_eq!(e, Expr::Const(7.0));
        assert_eq!(Expr::var(4) * Expr::zero(), Expr::Const(0.0));
        assert_eq!(Expr::var(4) * Expr::one(), Expr::Var(4));
        assert_eq!(Expr::var(4) + Expr::zero(), Expr::Var(4));
        assert_eq!(-(-Expr::var(1)), Expr::Var(1));
        assert_eq!(Expr::cos(Expr::zero()), Expr::Const(1.0));
    }

    #[test]
    fn eval_and_variables() {
        // f = x0 * sin(x2) - 3
        let f = Expr::var(0) * Expr::sin(Expr::var(2)) - Expr::constant(3.0);
        let x = [2.0, 100.0, 0.5];
        assert!((f.eval(&x) - (2.0 * 0.5f64.sin() - 3.0)).abs() < 1e-15);
        assert_eq!(f.variables().into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        // f = cos(x0) * x1 + x0 * x0
        let f = Expr::cos(Expr::var(0)) * Expr::var(1) + Expr::var(0) * Expr::var(0);
        let x = [0.7, -1.3];
        let h = 1e-6;
        for var in 0..2 {
            let d = f.derivative(var).eval(&x);
            let mut xp = x;
            let mut xm = x;
            xp[var] += h;
            xm[var] -= h;
            let fd = (f.eval(&xp) - f.eval(&xm)) / (2.0 * h);
            assert!((d - fd).abs() < 1e-6, "var {var}: {d} vs {fd}");
        }
        assert_eq!(f.derivative(5), Expr::Const(0.0));
    }

    #[test]
    fn bytecode_agrees_with_tree() {
        let f = Expr::sin(Expr::var(1) + Expr::constant(0.25)) * Expr::var(0) - Expr::var(2);
        let code = f.compile();
        let mut stack = Vec::new();
        let x = [1.5, -0.4, 2.0];
        assert!((VM::execute(&code, &x, &mut stack) - f.eval(&x)).abs() < 1e-15);
    }
}
