//! Deferred expression graphs.
//!
//! An [`Expr`] is a handle to a node of a lazy DAG over `Z_Q` elements.
//! Nodes carry their logical shape (the lane axis of polynomial-typed values
//! is implicit and appended only for kernel iteration), their representation
//! (scalar, coefficient, or NTT domain), the access pattern of each child,
//! and the capabilities they need at evaluation time (currently only
//! randomness).
//!
//! Pointwise nodes fuse into their consumers by default; sharing is made
//! explicit with [`Expr::cache`], and complex nodes (NTT, reductions,
//! matrix-vector products) always materialize. The planner in
//! [`crate::expr::planner`] decides the rest.

pub mod cipher;
pub mod ntt;
pub mod planner;
pub mod share;

use std::sync::Arc;

use crate::ints::bit_monomial::MonomialDegree;
use crate::ints::modular::{Mod, Modulus};
use crate::random;
use crate::shape::{common_shape, Shape};
use crate::tensor::Tensor;

/// How many times a kernel reads each element of a child per produced
/// output element.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    Once,
    Multiple,
}

/// A declared runtime requirement of a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Capability {
    Randomness,
}

/// Value domain of a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Domain {
    /// Plain `Z_Q` scalars (no lane axis).
    Scalar,
    /// Polynomial coefficients.
    Coefficient,
    /// Polynomial in the NTT domain.
    Ntt,
}

/// Random source kinds; all are leaves with the randomness capability.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Source {
    CenteredBinomial { variance: u32 },
    Uniform,
    DrownUnsigned { bound_bits: u32 },
    DrownSigned { bound_bits: u32 },
}

impl Source {
    /// Keystream words one element of this source consumes.
    pub(crate) fn words<M: Modulus>(&self) -> usize {
        match self {
            Source::CenteredBinomial { variance } => random::centered_binomial_words(*variance),
            Source::Uniform => random::words_for_bits(random::uniform_mod_bits::<M>()),
            Source::DrownUnsigned { bound_bits } => {
                random::words_for_bits(random::drown_uniform_bits(*bound_bits, false))
            }
            Source::DrownSigned { bound_bits } => {
                random::words_for_bits(random::drown_uniform_bits(*bound_bits, true))
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Eq,
}

/// Builds the pre-twisted roots table for a ring dimension and direction;
/// captured at NTT-node construction so the planner stays independent of the
/// `NttModulus` bound.
pub(crate) type RootsBuilder<M> = fn(usize, bool) -> Tensor<Mod<M>>;

pub(crate) enum Kind<M: Modulus> {
    TensorView(Tensor<Mod<M>>),
    Constant(Mod<M>),
    Random(Source),
    Neg(Expr<M>),
    Binary { op: BinaryOp, left: Expr<M>, right: Expr<M> },
    /// `degrees · poly`: negacyclic rotation selected per element by a
    /// tensor of optional degrees.
    MonomialMul { degrees: Tensor<MonomialDegree>, poly: Expr<M> },
    Ntt { inner: Expr<M>, roots: RootsBuilder<M> },
    Intt { inner: Expr<M>, roots: RootsBuilder<M> },
    /// Sum over all logical axes (lanes stay).
    Sum(Expr<M>),
    /// Contraction of `lhs (..., m, n)` with `rhs (..., n)`.
    MatVec { lhs: Expr<M>, rhs: Expr<M> },
    Unsqueeze { inner: Expr<M>, dim: isize },
    Cache(Expr<M>),
}

pub(crate) struct Node<M: Modulus> {
    pub kind: Kind<M>,
    /// Logical shape, without the lane axis.
    pub shape: Shape,
    /// 1 for scalar-typed nodes, the ring dimension N for polynomial-typed.
    pub lanes: usize,
    pub domain: Domain,
}

impl<M: Modulus> Node<M> {
    /// Shape kernels iterate: the logical shape with the lane axis appended.
    pub fn element_shape(&self) -> Shape {
        self.shape.with_lanes(self.lanes)
    }

    pub fn arity(&self) -> usize {
        match &self.kind {
            Kind::TensorView(_) | Kind::Constant(_) | Kind::Random(_) => 0,
            Kind::Neg(_)
            | Kind::Ntt { .. }
            | Kind::Intt { .. }
            | Kind::Sum(_)
            | Kind::Unsqueeze { .. }
            | Kind::Cache(_)
            | Kind::MonomialMul { .. } => 1,
            Kind::Binary { .. } | Kind::MatVec { .. } => 2,
        }
    }

    pub fn child(&self, i: usize) -> &Expr<M> {
        match (&self.kind, i) {
            (Kind::Neg(e), 0)
            | (Kind::Ntt { inner: e, .. }, 0)
            | (Kind::Intt { inner: e, .. }, 0)
            | (Kind::Sum(e), 0)
            | (Kind::Unsqueeze { inner: e, .. }, 0)
            | (Kind::Cache(e), 0)
            | (Kind::MonomialMul { poly: e, .. }, 0) => e,
            (Kind::Binary { left, .. }, 0) | (Kind::MatVec { lhs: left, .. }, 0) => left,
            (Kind::Binary { right, .. }, 1) | (Kind::MatVec { rhs: right, .. }, 1) => right,
            _ => panic!("child index out of range"),
        }
    }

    /// Declared access pattern for child `i`.
    pub fn access(&self, i: usize) -> Access {
        match &self.kind {
            // Each output lane of a rotation reads one polynomial element,
            // but the degree is consulted for every lane; the poly side
            // stays `Once`, the degree tensor is a leaf.
            Kind::MonomialMul { .. } => Access::Once,
            Kind::MatVec { .. } => Access::Multiple,
            _ => {
                let _ = i;
                Access::Once
            }
        }
    }

    /// Whether the node may be materialized to a tensor for reuse.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self.kind,
            Kind::TensorView(_)
                | Kind::Random(_)
                | Kind::Ntt { .. }
                | Kind::Intt { .. }
                | Kind::Sum(_)
                | Kind::MatVec { .. }
                | Kind::Cache(_)
        )
    }

    /// Whether the node owns its kernel dispatch (multi-pass or looping).
    pub fn is_complex(&self) -> bool {
        matches!(
            self.kind,
            Kind::Ntt { .. } | Kind::Intt { .. } | Kind::Sum(_) | Kind::MatVec { .. }
        )
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self.kind {
            Kind::Random(_) => &[Capability::Randomness],
            _ => &[],
        }
    }
}

/// Handle to an expression node. Cloning shares the node, and sharing is
/// what the planner keys on.
pub struct Expr<M: Modulus> {
    pub(crate) node: Arc<Node<M>>,
}

impl<M: Modulus> Clone for Expr<M> {
    fn clone(&self) -> Self {
        Self { node: Arc::clone(&self.node) }
    }
}

impl<M: Modulus> Expr<M> {
    fn make(kind: Kind<M>, shape: Shape, lanes: usize, domain: Domain) -> Self {
        Self { node: Arc::new(Node { kind, shape, lanes, domain }) }
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    pub fn shape(&self) -> &Shape {
        &self.node.shape
    }

    pub fn lanes(&self) -> usize {
        self.node.lanes
    }

    pub fn domain(&self) -> Domain {
        self.node.domain
    }

    // --- leaves -------------------------------------------------------------

    /// View an existing tensor of scalars.
    pub fn tensor(tensor: &Tensor<Mod<M>>) -> Self {
        Self::make(Kind::TensorView(tensor.clone()), tensor.shape().clone(), 1, Domain::Scalar)
    }

    /// View a tensor whose last axis is the lane axis of
    /// coefficient-domain polynomials of dimension `N`.
    pub fn poly_coeff<const N: usize>(tensor: &Tensor<Mod<M>>) -> Self {
        Self::poly_view::<N>(tensor, Domain::Coefficient)
    }

    /// View a tensor of NTT-domain polynomials of dimension `N`.
    pub fn poly_ntt<const N: usize>(tensor: &Tensor<Mod<M>>) -> Self {
        Self::poly_view::<N>(tensor, Domain::Ntt)
    }

    fn poly_view<const N: usize>(tensor: &Tensor<Mod<M>>, domain: Domain) -> Self {
        assert!(N.is_power_of_two() && N > 1);
        let full = tensor.shape();
        assert!(full.rank() >= 1, "polynomial tensors need a lane axis");
        assert_eq!(
            full.extent(full.rank() - 1),
            crate::shape::Extent::Fixed(N),
            "last axis must equal the ring dimension"
        );
        let logical = full.squeeze(-1, true);
        Self::make(Kind::TensorView(tensor.clone()), logical, N, domain)
    }

    /// Rank-0 scalar constant.
    pub fn constant(value: Mod<M>) -> Self {
        Self::make(Kind::Constant(value), Shape::scalar(), 1, Domain::Scalar)
    }

    /// Centered binomial coefficients of variance `variance` for a tensor of
    /// polynomials with the given logical shape.
    pub fn centered_binomial<const N: usize>(shape: Shape, variance: u32) -> Self {
        assert!(N.is_power_of_two() && N > 1);
        assert!(variance > 0);
        Self::make(
            Kind::Random(Source::CenteredBinomial { variance }),
            shape,
            N,
            Domain::Coefficient,
        )
    }

    /// Uniform scalar elements of `Z_Q`.
    pub fn uniform(shape: Shape) -> Self {
        Self::make(Kind::Random(Source::Uniform), shape, 1, Domain::Scalar)
    }

    /// Uniform coefficient-domain polynomials.
    pub fn uniform_poly<const N: usize>(shape: Shape) -> Self {
        assert!(N.is_power_of_two() && N > 1);
        Self::make(Kind::Random(Source::Uniform), shape, N, Domain::Coefficient)
    }

    /// Drowned symmetric uniform coefficients hiding values below
    /// `2^bound_bits`.
    pub fn drown_signed_uniform<const N: usize>(shape: Shape, bound_bits: u32) -> Self {
        assert!(N.is_power_of_two() && N > 1);
        Self::make(
            Kind::Random(Source::DrownSigned { bound_bits }),
            shape,
            N,
            Domain::Coefficient,
        )
    }

    // --- structure ----------------------------------------------------------

    /// Sharing barrier: materialize this subtree once. Idempotent on nodes
    /// that are already cacheable.
    pub fn cache(&self) -> Self {
        if self.node.is_cacheable() {
            return self.clone();
        }
        Self::make(
            Kind::Cache(self.clone()),
            self.node.shape.clone(),
            self.node.lanes,
            self.node.domain,
        )
    }

    /// Insert a placeholder (broadcast) axis into the logical shape.
    pub fn unsqueeze(&self, dim: isize) -> Self {
        Self::make(
            Kind::Unsqueeze { inner: self.clone(), dim },
            self.node.shape.unsqueeze(dim),
            self.node.lanes,
            self.node.domain,
        )
    }

    /// Forward negacyclic NTT. Applying it to an inverse transform peels
    /// the inverse off instead of stacking kernels.
    pub fn ntt(&self) -> Self
    where
        M: crate::ints::NttModulus,
    {
        assert!(self.node.lanes > 1, "NTT needs polynomial-typed input");
        assert_eq!(self.node.domain, Domain::Coefficient, "NTT input must be coefficients");
        if let Kind::Intt { inner, .. } = &self.node.kind {
            return inner.clone();
        }
        Self::make(
            Kind::Ntt { inner: self.clone(), roots: ntt::build_roots::<M> },
            self.node.shape.clone(),
            self.node.lanes,
            Domain::Ntt,
        )
    }

    /// Inverse NTT.
    pub fn intt(&self) -> Self
    where
        M: crate::ints::NttModulus,
    {
        assert!(self.node.lanes > 1, "inverse NTT needs polynomial-typed input");
        assert_eq!(self.node.domain, Domain::Ntt, "inverse NTT input must be NTT-domain");
        if let Kind::Ntt { inner, .. } = &self.node.kind {
            return inner.clone();
        }
        Self::make(
            Kind::Intt { inner: self.clone(), roots: ntt::build_roots::<M> },
            self.node.shape.clone(),
            self.node.lanes,
            Domain::Coefficient,
        )
    }

    /// Sum over all logical axes; the result is rank-0 (lanes remain).
    pub fn sum(&self) -> Self {
        Self::make(Kind::Sum(self.clone()), Shape::scalar(), self.node.lanes, self.node.domain)
    }

    /// Contract `self (..., m, n)` with `rhs (..., n)` over the last logical
    /// axis. Operands must be placeholder-free with equal batch dimensions.
    pub fn mat_vec(&self, rhs: &Self) -> Self {
        let (l, r) = (&self.node, &rhs.node);
        assert!(l.shape.rank() >= 2, "matrix operand needs rank >= 2");
        assert_eq!(l.shape.rank(), r.shape.rank() + 1);
        assert!(
            !l.shape.has_placeholder() && !r.shape.has_placeholder(),
            "contraction operands must not carry broadcast axes"
        );
        assert_eq!(
            l.shape.extent(l.shape.rank() - 1),
            r.shape.extent(r.shape.rank() - 1),
            "contraction extents must agree"
        );
        for d in 0..r.shape.rank() - 1 {
            assert_eq!(l.shape.extent(d), r.shape.extent(d), "batch extents must agree");
        }
        let (lanes, domain) = combine_value_types(l, r, BinaryOp::Mul);
        let out_shape = l.shape.squeeze(-1, true);
        Self::make(Kind::MatVec { lhs: self.clone(), rhs: rhs.clone() }, out_shape, lanes, domain)
    }

    /// Negacyclic rotation by per-element optional degrees: element `(i…)`
    /// of the result is `±X^degrees(i…)` times polynomial `(i…)`. Degrees
    /// broadcast over non-lane axes only; the polynomial's lane axis must be
    /// a real extent.
    pub fn monomial_mul(&self, degrees: &Tensor<MonomialDegree>) -> Self {
        let n = &self.node;
        assert!(n.lanes > 1, "monomial multiplication needs polynomial-typed input");
        assert_eq!(n.domain, Domain::Coefficient, "monomial rotation acts on coefficients");
        let shape = common_shape(&n.shape, degrees.shape())
            .expect("degree tensor shape is incompatible with the polynomial shape");
        Self::make(
            Kind::MonomialMul { degrees: degrees.clone(), poly: self.clone() },
            shape,
            n.lanes,
            n.domain,
        )
    }

    /// Elementwise equality as a 0/1 scalar value.
    pub fn eq(&self, rhs: &Self) -> Self {
        self.binary(rhs, BinaryOp::Eq)
    }

    fn binary(&self, rhs: &Self, op: BinaryOp) -> Self {
        let (l, r) = (&self.node, &rhs.node);
        let shape = common_shape(&l.shape, &r.shape).expect("operand shapes have no common shape");
        let (lanes, domain) = combine_value_types(l, r, op);
        Self::make(
            Kind::Binary { op, left: self.clone(), right: rhs.clone() },
            shape,
            lanes,
            domain,
        )
    }
}

/// Lane/domain rules for pointwise operations: polynomial operands must
/// agree in lanes and domain; a scalar operand broadcasts over lanes, but
/// adding a scalar to coefficient-domain polynomials is rejected (it is not
/// addition of a constant polynomial).
fn combine_value_types<M: Modulus>(l: &Node<M>, r: &Node<M>, op: BinaryOp) -> (usize, Domain) {
    match (l.lanes, r.lanes) {
        (1, 1) => (1, Domain::Scalar),
        (p, 1) | (1, p) => {
            let poly = if l.lanes > 1 { l } else { r };
            if matches!(op, BinaryOp::Add | BinaryOp::Sub) {
                assert_eq!(
                    poly.domain,
                    Domain::Ntt,
                    "scalar addition to polynomials is only pointwise in the NTT domain"
                );
            }
            (p, poly.domain)
        }
        (p, q) => {
            assert_eq!(p, q, "polynomial operands must share the ring dimension");
            assert_eq!(l.domain, r.domain, "polynomial operands must share a domain");
            if matches!(op, BinaryOp::Mul) {
                assert_eq!(
                    l.domain,
                    Domain::Ntt,
                    "polynomial multiplication is pointwise only in the NTT domain"
                );
            }
            (p, l.domain)
        }
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<M: Modulus> core::ops::$trait for &Expr<M> {
            type Output = Expr<M>;

            fn $method(self, rhs: Self) -> Expr<M> {
                self.binary(rhs, $op)
            }
        }

        impl<M: Modulus> core::ops::$trait for Expr<M> {
            type Output = Expr<M>;

            fn $method(self, rhs: Self) -> Expr<M> {
                (&self).binary(&rhs, $op)
            }
        }

        impl<M: Modulus> core::ops::$trait<&Expr<M>> for Expr<M> {
            type Output = Expr<M>;

            fn $method(self, rhs: &Expr<M>) -> Expr<M> {
                (&self).binary(rhs, $op)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);

impl<M: Modulus> core::ops::Neg for &Expr<M> {
    type Output = Expr<M>;

    fn neg(self) -> Expr<M> {
        Expr::make(
            Kind::Neg(self.clone()),
            self.node.shape.clone(),
            self.node.lanes,
            self.node.domain,
        )
    }
}

impl<M: Modulus> core::ops::Neg for Expr<M> {
    type Output = Expr<M>;

    fn neg(self) -> Expr<M> {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::define_ntt_modulus!(
        struct Q17, 1, "17",
        two_adicity = 4, root = "3"
    );

    fn scalar_tensor(n: usize) -> Tensor<Mod<Q17>> {
        Tensor::from_fn(Shape::new(&[n]), |i| Mod::from_u64(i as u64))
    }

    #[test]
    fn shapes_combine() {
        let a = Expr::tensor(&scalar_tensor(4));
        let b = Expr::constant(Mod::from_u64(3));
        let c = &a + &b;
        assert_eq!(c.shape(), &Shape::new(&[4]));
        assert_eq!(c.lanes(), 1);
    }

    #[test]
    #[should_panic(expected = "common shape")]
    fn incompatible_shapes_rejected() {
        let a = Expr::tensor(&scalar_tensor(4));
        let b = Expr::tensor(&scalar_tensor(5));
        let _ = &a + &b;
    }

    #[test]
    fn ntt_of_intt_cancels() {
        let t = Tensor::from_fn(Shape::new(&[8]), |i| Mod::<Q17>::from_u64(i as u64));
        let p = Expr::poly_ntt::<8>(&t);
        let round = p.intt().ntt();
        assert_eq!(round.id(), p.id());
    }

    #[test]
    #[should_panic(expected = "NTT domain")]
    fn coefficient_product_rejected() {
        let t = Tensor::from_fn(Shape::new(&[8]), |i| Mod::<Q17>::from_u64(i as u64));
        let p = Expr::poly_coeff::<8>(&t);
        let _ = &p * &p;
    }

    #[test]
    fn cache_is_idempotent_on_cacheable() {
        let t = scalar_tensor(4);
        let e = Expr::tensor(&t);
        assert_eq!(e.cache().id(), e.id());
        let sum = &e + &e;
        let cached = sum.cache();
        assert_ne!(cached.id(), sum.id());
        assert_eq!(cached.cache().id(), cached.id());
    }

    #[test]
    fn unsqueeze_broadcasts() {
        let a = Expr::tensor(&scalar_tensor(4)).unsqueeze(0); // (_, 4)
        let b = Expr::tensor(&scalar_tensor(3)).unsqueeze(-1); // (3, _)
        let c = &a * &b;
        assert_eq!(c.shape(), &Shape::new(&[3, 4]));
    }
}
