//! Additive secret-sharing shells over the expression layer.
//!
//! A [`Share`] labels a value with the party that owns it inside a
//! communicator; a [`Shares`] tuple holds one expression per party.
//! Addition is owner-invariant componentwise, multiplication by a public
//! expression distributes, and reconstruction is the sum of all parts. The
//! labels cost nothing at run time; they only constrain how the planner
//! packages results.

use crate::ints::modular::{Mod, Modulus};
use crate::net::{Communicator, PartyId};
use crate::tensor::Tensor;

use super::planner::Evaluate;
use super::Expr;

/// A value owned by `OWNER` within a communicator.
pub struct Share<M: Modulus, const OWNER: u32> {
    value: Expr<M>,
    communicator: Communicator,
}

impl<M: Modulus, const OWNER: u32> Clone for Share<M, OWNER> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone(), communicator: self.communicator.clone() }
    }
}

impl<M: Modulus, const OWNER: u32> Share<M, OWNER> {
    pub fn new(communicator: Communicator, value: Expr<M>) -> Self {
        assert!(
            communicator.contains(PartyId(OWNER)),
            "owner must be part of the communicator"
        );
        Self { value, communicator }
    }

    pub fn owner(&self) -> PartyId {
        PartyId(OWNER)
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn value(&self) -> &Expr<M> {
        &self.value
    }
}

impl<M: Modulus, const OWNER: u32> core::ops::Add for &Share<M, OWNER> {
    type Output = Share<M, OWNER>;

    fn add(self, rhs: Self) -> Share<M, OWNER> {
        assert_eq!(self.communicator, rhs.communicator);
        Share { value: &self.value + &rhs.value, communicator: self.communicator.clone() }
    }
}

impl<M: Modulus, const OWNER: u32> core::ops::Sub for &Share<M, OWNER> {
    type Output = Share<M, OWNER>;

    fn sub(self, rhs: Self) -> Share<M, OWNER> {
        assert_eq!(self.communicator, rhs.communicator);
        Share { value: &self.value - &rhs.value, communicator: self.communicator.clone() }
    }
}

/// Public-operand multiplication keeps the owner label.
impl<M: Modulus, const OWNER: u32> core::ops::Mul<&Expr<M>> for &Share<M, OWNER> {
    type Output = Share<M, OWNER>;

    fn mul(self, rhs: &Expr<M>) -> Share<M, OWNER> {
        Share { value: &self.value * rhs, communicator: self.communicator.clone() }
    }
}

impl<M: Modulus, const OWNER: u32> Evaluate<M> for Share<M, OWNER> {
    type Output = Tensor<Mod<M>>;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        roots.push(self.value.clone());
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        results.next().expect("missing share tensor")
    }
}

/// One expression per party of a communicator, in party order.
pub struct Shares<M: Modulus> {
    communicator: Communicator,
    parts: Vec<Expr<M>>,
}

impl<M: Modulus> Clone for Shares<M> {
    fn clone(&self) -> Self {
        Self { communicator: self.communicator.clone(), parts: self.parts.clone() }
    }
}

impl<M: Modulus> Shares<M> {
    pub fn from_parts(communicator: Communicator, parts: Vec<Expr<M>>) -> Self {
        assert_eq!(communicator.len(), parts.len(), "one share per party");
        Self { communicator, parts }
    }

    /// Additively share `secret`: all but the last part are uniform, the
    /// last is the difference. The uniform parts are shared subtrees, so
    /// the planner materializes each exactly once and the parts sum to the
    /// secret.
    pub fn split(communicator: Communicator, secret: &Expr<M>) -> Self {
        let n = communicator.len();
        assert!(n >= 1);
        let mut parts: Vec<Expr<M>> = Vec::with_capacity(n);
        let mut last = secret.clone();
        for _ in 0..n - 1 {
            let mask = if secret.lanes() > 1 {
                uniform_like(secret)
            } else {
                Expr::uniform(secret.shape().clone())
            };
            last = last - mask.clone();
            parts.push(mask);
        }
        parts.push(last);
        Self { communicator, parts }
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn part(&self, party: PartyId) -> &Expr<M> {
        let index = self.communicator.index_of(party).expect("party not in communicator");
        &self.parts[index]
    }

    pub fn parts(&self) -> &[Expr<M>] {
        &self.parts
    }

    /// The sum of all parts.
    pub fn reconstruct(&self) -> Expr<M> {
        let mut acc = self.parts[0].clone();
        for part in &self.parts[1..] {
            acc = acc + part;
        }
        acc
    }
}

fn uniform_like<M: Modulus>(secret: &Expr<M>) -> Expr<M> {
    use super::{Domain, Kind, Source};
    // Uniform polynomial mask in the secret's own domain (uniformity is
    // domain-independent).
    let node = super::Node {
        kind: Kind::Random(Source::Uniform),
        shape: secret.shape().clone(),
        lanes: secret.lanes(),
        domain: match secret.domain() {
            Domain::Scalar => Domain::Scalar,
            d => d,
        },
    };
    Expr { node: std::sync::Arc::new(node) }
}

impl<M: Modulus> core::ops::Add for &Shares<M> {
    type Output = Shares<M>;

    fn add(self, rhs: Self) -> Shares<M> {
        assert_eq!(self.communicator, rhs.communicator);
        Shares {
            communicator: self.communicator.clone(),
            parts: self
                .parts
                .iter()
                .zip(&rhs.parts)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }
}

impl<M: Modulus> core::ops::Sub for &Shares<M> {
    type Output = Shares<M>;

    fn sub(self, rhs: Self) -> Shares<M> {
        assert_eq!(self.communicator, rhs.communicator);
        Shares {
            communicator: self.communicator.clone(),
            parts: self
                .parts
                .iter()
                .zip(&rhs.parts)
                .map(|(a, b)| a - b)
                .collect(),
        }
    }
}

/// Public-operand multiplication distributes over the parts.
impl<M: Modulus> core::ops::Mul<&Expr<M>> for &Shares<M> {
    type Output = Shares<M>;

    fn mul(self, rhs: &Expr<M>) -> Shares<M> {
        Shares {
            communicator: self.communicator.clone(),
            parts: self.parts.iter().map(|p| p * rhs).collect(),
        }
    }
}

impl<M: Modulus> Evaluate<M> for Shares<M> {
    type Output = Vec<Tensor<Mod<M>>>;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        roots.extend(self.parts.iter().cloned());
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        self.parts.iter().map(|_| results.next().expect("missing share part")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CpuExecutor;
    use crate::expr::planner::Queue;
    use crate::shape::Shape;

    crate::define_modulus!(struct Q17, 1, "17");

    fn values(t: &Tensor<Mod<Q17>>) -> Vec<u64> {
        t.to_vec().iter().map(|m| m.to_limbs()[0]).collect()
    }

    fn secret_tensor() -> Tensor<Mod<Q17>> {
        Tensor::from_fn(Shape::new(&[6]), |i| Mod::from_u64(i as u64 * 3 % 17))
    }

    #[test]
    fn split_and_reconstruct() {
        let queue = Queue::with_key(CpuExecutor::new(), [1; 8]);
        let comm = Communicator::of(&[0, 1, 2]);
        let secret = secret_tensor();
        let shares = Shares::split(comm, &Expr::tensor(&secret));
        let out = queue.run(&shares.reconstruct());
        assert_eq!(values(&out), values(&secret));
    }

    #[test]
    fn parts_sum_to_the_secret() {
        let queue = Queue::with_key(CpuExecutor::new(), [2; 8]);
        let comm = Communicator::of(&[0, 1, 2, 3]);
        let secret = secret_tensor();
        let shares = Shares::split(comm, &Expr::tensor(&secret));
        let parts = queue.run(&shares);
        assert_eq!(parts.len(), 4);
        let mut sum = vec![Mod::<Q17>::ZERO; secret.len()];
        for part in &parts {
            for (acc, v) in sum.iter_mut().zip(part.to_vec()) {
                *acc += v;
            }
        }
        assert_eq!(sum, secret.to_vec());
        // A single uniform part is (overwhelmingly) not the secret itself.
        assert_ne!(values(&parts[0]), values(&secret));
    }

    #[test]
    fn share_arithmetic_is_componentwise() {
        let queue = Queue::with_key(CpuExecutor::new(), [3; 8]);
        let comm = Communicator::of(&[0, 1]);
        let x = secret_tensor();
        let y = Tensor::from_fn(Shape::new(&[6]), |i| Mod::from_u64(i as u64 + 1));
        let sx = Shares::split(comm.clone(), &Expr::tensor(&x));
        let sy = Shares::split(comm, &Expr::tensor(&y));
        let sum = &sx + &sy;
        let out = queue.run(&sum.reconstruct());
        let expected: Vec<u64> = x
            .to_vec()
            .iter()
            .zip(y.to_vec())
            .map(|(a, b)| (*a + b).to_limbs()[0])
            .collect();
        assert_eq!(values(&out), expected);
    }

    #[test]
    fn public_scalar_multiplication_distributes() {
        let queue = Queue::with_key(CpuExecutor::new(), [4; 8]);
        let comm = Communicator::of(&[0, 1]);
        let x = secret_tensor();
        let sx = Shares::split(comm, &Expr::tensor(&x));
        let c = Expr::constant(Mod::from_u64(5));
        let out = queue.run(&(&sx * &c).reconstruct());
        let expected: Vec<u64> =
            x.to_vec().iter().map(|a| (*a * Mod::from_u64(5)).to_limbs()[0]).collect();
        assert_eq!(values(&out), expected);
    }

    #[test]
    fn owner_labels_are_preserved() {
        let comm = Communicator::of(&[0, 1, 2]);
        let t = secret_tensor();
        let s: Share<Q17, 1> = Share::new(comm.clone(), Expr::tensor(&t));
        let doubled = &s + &s;
        assert_eq!(doubled.owner(), PartyId(1));
        assert_eq!(doubled.communicator(), &comm);
        let queue = Queue::with_key(CpuExecutor::new(), [5; 8]);
        let out = queue.run(&doubled);
        assert_eq!(out.len(), 6);
    }

    #[test]
    #[should_panic(expected = "owner must be part")]
    fn foreign_owner_rejected() {
        let comm = Communicator::of(&[0, 1]);
        let t = secret_tensor();
        let _: Share<Q17, 9> = Share::new(comm, Expr::tensor(&t));
    }
}
