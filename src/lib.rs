//! Homomorphic and multi-party computation over polynomial rings.
//!
//! Three layers make up the crate:
//!
//! - a fixed-precision integer core: limb primitives, bit-span views,
//!   multi-limb numerics, and the [`ints`] types `UInt`, `SInt`, and
//!   Montgomery-form [`ints::Mod`] over compile-time moduli;
//! - a polynomial ring engine for `Z_q[X]/(X^N + 1)` in coefficient and
//!   NTT representations, including the negacyclic transforms themselves;
//! - a deferred [`expr`] layer with an execution planner that fuses
//!   pointwise work, detects shared subexpressions, threads randomness as
//!   a capability, and dispatches kernels to a data-parallel [`exec`]
//!   executor.
//!
//! Ciphertext, share, and randomness shells sit on top of the expression
//! layer and preserve linearity through it; the [`net`] module defines the
//! transport interface, wire format, and error taxonomy for multi-party
//! deployments.
//!
//! ```
//! use ringplan::define_ntt_modulus;
//! use ringplan::expr::{planner::Queue, Expr};
//! use ringplan::shape::Shape;
//!
//! define_ntt_modulus!(struct Q, 1, "0xFFFFFFFF00000001",
//!     two_adicity = 32, root = "0x185629dcda58878c");
//!
//! let queue = Queue::new();
//! let noise = Expr::<Q>::centered_binomial::<1024>(Shape::new(&[4]), 10);
//! let transformed = noise.ntt();
//! let tensor = queue.run(&transformed);
//! assert_eq!(tensor.len(), 4 * 1024);
//! ```

pub mod core;
pub mod exec;
pub mod expr;
pub mod ints;
pub mod net;
pub mod random;
pub mod shape;
pub mod tensor;

pub use exec::{CpuExecutor, Executor};
pub use expr::cipher::{
    decode, decrypt, drowning_randomness, encrypt, keygen, randomness, Ciphertext,
    CiphertextExpr, EncRandomness, PublicKey, RandomnessExpr, SecretKey,
};
pub use expr::planner::{Evaluate, Queue};
pub use expr::share::{Share, Shares};
pub use expr::Expr;
pub use ints::{BitMonomial, Mod, Modulus, NttModulus, SInt, UInt};
pub use shape::Shape;
pub use tensor::{Element, Tensor};
