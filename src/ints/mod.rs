//! Integer and polynomial element types.

pub mod bit_monomial;
pub mod literals;
pub mod modular;
pub mod poly;
pub mod uint;

pub use bit_monomial::BitMonomial;
pub use modular::{Mod, Modulus, NttModulus, Repr, STATISTICAL_SECURITY};
pub use poly::{Coefficient, Ntt, Poly, PolyMod, Representation};
pub use uint::{add_width, mul_width, SInt, UInt};
