//! Owning tensors of ring elements.
//!
//! A tensor stores its elements as one contiguous limb stream with the limb
//! index fastest-varying, so element `i` of a `LIMBS`-limb type occupies
//! `limbs[i * LIMBS .. (i + 1) * LIMBS]` and any single word is reachable by
//! an (element, limb) pair.
//!
//! Mutation goes through accessors whose lifetime is scoped to one kernel
//! submission. Accessor construction enforces the aliasing discipline at run
//! time: any number of concurrent readers, or one writer, never both. A
//! write accessor hands out lane writes through a shared reference because a
//! kernel's work items write disjoint elements; that contract is the
//! submitter's responsibility, like any data-parallel runtime.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use crate::core::limb::Limb;
use crate::shape::Shape;

/// A scalar element type storable in tensors.
pub trait Element: Copy + Send + Sync + 'static {
    const LIMBS: usize;

    fn from_limbs(limbs: &[Limb]) -> Self;
    fn to_limbs(&self, out: &mut [Limb]);
}

impl Element for Limb {
    const LIMBS: usize = 1;

    fn from_limbs(limbs: &[Limb]) -> Self {
        limbs[0]
    }

    fn to_limbs(&self, out: &mut [Limb]) {
        out[0] = *self;
    }
}

impl<M: crate::ints::Modulus> Element for crate::ints::Mod<M> {
    const LIMBS: usize = <M::Repr as crate::ints::Repr>::LIMBS;

    fn from_limbs(limbs: &[Limb]) -> Self {
        let mut repr = <M::Repr as crate::ints::Repr>::ZERO;
        crate::ints::Repr::as_limbs_mut(&mut repr).copy_from_slice(limbs);
        Self::from_montgomery(repr)
    }

    fn to_limbs(&self, out: &mut [Limb]) {
        out.copy_from_slice(crate::ints::Repr::as_limbs(self.montgomery_limbs()));
    }
}

impl<const B: u32, const L: usize> Element for crate::ints::UInt<B, L> {
    const LIMBS: usize = L;

    fn from_limbs(limbs: &[Limb]) -> Self {
        let mut arr = [0; L];
        arr.copy_from_slice(limbs);
        Self::from_limbs(arr)
    }

    fn to_limbs(&self, out: &mut [Limb]) {
        out.copy_from_slice(self.as_limbs());
    }
}

struct Storage {
    limbs: UnsafeCell<Box<[Limb]>>,
    /// 0 = idle, n > 0 = n readers, -1 = one writer.
    state: AtomicIsize,
}

// Accessor discipline (enforced below) makes shared access sound.
unsafe impl Sync for Storage {}
unsafe impl Send for Storage {}

impl Storage {
    fn acquire_read(&self) {
        let ok = self
            .state
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |s| (s >= 0).then_some(s + 1));
        assert!(ok.is_ok(), "read access while a write accessor is live");
    }

    fn release_read(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    fn acquire_write(&self) {
        let ok = self
            .state
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |s| (s == 0).then_some(-1));
        assert!(ok.is_ok(), "write access while another accessor is live");
    }

    fn release_write(&self) {
        self.state.store(0, Ordering::Release);
    }
}

/// Owning tensor of `T` with a [`Shape`]. Cloning is shallow; tensors are
/// handed to expression graphs by handle.
pub struct Tensor<T: Element> {
    storage: Arc<Storage>,
    shape: Shape,
    _marker: PhantomData<T>,
}

impl<T: Element> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage), shape: self.shape.clone(), _marker: PhantomData }
    }
}

impl<T: Element> Tensor<T> {
    /// Zero-filled tensor. Shapes with placeholders hold storage for the real
    /// extents only.
    pub fn zeroed(shape: Shape) -> Self {
        let len = shape.size() * T::LIMBS.max(1);
        Self {
            storage: Arc::new(Storage {
                limbs: UnsafeCell::new(vec![0; len].into_boxed_slice()),
                state: AtomicIsize::new(0),
            }),
            shape,
            _marker: PhantomData,
        }
    }

    pub fn from_fn(shape: Shape, mut f: impl FnMut(usize) -> T) -> Self {
        let tensor = Self::zeroed(shape);
        {
            let w = tensor.write();
            for i in 0..tensor.len() {
                w.set(i, f(i));
            }
        }
        tensor
    }

    pub fn from_elems(shape: Shape, elems: &[T]) -> Self {
        assert_eq!(shape.size(), elems.len());
        Self::from_fn(shape, |i| elems[i])
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the underlying storage; expression fingerprints key on it.
    pub fn storage_id(&self) -> usize {
        Arc::as_ptr(&self.storage) as usize
    }

    /// Read accessor scoped to one submission.
    pub fn read(&self) -> ReadAccessor<'_, T> {
        self.storage.acquire_read();
        ReadAccessor {
            ptr: unsafe { (*self.storage.limbs.get()).as_ptr() },
            elements: self.len(),
            storage: &self.storage,
            _marker: PhantomData,
        }
    }

    /// Write accessor scoped to one submission. Existing contents remain
    /// readable through [`WriteAccessor::get`].
    pub fn write(&self) -> WriteAccessor<'_, T> {
        self.storage.acquire_write();
        WriteAccessor {
            ptr: unsafe { (*self.storage.limbs.get()).as_mut_ptr() },
            elements: self.len(),
            storage: &self.storage,
            _marker: PhantomData,
        }
    }

    /// Convenience host-side copy of all elements.
    pub fn to_vec(&self) -> Vec<T> {
        let r = self.read();
        (0..self.len()).map(|i| r.get(i)).collect()
    }

    /// A tensor with fresh storage holding the same contents, reshaped.
    pub fn reshaped(&self, shape: Shape) -> Self {
        assert_eq!(shape.size(), self.len());
        let r = self.read();
        Tensor::from_fn(shape, |i| r.get(i))
    }
}

impl<T: Element + core::fmt::Debug> core::fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Tensor{:?}<{} elements>", self.shape, self.len())
    }
}

pub struct ReadAccessor<'t, T: Element> {
    ptr: *const Limb,
    elements: usize,
    storage: &'t Storage,
    _marker: PhantomData<T>,
}

unsafe impl<T: Element> Sync for ReadAccessor<'_, T> {}
unsafe impl<T: Element> Send for ReadAccessor<'_, T> {}

impl<T: Element> ReadAccessor<'_, T> {
    #[inline]
    pub fn get(&self, i: usize) -> T {
        assert!(i < self.elements, "element index out of range");
        let l = T::LIMBS;
        let limbs = unsafe { std::slice::from_raw_parts(self.ptr.add(i * l), l) };
        T::from_limbs(limbs)
    }

    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }
}

impl<T: Element> Drop for ReadAccessor<'_, T> {
    fn drop(&mut self) {
        self.storage.release_read();
    }
}

pub struct WriteAccessor<'t, T: Element> {
    ptr: *mut Limb,
    elements: usize,
    storage: &'t Storage,
    _marker: PhantomData<T>,
}

unsafe impl<T: Element> Sync for WriteAccessor<'_, T> {}
unsafe impl<T: Element> Send for WriteAccessor<'_, T> {}

impl<T: Element> WriteAccessor<'_, T> {
    /// Write element `i`. Work items of one kernel must write disjoint
    /// elements.
    #[inline]
    pub fn set(&self, i: usize, value: T) {
        assert!(i < self.elements, "element index out of range");
        let l = T::LIMBS;
        let limbs = unsafe { std::slice::from_raw_parts_mut(self.ptr.add(i * l), l) };
        value.to_limbs(limbs);
    }

    /// Read back element `i` (read-write access). Only sound for elements no
    /// other work item writes concurrently.
    #[inline]
    pub fn get(&self, i: usize) -> T {
        assert!(i < self.elements, "element index out of range");
        let l = T::LIMBS;
        let limbs = unsafe { std::slice::from_raw_parts(self.ptr.add(i * l) as *const Limb, l) };
        T::from_limbs(limbs)
    }

    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }
}

impl<T: Element> Drop for WriteAccessor<'_, T> {
    fn drop(&mut self) {
        self.storage.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_modulus;
    use crate::ints::Mod;

    define_modulus!(struct Q17, 1, "17");

    #[test]
    fn stores_elements() {
        let t = Tensor::<Limb>::from_fn(Shape::new(&[4, 2]), |i| i as u64 * 3);
        assert_eq!(t.to_vec(), vec![0, 3, 6, 9, 12, 15, 18, 21]);
    }

    #[test]
    fn modular_elements_round_trip() {
        let t = Tensor::<Mod<Q17>>::from_fn(Shape::new(&[17]), |i| Mod::from_u64(i as u64));
        let back: Vec<u64> = t.to_vec().iter().map(|m| m.to_limbs()[0]).collect();
        assert_eq!(back, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn accessor_discipline() {
        let t = Tensor::<Limb>::zeroed(Shape::new(&[4]));
        let r1 = t.read();
        let r2 = t.read();
        drop(r1);
        drop(r2);
        let w = t.write();
        w.set(0, 7);
        drop(w);
        assert_eq!(t.to_vec()[0], 7);
    }

    #[test]
    #[should_panic(expected = "write access")]
    fn writer_excludes_reader() {
        let t = Tensor::<Limb>::zeroed(Shape::new(&[4]));
        let _r = t.read();
        let _w = t.write();
    }

    #[test]
    fn shared_storage_handle() {
        let t = Tensor::<Limb>::zeroed(Shape::new(&[4]));
        let u = t.clone();
        assert_eq!(t.storage_id(), u.storage_id());
        {
            let w = t.write();
            w.set(2, 5);
        }
        assert_eq!(u.to_vec()[2], 5);
    }
}
