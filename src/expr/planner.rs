//! The execution planner: trace, decide, plan, dispatch.
//!
//! A [`Queue`] turns a set of root expressions into materialized tensors:
//!
//! 1. **Trace.** Walk each root top-down. For every cacheable node, record
//!    how it is reached from its nearest enclosing cacheable ancestor —
//!    including whether any step on the path reads multiply (declared
//!    `Multiple` access, or a broadcast placeholder axis meeting a real
//!    extent).
//! 2. **Decide.** A cacheable node is materialized iff it is a root, a
//!    complex node, or reached from more than one place (or one place with
//!    an effectively multiple pattern). Everything else fuses into its
//!    consumer.
//! 3. **Plan.** One tensor per chosen node, keyed by a structural
//!    fingerprint so identical expressions share storage. A `cache(x)`
//!    barrier shares `x`'s fingerprint, so an occurrence of `x` outside the
//!    barrier reads the materialized tensor.
//! 4. **Dispatch.** In dependency order: simple nodes become one
//!    data-parallel kernel evaluating their fused region per output element;
//!    complex nodes (NTT, reductions, contractions) own their multi-pass
//!    dispatch.
//!
//! Nodes declaring the randomness capability get a per-work-item generator:
//! the nonce is taken from the queue and advanced by the number of elements
//! materialized, the counter is the work item's linear index scaled by the
//! region's keystream demand. Re-evaluating the same plan yields the same
//! samples; separate evaluations draw disjoint streams.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::exec::{CpuExecutor, DeviceInfo, Executor};
use crate::ints::bit_monomial::MonomialDegree;
use crate::ints::modular::{Mod, Modulus};
use crate::ints::poly::monomial_lane;
use crate::random::{self, DefaultGenerator, NumberGenerator, KEY_WORDS};
use crate::shape::{project, resolve_dim, MultiIndex, Shape};
use crate::tensor::{ReadAccessor, Tensor};

use super::ntt::{self, RootsKey};
use super::{Access, BinaryOp, Expr, Kind, Node, Source};

/// Something the queue can evaluate: a single expression or a typed record
/// of expressions (ciphertexts, randomness triples, share tuples). Records
/// plan all their component roots together, so common subexpressions are
/// shared across components.
pub trait Evaluate<M: Modulus> {
    type Output;

    fn collect(&self, roots: &mut Vec<Expr<M>>);
    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output;
}

impl<M: Modulus> Evaluate<M> for Expr<M> {
    type Output = Tensor<Mod<M>>;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        roots.push(self.clone());
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        results.next().expect("planner returned too few tensors")
    }
}

impl<M: Modulus, T: Evaluate<M>> Evaluate<M> for &T {
    type Output = T::Output;

    fn collect(&self, roots: &mut Vec<Expr<M>>) {
        (*self).collect(roots);
    }

    fn assemble(&self, results: &mut std::vec::IntoIter<Tensor<Mod<M>>>) -> Self::Output {
        (*self).assemble(results)
    }
}

macro_rules! impl_evaluate_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<M: Modulus, $($name: Evaluate<M>),+> Evaluate<M> for ($($name,)+) {
            type Output = ($($name::Output,)+);

            fn collect(&self, roots: &mut Vec<Expr<M>>) {
                $(self.$idx.collect(roots);)+
            }

            fn assemble(
                &self,
                results: &mut std::vec::IntoIter<Tensor<Mod<M>>>,
            ) -> Self::Output {
                ($(self.$idx.assemble(results),)+)
            }
        }
    };
}

impl_evaluate_tuple!(A: 0);
impl_evaluate_tuple!(A: 0, B: 1);
impl_evaluate_tuple!(A: 0, B: 1, C: 2);
impl_evaluate_tuple!(A: 0, B: 1, C: 2, D: 3);

/// Randomness configuration of one kernel region.
struct RngConfig {
    key: [u32; KEY_WORDS],
    nonce: [u32; 2],
    blocks_per_item: u64,
}

/// Everything a kernel needs to evaluate a fused region: boundary tensors
/// (materialized descendants), leaf accessors, fingerprints, and the
/// randomness configuration.
pub(crate) struct RegionEnv<'a, M: Modulus> {
    fingerprints: &'a HashMap<usize, u64>,
    boundary: HashMap<u64, ReadAccessor<'a, Mod<M>>>,
    tensor_reads: HashMap<usize, ReadAccessor<'a, Mod<M>>>,
    degree_reads: HashMap<usize, ReadAccessor<'a, MonomialDegree>>,
    root_fp: u64,
    rng: Option<RngConfig>,
}

impl<M: Modulus> RegionEnv<'_, M> {
    /// Per-work-item generator, positioned at this item's keystream blocks.
    pub(crate) fn rng_for_item(&self, item: usize) -> Option<DefaultGenerator> {
        let cfg = self.rng.as_ref()?;
        let mut g = NumberGenerator::new(cfg.key, cfg.nonce);
        g.seek(item as u64 * cfg.blocks_per_item);
        Some(g)
    }

    /// Evaluate `expr` at `index` (an index in `expr`'s element shape),
    /// reading materialized boundaries instead of recursing into them.
    pub(crate) fn eval(
        &self,
        rng: &mut Option<DefaultGenerator>,
        expr: &Expr<M>,
        index: &MultiIndex,
    ) -> Mod<M> {
        let fp = self.fingerprints[&expr.id()];
        if fp != self.root_fp {
            if let Some(acc) = self.boundary.get(&fp) {
                return acc.get(expr.node.element_shape().to_linear(index));
            }
        }
        self.eval_kind(rng, &expr.node, expr.id(), index)
    }

    /// Evaluate a node by kind, without the boundary shortcut; kernel entry
    /// point for region roots.
    pub(crate) fn eval_kind(
        &self,
        rng: &mut Option<DefaultGenerator>,
        node: &Node<M>,
        node_id: usize,
        index: &MultiIndex,
    ) -> Mod<M> {
        match &node.kind {
            Kind::TensorView(_) => {
                let acc = &self.tensor_reads[&node_id];
                acc.get(node.element_shape().to_linear(index))
            }
            Kind::Constant(c) => *c,
            Kind::Random(source) => {
                let g = rng.as_mut().expect("randomness capability was not provided");
                match source {
                    Source::CenteredBinomial { variance } => {
                        Mod::from_i64(random::centered_binomial(g, *variance))
                    }
                    Source::Uniform => random::uniform_mod(g),
                    Source::DrownUnsigned { bound_bits } => {
                        random::drown_unsigned_uniform_mod(g, *bound_bits)
                    }
                    Source::DrownSigned { bound_bits } => {
                        random::drown_signed_uniform_mod(g, *bound_bits)
                    }
                }
            }
            Kind::Neg(inner) => -self.eval(rng, inner, &child_index(node, &inner.node, index)),
            Kind::Binary { op, left, right } => {
                let l = self.eval(rng, left, &child_index(node, &left.node, index));
                let r = self.eval(rng, right, &child_index(node, &right.node, index));
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Eq => {
                        if l == r {
                            Mod::ONE
                        } else {
                            Mod::ZERO
                        }
                    }
                }
            }
            Kind::MonomialMul { degrees, poly } => {
                let lanes = node.lanes;
                let logical = MultiIndex::from_slice(&index.as_slice()[..node.shape.rank()]);
                let deg_index = project(&logical, degrees.shape());
                let acc = &self.degree_reads[&node_id];
                let degree = acc.get(degrees.shape().to_linear(&deg_index));
                let Some(d) = degree.0 else {
                    return Mod::ZERO;
                };
                let lane = index.get(index.rank() - 1);
                let (j, flip) = monomial_lane(lanes, lane, d as usize);
                let mut inner_index = child_index(node, &poly.node, index);
                inner_index.set(inner_index.rank() - 1, j);
                let value = self.eval(rng, poly, &inner_index);
                if flip {
                    -value
                } else {
                    value
                }
            }
            Kind::Unsqueeze { inner, dim } => {
                let pos = resolve_dim(*dim, inner.node.shape.rank() + 1);
                let mut coords = Vec::with_capacity(index.rank() - 1);
                for (d, &c) in index.as_slice().iter().enumerate() {
                    if d != pos {
                        coords.push(c);
                    }
                }
                self.eval(rng, inner, &MultiIndex::from_slice(&coords))
            }
            Kind::Cache(inner) => self.eval(rng, inner, index),
            Kind::Ntt { .. } | Kind::Intt { .. } | Kind::Sum(_) | Kind::MatVec { .. } => {
                unreachable!("complex nodes are always materialized before use")
            }
        }
    }
}

/// Index of a pointwise child: project the logical part onto the child's
/// shape (zeroing broadcast axes, collapsing rank 0), keep the lane
/// coordinate for polynomial-typed children, drop it for scalars.
fn child_index<M: Modulus>(parent: &Node<M>, child: &Node<M>, index: &MultiIndex) -> MultiIndex {
    let p_rank = parent.shape.rank();
    let logical = MultiIndex::from_slice(&index.as_slice()[..p_rank]);
    let projected = project(&logical, &child.shape);
    if child.lanes > 1 {
        debug_assert_eq!(parent.lanes, child.lanes);
        let mut coords = projected.as_slice().to_vec();
        coords.push(index.get(index.rank() - 1));
        MultiIndex::from_slice(&coords)
    } else {
        projected
    }
}

fn broadcast_step<M: Modulus>(parent: &Node<M>, child: &Node<M>) -> bool {
    // Rank-0 broadcast operands do not force materialization.
    if child.shape.rank() == 0 || child.shape.rank() != parent.shape.rank() {
        return false;
    }
    child
        .shape
        .extents()
        .iter()
        .zip(parent.shape.extents())
        .any(|(c, p)| {
            matches!(c, crate::shape::Extent::Placeholder)
                && matches!(p, crate::shape::Extent::Fixed(_))
        })
}

fn fingerprint<M: Modulus>(expr: &Expr<M>, memo: &mut HashMap<usize, u64>) -> u64 {
    if let Some(fp) = memo.get(&expr.id()) {
        return *fp;
    }
    let node = &expr.node;
    let fp = match &node.kind {
        // A cache barrier shares its inner fingerprint: occurrences of the
        // subtree outside the barrier see the materialized tensor.
        Kind::Cache(inner) => fingerprint(inner, memo),
        kind => {
            let mut h = DefaultHasher::new();
            match kind {
                Kind::TensorView(t) => {
                    ("tensor", t.storage_id(), &node.shape, node.lanes, node.domain).hash(&mut h);
                }
                Kind::Constant(c) => {
                    ("const", c.montgomery_limbs()).hash(&mut h);
                }
                // Distinct random nodes are distinct sources by identity.
                Kind::Random(_) => ("random", expr.id()).hash(&mut h),
                Kind::Neg(a) => ("neg", fingerprint(a, memo)).hash(&mut h),
                Kind::Binary { op, left, right } => {
                    ("binary", *op as u8, fingerprint(left, memo), fingerprint(right, memo))
                        .hash(&mut h);
                }
                Kind::MonomialMul { degrees, poly } => {
                    ("monomial", degrees.storage_id(), fingerprint(poly, memo)).hash(&mut h);
                }
                Kind::Ntt { inner, .. } => ("ntt", fingerprint(inner, memo)).hash(&mut h),
                Kind::Intt { inner, .. } => ("intt", fingerprint(inner, memo)).hash(&mut h),
                Kind::Sum(inner) => ("sum", fingerprint(inner, memo)).hash(&mut h),
                Kind::MatVec { lhs, rhs } => {
                    ("matvec", fingerprint(lhs, memo), fingerprint(rhs, memo)).hash(&mut h);
                }
                Kind::Unsqueeze { inner, dim } => {
                    ("unsqueeze", *dim, fingerprint(inner, memo)).hash(&mut h);
                }
                Kind::Cache(_) => unreachable!(),
            }
            h.finish()
        }
    };
    memo.insert(expr.id(), fp);
    fp
}

/// Fused region summary: leaves, materialized boundaries, keystream demand.
struct Region<M: Modulus> {
    boundary_fps: Vec<u64>,
    tensor_views: Vec<(usize, Tensor<Mod<M>>)>,
    degree_views: Vec<(usize, Tensor<MonomialDegree>)>,
    words_per_eval: usize,
}

/// The evaluation queue: owns the executor, the process-wide roots-table
/// memo, and the randomness state.
pub struct Queue<E: Executor = CpuExecutor> {
    executor: E,
    rng_key: [u32; KEY_WORDS],
    nonce: Cell<u64>,
    extra_tensors: RefCell<HashMap<RootsKey, Box<dyn Any>>>,
}

impl Queue<CpuExecutor> {
    /// Single-threaded CPU queue with an OS-seeded randomness key.
    pub fn new() -> Self {
        Self::with_executor(CpuExecutor::new())
    }
}

impl Default for Queue<CpuExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Executor> Queue<E> {
    pub fn with_executor(executor: E) -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let key: [u32; KEY_WORDS] = core::array::from_fn(|_| rng.gen());
        Self::with_key(executor, key)
    }

    /// Deterministic queue for reproducible evaluation.
    pub fn with_key(executor: E, key: [u32; KEY_WORDS]) -> Self {
        Self {
            executor,
            rng_key: key,
            nonce: Cell::new(0),
            extra_tensors: RefCell::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn wait(&self) {
        self.executor.wait();
    }

    pub fn info(&self) -> DeviceInfo {
        self.executor.info()
    }

    pub fn submission_count(&self) -> u64 {
        self.executor.submission_count()
    }

    /// Evaluate expressions (or expression records) to tensors.
    pub fn run<M: Modulus, Ev: Evaluate<M>>(&self, roots: Ev) -> Ev::Output {
        let mut raw = Vec::new();
        roots.collect(&mut raw);
        let results = self.run_roots(&raw);
        let mut iter = results.into_iter();
        let out = roots.assemble(&mut iter);
        assert!(iter.next().is_none(), "planner returned too many tensors");
        out
    }

    fn run_roots<M: Modulus>(&self, raw: &[Expr<M>]) -> Vec<Tensor<Mod<M>>> {
        let roots: Vec<Expr<M>> = raw.iter().map(|e| e.cache()).collect();
        for r in &roots {
            assert!(
                !r.shape().has_placeholder(),
                "root expressions must not have placeholder axes"
            );
        }

        // Fingerprints for every reachable node, and a representative per
        // cacheable fingerprint. Structurally identical cacheable subtrees
        // share one fingerprint (a cache barrier shares its inner's), which
        // is what lets an occurrence outside a barrier see the tensor.
        let mut fps = HashMap::new();
        for r in &roots {
            fingerprint(r, &mut fps);
        }
        let mut reps: HashMap<u64, Expr<M>> = HashMap::new();
        {
            let mut stack: Vec<Expr<M>> = roots.clone();
            let mut visited: HashSet<usize> = HashSet::new();
            while let Some(e) = stack.pop() {
                if !visited.insert(e.id()) {
                    continue;
                }
                if e.node.is_cacheable() {
                    reps.entry(fps[&e.id()]).or_insert_with(|| e.clone());
                }
                for i in 0..e.node.arity() {
                    stack.push(e.node.child(i).clone());
                }
            }
        }

        // Trace: per cacheable fingerprint, how its region reaches other
        // cacheable fingerprints.
        let root_fps: HashSet<u64> = roots.iter().map(|r| fps[&r.id()]).collect();
        let mut traces: HashMap<u64, Vec<bool>> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();
        let mut processed: HashSet<u64> = HashSet::new();
        let mut pending: Vec<u64> = roots.iter().map(|r| fps[&r.id()]).collect();
        while let Some(fp) = pending.pop() {
            if !processed.insert(fp) {
                continue;
            }
            order.push(fp);
            let rep = reps[&fp].clone();
            for i in 0..rep.node.arity() {
                let child = rep.node.child(i).clone();
                let multiple = rep.node.access(i) == Access::Multiple
                    || broadcast_step(&rep.node, &child.node);
                trace_region(child, multiple, fp, &fps, &reps, &mut traces, &mut pending);
            }
        }

        // Decide and plan: allocate one tensor per chosen fingerprint.
        let mut tensors: HashMap<u64, Tensor<Mod<M>>> = HashMap::new();
        for fp in &order {
            let rep = &reps[fp];
            if matches!(rep.node.kind, Kind::TensorView(_)) {
                continue;
            }
            let empty = Vec::new();
            let tr = traces.get(fp).unwrap_or(&empty);
            let chosen = root_fps.contains(fp)
                || rep.node.is_complex()
                || tr.len() > 1
                || tr.iter().any(|&m| m);
            if chosen {
                tensors.insert(*fp, Tensor::zeroed(rep.node.element_shape()));
            }
        }

        // Dispatch in dependency order.
        let mut emitted: HashSet<u64> = HashSet::new();
        for r in &roots {
            self.schedule(fps[&r.id()], &fps, &tensors, &reps, &mut emitted);
        }

        roots
            .iter()
            .map(|r| match &r.node.kind {
                Kind::TensorView(t) => t.clone(),
                _ => tensors[&fps[&r.id()]].clone(),
            })
            .collect()
    }

    fn schedule<M: Modulus>(
        &self,
        fp: u64,
        fps: &HashMap<usize, u64>,
        tensors: &HashMap<u64, Tensor<Mod<M>>>,
        reps: &HashMap<u64, Expr<M>>,
        emitted: &mut HashSet<u64>,
    ) {
        let rep = reps[&fp].clone();
        if matches!(rep.node.kind, Kind::TensorView(_)) {
            return;
        }
        if !emitted.insert(fp) {
            return;
        }

        let region = collect_region::<M>(&rep, fp, fps, tensors);
        for dep in &region.boundary_fps {
            self.schedule(*dep, fps, tensors, reps, emitted);
        }
        self.emit(&rep, fp, &region, fps, tensors);
    }

    fn emit<M: Modulus>(
        &self,
        expr: &Expr<M>,
        fp: u64,
        region: &Region<M>,
        fps: &HashMap<usize, u64>,
        tensors: &HashMap<u64, Tensor<Mod<M>>>,
    ) {
        let node = &expr.node;
        let out = &tensors[&fp];
        let out_elements = out.len() as u64;

        // Evaluations one work item performs, for keystream striding.
        let evals_per_item: u64 = match &node.kind {
            Kind::Ntt { .. } | Kind::Intt { .. } => 2,
            Kind::Sum(inner) => {
                let items = inner.shape().size();
                items.div_ceil(chunk_count(items)) as u64
            }
            _ => 1,
        };

        let rng = if region.words_per_eval > 0 {
            let nonce = self.nonce.get();
            self.nonce.set(nonce + out_elements);
            let words_per_item = evals_per_item * region.words_per_eval as u64;
            Some(RngConfig {
                key: self.rng_key,
                nonce: [nonce as u32, (nonce >> 32) as u32],
                blocks_per_item: words_per_item.div_ceil(16),
            })
        } else {
            None
        };

        let env = RegionEnv {
            fingerprints: fps,
            boundary: region
                .boundary_fps
                .iter()
                .map(|dep| (*dep, tensors[dep].read()))
                .collect(),
            tensor_reads: region
                .tensor_views
                .iter()
                .map(|(id, t)| (*id, t.read()))
                .collect(),
            degree_reads: region
                .degree_views
                .iter()
                .map(|(id, t)| (*id, t.read()))
                .collect(),
            root_fp: fp,
            rng,
        };

        match &node.kind {
            Kind::Ntt { inner, roots } | Kind::Intt { inner, roots } => {
                let inverse = matches!(node.kind, Kind::Intt { .. });
                let table = self.roots_table::<M>(inner.lanes(), inverse, *roots);
                ntt::dispatch(&self.executor, &env, inner, out, &table, inverse);
            }
            Kind::Sum(inner) => self.dispatch_sum(&env, inner, out),
            Kind::MatVec { lhs, rhs } => self.dispatch_mat_vec(&env, node, lhs, rhs, out),
            _ => {
                let eshape = node.element_shape();
                let write = out.write();
                self.executor.submit(out.len(), &|i| {
                    let index = eshape.from_linear(i);
                    let mut rng = env.rng_for_item(i);
                    write.set(i, env.eval_kind(&mut rng, node, expr.id(), &index));
                });
            }
        }
    }

    fn roots_table<M: Modulus>(
        &self,
        n: usize,
        inverse: bool,
        builder: super::RootsBuilder<M>,
    ) -> Tensor<Mod<M>> {
        let key = ntt::roots_key::<M>(n, inverse);
        let mut map = self.extra_tensors.borrow_mut();
        let entry = map.entry(key).or_insert_with(|| Box::new(builder(n, inverse)));
        entry
            .downcast_ref::<Tensor<Mod<M>>>()
            .expect("roots table entry has the wrong element type")
            .clone()
    }

    /// Two-pass reduction over all logical axes; lanes reduce independently.
    fn dispatch_sum<M: Modulus>(
        &self,
        env: &RegionEnv<'_, M>,
        inner: &Expr<M>,
        out: &Tensor<Mod<M>>,
    ) {
        let lanes = inner.lanes();
        let items = inner.shape().size();
        let chunks = chunk_count(items);
        let chunk_len = items.div_ceil(chunks);
        let eshape = inner.node.element_shape();

        let partial = Tensor::<Mod<M>>::zeroed(Shape::new(&[chunks, lanes]));
        {
            let write = partial.write();
            self.executor.submit(chunks * lanes, &|id| {
                let chunk = id / lanes;
                let lane = id % lanes;
                let mut rng = env.rng_for_item(id);
                let mut acc = Mod::ZERO;
                for item in chunk * chunk_len..((chunk + 1) * chunk_len).min(items) {
                    acc += env.eval(&mut rng, inner, &eshape.from_linear(item * lanes + lane));
                }
                write.set(id, acc);
            });
        }
        {
            let read = partial.read();
            let write = out.write();
            self.executor.submit(lanes, &|lane| {
                let mut acc = Mod::ZERO;
                for chunk in 0..chunks {
                    acc += read.get(chunk * lanes + lane);
                }
                write.set(lane, acc);
            });
        }
    }

    /// Contraction kernel: one work item per output element, looping over
    /// the contracted axis. Its inputs are materialized by the `Multiple`
    /// access pattern, so the loop reads tensors.
    fn dispatch_mat_vec<M: Modulus>(
        &self,
        env: &RegionEnv<'_, M>,
        node: &Node<M>,
        lhs: &Expr<M>,
        rhs: &Expr<M>,
        out: &Tensor<Mod<M>>,
    ) {
        let contract = match rhs.shape().extent(rhs.shape().rank() - 1) {
            crate::shape::Extent::Fixed(n) => n,
            crate::shape::Extent::Placeholder => unreachable!("rejected at construction"),
        };
        let lanes = node.lanes;
        let out_eshape = node.element_shape();
        let out_rank = node.shape.rank();

        let write = out.write();
        self.executor.submit(out.len(), &|id| {
            let index = out_eshape.from_linear(id);
            let mut rng = env.rng_for_item(id);
            let lane = if lanes > 1 { Some(index.get(index.rank() - 1)) } else { None };

            let mut acc = Mod::ZERO;
            for j in 0..contract {
                // lhs: (batch..., i, j, [lane]); rhs: (batch..., j, [lane])
                let mut lhs_coords: Vec<usize> = index.as_slice()[..out_rank].to_vec();
                lhs_coords.push(j);
                let mut rhs_coords: Vec<usize> = index.as_slice()[..out_rank - 1].to_vec();
                rhs_coords.push(j);
                if let Some(l) = lane {
                    lhs_coords.push(l);
                    rhs_coords.push(l);
                }
                let l = env.eval(&mut rng, lhs, &MultiIndex::from_slice(&lhs_coords));
                let r = env.eval(&mut rng, rhs, &MultiIndex::from_slice(&rhs_coords));
                acc += l * r;
            }
            write.set(id, acc);
        });
    }
}

fn chunk_count(items: usize) -> usize {
    items.clamp(1, 64)
}

/// Descend a region, recording a trace whenever a cacheable *structure* is
/// reached — whether through a cacheable node or a bare structurally
/// identical subtree. A barrier's inner subtree shares the region's own
/// fingerprint and is traversed, not traced.
fn trace_region<M: Modulus>(
    expr: Expr<M>,
    multiple: bool,
    root_fp: u64,
    fps: &HashMap<usize, u64>,
    reps: &HashMap<u64, Expr<M>>,
    traces: &mut HashMap<u64, Vec<bool>>,
    pending: &mut Vec<u64>,
) {
    let fp = fps[&expr.id()];
    if fp != root_fp && reps.contains_key(&fp) {
        traces.entry(fp).or_default().push(multiple);
        pending.push(fp);
        return;
    }
    for i in 0..expr.node.arity() {
        let child = expr.node.child(i).clone();
        let step = expr.node.access(i) == Access::Multiple
            || broadcast_step(&expr.node, &child.node);
        trace_region(child, multiple || step, root_fp, fps, reps, traces, pending);
    }
}

fn collect_region<M: Modulus>(
    root: &Expr<M>,
    root_fp: u64,
    fps: &HashMap<usize, u64>,
    tensors: &HashMap<u64, Tensor<Mod<M>>>,
) -> Region<M> {
    let mut region = Region {
        boundary_fps: Vec::new(),
        tensor_views: Vec::new(),
        degree_views: Vec::new(),
        words_per_eval: 0,
    };
    let mut seen_boundary = HashSet::new();
    let mut stack: Vec<(Expr<M>, bool)> = vec![(root.clone(), true)];
    while let Some((e, is_root)) = stack.pop() {
        let fp = fps[&e.id()];
        if !is_root && fp != root_fp && tensors.contains_key(&fp) {
            if seen_boundary.insert(fp) {
                region.boundary_fps.push(fp);
            }
            continue;
        }
        match &e.node.kind {
            Kind::TensorView(t) => region.tensor_views.push((e.id(), t.clone())),
            Kind::Random(source) => {
                debug_assert_eq!(e.node.capabilities(), [super::Capability::Randomness]);
                region.words_per_eval += source.words::<M>();
            }
            Kind::MonomialMul { degrees, .. } => {
                region.degree_views.push((e.id(), degrees.clone()));
                stack.push((e.node.child(0).clone(), false));
            }
            _ => {
                for i in 0..e.node.arity() {
                    stack.push((e.node.child(i).clone(), false));
                }
            }
        }
    }
    region
}
