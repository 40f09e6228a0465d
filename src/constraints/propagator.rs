//! Constraint propagation over the operation dependency graph.
//!
//! Every live operation is a node of a [`DirectedGraph`]; an edge `a -> b` means `b`
//! reads an output of `a`. The strongly connected components of that graph are
//! processed in topological order, so every input of a component is final before
//! the component is evaluated:
//!
//! - an acyclic component (one operation, no self edge) is evaluated once
//! - a cyclic component (a loop through phis) starts at bottom and is re-evaluated
//!   until nothing changes, at most `max_rounds` times. A component that is still
//!   changing after that is widened to top, which is always sound.
//!
//! Branch conditions refine the result. Each edge of an `if` or `switch` narrows
//! its operands to the values that take it, and an edge whose narrowed operands
//! come out empty is never taken. The narrowed values are collected per block in
//! reverse postorder, joining over the feasible incoming edges. A second pass
//! evaluates every operation under the facts of its block and every phi input
//! under the facts of its edge. Passes repeat while the facts keep changing, up
//! to [`REFINEMENT_PASSES`].
//!
//! The result is a [`Solution`]: one constraint per variable, the facts known on
//! entry to each block, and the branch targets those leave feasible.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    bytecode::{
        ArithOp, ClassFlags, ClassOracle, CompareKind, Cond, NarrowKind, TypeDesc, ValueKind,
        OBJECT,
    },
    constraints::lattice::{
        type_name, Constraint, FloatConstraint, IntRange, JoinSemiLattice, MeetSemiLattice,
        ObjectConstraint,
    },
    ir::{BlockId, MethodGraph, OpId, OpKind, Operation, Terminator, VarId, VarType},
    utils::graph::{
        algorithms::{is_cyclic_component, reverse_postorder, strongly_connected_components},
        DirectedGraph, GraphBase, NodeId,
    },
    Result,
};

/// Upper bound on evaluation passes over a graph; the first runs without branch
/// facts.
pub const REFINEMENT_PASSES: usize = 3;

/// Narrowed constraints that hold on entry to a block, or `None` when no
/// feasible edge reaches it.
type BlockFacts = Option<BTreeMap<VarId, Constraint>>;

/// Constraints computed for every variable of a graph.
#[derive(Debug, Clone)]
pub struct Solution {
    values: Vec<Constraint>,
    blocks: Vec<BlockFacts>,
}

impl Solution {
    /// Derives the per-block facts the branches of `graph` establish over
    /// `values`.
    fn with_facts(graph: &MethodGraph, values: Vec<Constraint>) -> Self {
        let mut solution = Solution {
            values,
            blocks: vec![None; graph.node_count()],
        };
        let order = reverse_postorder(graph, graph.entry());
        let mut rank = vec![usize::MAX; graph.node_count()];
        for (i, &block) in order.iter().enumerate() {
            rank[block.index()] = i;
        }
        for (i, &block) in order.iter().enumerate() {
            let facts = if block == graph.entry() {
                Some(BTreeMap::new())
            } else {
                solution.incoming_facts(graph, block, i, &rank)
            };
            solution.blocks[block.index()] = facts;
        }
        solution
    }

    /// Joins the facts of every feasible edge into `block`. A back edge carries
    /// no facts yet, so a block entered by one starts out knowing nothing.
    fn incoming_facts(&self, graph: &MethodGraph, block: BlockId, position: usize, rank: &[usize]) -> BlockFacts {
        let mut merged: BlockFacts = None;
        for &pred in graph.preds_of(block) {
            match rank[pred.index()] {
                usize::MAX => continue,
                r if r >= position => return Some(BTreeMap::new()),
                _ => {}
            }
            let Some(known) = &self.blocks[pred.index()] else {
                continue;
            };
            let Some(narrowed) = self.edge_facts(graph, pred, block) else {
                continue;
            };
            let mut facts = known.clone();
            for (var, fact) in narrowed {
                let fact = match facts.get(&var) {
                    Some(old) => old.meet(&fact),
                    None => fact,
                };
                facts.insert(var, fact);
            }
            merged = Some(match merged {
                None => facts,
                Some(other) => other
                    .into_iter()
                    .filter_map(|(var, fact)| facts.get(&var).map(|f| (var, fact.join(f))))
                    .collect(),
            });
        }
        merged.map(|facts| {
            facts
                .into_iter()
                .filter(|(var, fact)| *fact != self.values[var.index()])
                .collect()
        })
    }

    /// The constraint of `var`.
    ///
    /// # Panics
    ///
    /// Panics if `var` was allocated after the solution was computed.
    #[must_use]
    pub fn get(&self, var: VarId) -> &Constraint {
        &self.values[var.index()]
    }

    /// The constraint of `var` inside `block`: its global constraint narrowed by
    /// the branches taken to get there.
    #[must_use]
    pub fn at(&self, block: BlockId, var: VarId) -> Constraint {
        let global = &self.values[var.index()];
        match self.facts(block).and_then(|facts| facts.get(&var)) {
            Some(fact) => global.meet(fact),
            None => global.clone(),
        }
    }

    /// Facts known on entry to `block` beyond the global constraints, or `None`
    /// if the block cannot execute.
    #[must_use]
    pub fn facts(&self, block: BlockId) -> Option<&BTreeMap<VarId, Constraint>> {
        self.blocks.get(block.index()).and_then(Option::as_ref)
    }

    /// Returns `false` if no feasible path leads from the entry to `block`.
    /// Blocks created after the solution count as reachable.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.blocks.get(block.index()).is_none_or(Option::is_some)
    }

    /// The constraint of `var` when control moves from `from` to `to`, or `None`
    /// if that edge is never taken.
    #[must_use]
    pub fn along(&self, graph: &MethodGraph, from: BlockId, to: BlockId, var: VarId) -> Option<Constraint> {
        if !self.is_reachable(from) {
            return None;
        }
        let narrowed = self.edge_facts(graph, from, to)?;
        Some(
            narrowed
                .iter()
                .filter(|(v, _)| *v == var)
                .fold(self.at(from, var), |acc, (_, fact)| acc.meet(fact)),
        )
    }

    /// Targets of the terminator of `block` that the constraints do not rule out.
    ///
    /// When every target is ruled out the terminator is unreachable and all of its
    /// targets are returned, leaving the block for pruning to decide.
    #[must_use]
    pub fn feasible_targets(&self, graph: &MethodGraph, block: BlockId) -> Vec<BlockId> {
        let all = graph.block(block).terminator.targets();
        if !self.is_reachable(block) {
            return all;
        }
        let feasible: Vec<BlockId> = all
            .iter()
            .copied()
            .filter(|&target| self.edge_facts(graph, block, target).is_some())
            .collect();
        if feasible.is_empty() {
            all
        } else {
            feasible
        }
    }

    /// What the branch ending `from` tells about its operands on the edge to
    /// `to`, or `None` if the branch never takes that edge.
    fn edge_facts(&self, graph: &MethodGraph, from: BlockId, to: BlockId) -> Option<Vec<(VarId, Constraint)>> {
        // An exception leaves before the branch is decided
        if graph.is_handler_edge(from, to) {
            return Some(Vec::new());
        }
        match &graph.block(from).terminator {
            Terminator::If {
                cond,
                lhs,
                rhs,
                taken,
                fallthrough,
            } if taken != fallthrough => {
                let cond = if to == *taken {
                    *cond
                } else if to == *fallthrough {
                    cond.negate()
                } else {
                    return Some(Vec::new());
                };
                let (l, r) = (self.at(from, *lhs), self.at(from, *rhs));
                if !cond_possible(cond, &l, &r) {
                    return None;
                }
                let l_fact = l.satisfying(cond, &r);
                let r_fact = r.satisfying(cond.swap(), &l);
                if l_fact.is_bottom() || r_fact.is_bottom() {
                    return None;
                }
                Some(
                    [(*lhs, l_fact), (*rhs, r_fact)]
                        .into_iter()
                        .filter(|(var, _)| !graph.var(*var).is_literal())
                        .collect(),
                )
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let current = self.at(from, *value);
                let Some(range) = current.as_int() else {
                    return Some(Vec::new());
                };
                if range.is_bottom() || !switch_targets(range, cases, *default).contains(&to) {
                    return None;
                }
                if to == *default || graph.var(*value).is_literal() {
                    return Some(Vec::new());
                }
                let (lo, hi) = cases
                    .iter()
                    .filter(|(_, target)| *target == to)
                    .map(|&(key, _)| i64::from(key))
                    .fold((i64::MAX, i64::MIN), |(lo, hi), key| (lo.min(key), hi.max(key)));
                let hull = IntRange::new(range.bits, lo, hi).meet(range);
                Some(vec![(*value, Constraint::Int(hull))])
            }
            _ => Some(Vec::new()),
        }
    }

    /// Returns `true` if some block is known to be unreachable or knows more than
    /// the global constraints.
    fn refines(&self, graph: &MethodGraph) -> bool {
        graph
            .block_ids()
            .into_iter()
            .any(|b| self.facts(b).is_none_or(|facts| !facts.is_empty()))
    }
}

/// Returns `true` if some pair of values drawn from `l` and `r` satisfies `cond`.
fn cond_possible(cond: Cond, l: &Constraint, r: &Constraint) -> bool {
    if l.is_bottom() || r.is_bottom() {
        return false;
    }
    match (l, r) {
        (Constraint::Int(a), Constraint::Int(b)) => match cond {
            Cond::Eq => !a.meet(b).is_bottom(),
            Cond::Ne => !matches!((a.as_constant(), b.as_constant()), (Some(x), Some(y)) if x == y),
            Cond::Lt => a.lo < b.hi,
            Cond::Ge => a.hi >= b.lo,
            Cond::Gt => a.hi > b.lo,
            Cond::Le => a.lo <= b.hi,
        },
        (Constraint::Object(a), Constraint::Object(b)) => match cond {
            Cond::Eq => (a.may_be_null && b.may_be_null) || (a.may_be_object && b.may_be_object),
            Cond::Ne => a.may_be_object || b.may_be_object,
            _ => true,
        },
        _ => true,
    }
}

/// Switch keys are checked one by one up to this many possible values.
const SWITCH_ENUMERATION_LIMIT: u128 = 4096;

fn switch_targets(range: &IntRange, cases: &[(i32, BlockId)], default: BlockId) -> Vec<BlockId> {
    let mut targets = Vec::new();
    for &(key, target) in cases {
        if range.contains(i64::from(key)) && !targets.contains(&target) {
            targets.push(target);
        }
    }
    let keys: BTreeSet<i64> = cases.iter().map(|&(k, _)| i64::from(k)).collect();
    let covered = range.size() <= SWITCH_ENUMERATION_LIMIT
        && (range.lo..=range.hi).all(|v| keys.contains(&v));
    if !covered && !targets.contains(&default) {
        targets.push(default);
    }
    targets
}

/// SCC-ordered fixed-point solver.
///
/// ```rust
/// use classflow::bytecode::ClassHierarchy;
/// use classflow::constraints::{Constraint, IntRange, Propagator};
/// use classflow::ir::{GraphBuilder, VarType};
///
/// let mut b = GraphBuilder::new("f");
/// let [entry] = b.blocks();
/// let (two, three) = (b.int(2), b.int(3));
/// let sum = b.add(entry, two, three);
/// b.ret(entry, Some(sum));
/// let graph = b.finish();
///
/// let oracle = ClassHierarchy::with_java_lang();
/// let solution = Propagator::new(&oracle, 4).analyze(&graph, &[])?;
/// assert_eq!(solution.get(sum), &Constraint::Int(IntRange::constant(32, 5)));
/// # Ok::<(), classflow::Error>(())
/// ```
pub struct Propagator<'o> {
    oracle: &'o dyn ClassOracle,
    max_rounds: usize,
    values: Vec<Constraint>,
    previous: Option<Solution>,
    current: BlockId,
}

impl<'o> Propagator<'o> {
    /// Creates a solver that refines each cyclic component at most `max_rounds`
    /// times.
    pub fn new(oracle: &'o dyn ClassOracle, max_rounds: usize) -> Self {
        Propagator {
            oracle,
            max_rounds,
            values: Vec::new(),
            previous: None,
            current: BlockId::new(0),
        }
    }

    /// Computes the constraint of every variable of `graph`. Inputs listed in
    /// `non_null` (the receiver of an instance method) are known not to be `null`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InternalConsistency`] if the dependency graph cannot
    /// be built.
    pub fn analyze(mut self, graph: &MethodGraph, non_null: &[VarId]) -> Result<Solution> {
        let (deps, ops) = dependency_graph(graph)?;
        let mut sccs = strongly_connected_components(&deps);
        sccs.reverse();
        for scc in &mut sccs {
            scc.sort();
        }

        let mut solution = self.pass(graph, non_null, &deps, &sccs, &ops);
        for _ in 1..REFINEMENT_PASSES {
            if !solution.refines(graph) {
                break;
            }
            self.previous = Some(solution);
            let next = self.pass(graph, non_null, &deps, &sccs, &ops);
            let settled = self
                .previous
                .as_ref()
                .is_some_and(|previous| previous.blocks == next.blocks);
            solution = next;
            if settled {
                break;
            }
        }
        Ok(solution)
    }

    /// One evaluation of every component, under the facts of the previous pass.
    fn pass(
        &mut self,
        graph: &MethodGraph,
        non_null: &[VarId],
        deps: &DirectedGraph<OpId>,
        sccs: &[Vec<NodeId>],
        ops: &[OpId],
    ) -> Solution {
        self.initialize(graph, non_null);

        let mut widened = 0usize;
        for scc in sccs {
            if !is_cyclic_component(deps, scc) {
                if let Some(&op) = scc.first().and_then(|n| ops.get(n.index())) {
                    self.evaluate(graph, op);
                }
                continue;
            }
            let members: Vec<OpId> = scc.iter().filter_map(|n| ops.get(n.index()).copied()).collect();

            let mut stable = false;
            for _ in 0..self.max_rounds {
                let mut changed = false;
                for &op in &members {
                    changed |= self.evaluate(graph, op);
                }
                if !changed {
                    stable = true;
                    break;
                }
            }
            if !stable {
                widened += 1;
                for &op in &members {
                    for output in graph.op(op).outputs() {
                        self.values[output.index()] = Constraint::top(graph.var(output).ty);
                    }
                }
            }
        }

        log::trace!(
            "propagated {}: {} operations, {} components widened, {}",
            graph.name(),
            ops.len(),
            widened,
            if self.previous.is_some() { "with branch facts" } else { "without branch facts" }
        );
        Solution::with_facts(graph, std::mem::take(&mut self.values))
    }

    fn initialize(&mut self, graph: &MethodGraph, non_null: &[VarId]) {
        self.values = (0..graph.var_count())
            .map(|i| {
                let var = graph.var(VarId::new(i));
                match (&var.literal, var.def) {
                    (Some(literal), _) => Constraint::from_literal(literal),
                    (None, Some(_)) => Constraint::bottom(var.ty),
                    (None, None) => self.declared(var.ty, var.decl.as_ref()),
                }
            })
            .collect();
        for &var in non_null {
            if let Constraint::Object(object) = &self.values[var.index()] {
                self.values[var.index()] = Constraint::Object(object.clone().non_null());
            }
        }
    }

    /// The constraint implied by a declared type alone.
    fn declared(&self, ty: VarType, decl: Option<&TypeDesc>) -> Constraint {
        match decl {
            Some(TypeDesc::Object(name)) if ty == VarType::Object && self.is_class(name) => {
                Constraint::Object(ObjectConstraint::extending(name))
            }
            _ => Constraint::top(ty),
        }
    }

    fn is_class(&self, name: &str) -> bool {
        name != OBJECT && !self.oracle.flags(name).contains(ClassFlags::INTERFACE)
    }

    /// `true` if every object of class `sub` is an instance of `sup`.
    fn extends(&self, sub: &str, sup: &str) -> bool {
        sub == sup || (self.is_class(sup) && self.oracle.is_subclass(sub, sup)) || sup == OBJECT
    }

    /// The constraint of `var` in the block being evaluated.
    fn value(&self, var: VarId) -> Constraint {
        let value = &self.values[var.index()];
        match &self.previous {
            Some(previous) => value.meet(&previous.at(self.current, var)),
            None => value.clone(),
        }
    }

    /// The constraint of `var` flowing from `pred` into `block`, `None` if the
    /// previous pass found that edge infeasible.
    fn incoming(&self, graph: &MethodGraph, pred: BlockId, block: BlockId, var: VarId) -> Option<Constraint> {
        let value = &self.values[var.index()];
        match &self.previous {
            Some(previous) => previous
                .along(graph, pred, block, var)
                .map(|fact| value.meet(&fact)),
            None => Some(value.clone()),
        }
    }

    fn int(&self, var: VarId) -> IntRange {
        self.value(var).as_int().copied().unwrap_or_else(|| IntRange::full(32))
    }

    fn float(&self, var: VarId) -> FloatConstraint {
        self.value(var)
            .as_float()
            .copied()
            .unwrap_or_else(|| FloatConstraint::full(64))
    }

    fn object(&self, var: VarId) -> ObjectConstraint {
        self.value(var)
            .as_object()
            .cloned()
            .unwrap_or_else(ObjectConstraint::any)
    }

    /// Re-evaluates `op` and returns `true` if any output changed.
    fn evaluate(&mut self, graph: &MethodGraph, op: OpId) -> bool {
        let operation = graph.op(op);
        self.current = operation.block;
        let mut changed = false;
        if let Some(value) = operation.value {
            let ty = graph.var(value).ty;
            let decl = graph.var(value).decl.as_ref();
            let result = self.transfer(graph, operation, ty, decl);
            changed |= self.update(value, result);
        }
        if let Some(thrown) = operation.thrown {
            changed |= self.update(thrown, Constraint::Object(ObjectConstraint::thrown()));
        }
        if let Some(token) = operation.token {
            changed |= self.update(token, Constraint::Token);
        }
        changed
    }

    fn update(&mut self, var: VarId, value: Constraint) -> bool {
        let slot = &mut self.values[var.index()];
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    /// The constraint of the value output of `op`, given the current constraints of
    /// its inputs.
    fn transfer(&self, graph: &MethodGraph, op: &Operation, ty: VarType, decl: Option<&TypeDesc>) -> Constraint {
        // Ordered operations carry the token first
        let args = if op.is_ordered() {
            op.inputs.get(1..).unwrap_or_default()
        } else {
            &op.inputs[..]
        };
        let arg = |i: usize| args.get(i).copied();

        match &op.kind {
            OpKind::Phi { preds } => preds
                .iter()
                .zip(&op.inputs)
                .filter_map(|(&pred, &v)| self.incoming(graph, pred, op.block, v))
                .fold(Constraint::bottom(ty), |acc, v| acc.join(&v)),
            OpKind::Arith { kind, op: arith } => match (arg(0), arg(1)) {
                (Some(a), Some(b)) => self.arith(*kind, *arith, a, b),
                _ => Constraint::top(ty),
            },
            OpKind::Neg(kind) => match (arg(0), kind) {
                (Some(a), ValueKind::Int | ValueKind::Long) => Constraint::Int(self.int(a).neg()),
                (Some(a), ValueKind::Float | ValueKind::Double) => {
                    Constraint::Float(self.float(a).neg())
                }
                _ => Constraint::top(ty),
            },
            OpKind::Convert { from, to } => match arg(0) {
                Some(a) => self.convert(*from, *to, a),
                None => Constraint::top(ty),
            },
            OpKind::Truncate(narrow) => match arg(0) {
                Some(a) => {
                    let (width, signed) = match narrow {
                        NarrowKind::Byte => (8, true),
                        NarrowKind::Char => (16, false),
                        NarrowKind::Short => (16, true),
                    };
                    Constraint::Int(self.int(a).truncate(width, signed))
                }
                None => Constraint::top(ty),
            },
            OpKind::Compare(kind) => match (arg(0), arg(1)) {
                (Some(a), Some(b)) => self.compare(*kind, a, b),
                _ => Constraint::top(ty),
            },
            OpKind::ArrayLength => {
                let base = IntRange::new(32, 0, i64::from(i32::MAX));
                let known = arg(0).and_then(|a| self.object(a).array_length);
                Constraint::Int(known.map_or(base, |len| len.meet(&base)))
            }
            OpKind::New(class) => Constraint::Object(ObjectConstraint::exactly(class)),
            OpKind::NewArray(element) => {
                let desc = TypeDesc::Array(Box::new(element.clone()));
                let mut object = ObjectConstraint::exactly(&type_name(&desc));
                let nonneg = IntRange::new(32, 0, i64::from(i32::MAX));
                object.array_length = Some(arg(0).map_or(nonneg, |len| self.int(len).meet(&nonneg)));
                Constraint::Object(object)
            }
            OpKind::MultiNewArray { desc, .. } => {
                let mut object = ObjectConstraint::exactly(&type_name(desc));
                let nonneg = IntRange::new(32, 0, i64::from(i32::MAX));
                object.array_length = Some(arg(0).map_or(nonneg, |len| self.int(len).meet(&nonneg)));
                Constraint::Object(object)
            }
            OpKind::CheckCast(target) => {
                let input = arg(0).map_or_else(ObjectConstraint::any, |a| self.object(a));
                match target {
                    TypeDesc::Object(name) if self.is_class(name) => {
                        Constraint::Object(input.meet(&ObjectConstraint::extending(name)))
                    }
                    _ => Constraint::Object(input),
                }
            }
            OpKind::InstanceOf(target) => match arg(0) {
                Some(a) => self.instance_of(&self.object(a), target),
                None => Constraint::top(ty),
            },
            OpKind::GetField(_)
            | OpKind::GetStatic(_)
            | OpKind::ArrayLoad(_)
            | OpKind::Invoke { .. } => self.declared(ty, decl),
            OpKind::PutField(_)
            | OpKind::PutStatic(_)
            | OpKind::ArrayStore(_)
            | OpKind::MonitorEnter
            | OpKind::MonitorExit => Constraint::top(ty),
        }
    }

    fn arith(&self, kind: ValueKind, op: ArithOp, a: VarId, b: VarId) -> Constraint {
        match kind {
            ValueKind::Int | ValueKind::Long => {
                let (x, y) = (self.int(a), self.int(b));
                // Shift distances are always int; bring them to the operand width
                let y = if op.is_shift() { y.convert(x.bits) } else { y };
                Constraint::Int(match op {
                    ArithOp::Add => x.add(&y),
                    ArithOp::Sub => x.sub(&y),
                    ArithOp::Mul => x.mul(&y),
                    ArithOp::Div => x.div(&y),
                    ArithOp::Rem => x.rem(&y),
                    ArithOp::Shl => x.shl(&y),
                    ArithOp::Shr => x.shr(&y),
                    ArithOp::Ushr => x.ushr(&y),
                    ArithOp::And => x.and(&y),
                    ArithOp::Or => x.or(&y),
                    ArithOp::Xor => x.xor(&y),
                })
            }
            ValueKind::Float | ValueKind::Double => {
                let (x, y) = (self.float(a), self.float(b));
                let f: fn(f64, f64) -> f64 = match op {
                    ArithOp::Add => |a: f64, b: f64| a + b,
                    ArithOp::Sub => |a: f64, b: f64| a - b,
                    ArithOp::Mul => |a: f64, b: f64| a * b,
                    ArithOp::Div => |a: f64, b: f64| a / b,
                    ArithOp::Rem => |a: f64, b: f64| a % b,
                    _ => return Constraint::Float(FloatConstraint::full(x.bits)),
                };
                Constraint::Float(x.fold(&y, f))
            }
            ValueKind::Reference => Constraint::top(VarType::Object),
        }
    }

    fn convert(&self, from: ValueKind, to: ValueKind, a: VarId) -> Constraint {
        let bits = |k: ValueKind| match k {
            ValueKind::Long | ValueKind::Double => 64,
            _ => 32,
        };
        let to_ty = VarType::from(to);
        match (from, to) {
            (ValueKind::Int | ValueKind::Long, ValueKind::Int | ValueKind::Long) => {
                Constraint::Int(self.int(a).convert(bits(to)))
            }
            (ValueKind::Int | ValueKind::Long, ValueKind::Float | ValueKind::Double) => {
                let range = self.int(a);
                if range.is_bottom() {
                    return Constraint::bottom(to_ty);
                }
                match range.as_constant() {
                    Some(v) => {
                        let value = if bits(to) == 32 { f64::from(v as f32) } else { v as f64 };
                        Constraint::Float(FloatConstraint::constant(bits(to), value))
                    }
                    None => Constraint::top(to_ty),
                }
            }
            (ValueKind::Float | ValueKind::Double, ValueKind::Int | ValueKind::Long) => {
                let float = self.float(a);
                if float.is_bottom() {
                    return Constraint::bottom(to_ty);
                }
                match float.as_constant() {
                    // Saturating, NaN to zero, as the JVM converts
                    Some(v) if bits(to) == 32 => Constraint::Int(IntRange::constant(32, i64::from(v as i32))),
                    Some(v) => Constraint::Int(IntRange::constant(64, v as i64)),
                    None => Constraint::top(to_ty),
                }
            }
            (ValueKind::Float | ValueKind::Double, ValueKind::Float | ValueKind::Double) => {
                let float = self.float(a);
                match float.as_constant() {
                    Some(v) if bits(to) == 32 => {
                        Constraint::Float(FloatConstraint::constant(32, f64::from(v as f32)))
                    }
                    Some(v) => Constraint::Float(FloatConstraint::constant(64, v)),
                    None if float.is_bottom() => Constraint::bottom(to_ty),
                    None => Constraint::top(to_ty),
                }
            }
            _ => Constraint::top(to_ty),
        }
    }

    fn compare(&self, kind: CompareKind, a: VarId, b: VarId) -> Constraint {
        match kind {
            CompareKind::Long => Constraint::Int(self.int(a).compare(&self.int(b))),
            CompareKind::FloatL | CompareKind::FloatG | CompareKind::DoubleL | CompareKind::DoubleG => {
                let (x, y) = (self.float(a), self.float(b));
                if x.is_bottom() || y.is_bottom() {
                    return Constraint::bottom(VarType::Int);
                }
                let nan = if matches!(kind, CompareKind::FloatG | CompareKind::DoubleG) {
                    1
                } else {
                    -1
                };
                let result = match (x.as_constant(), y.as_constant()) {
                    (Some(l), Some(r)) => Some(match l.partial_cmp(&r) {
                        Some(std::cmp::Ordering::Less) => -1,
                        Some(std::cmp::Ordering::Equal) => 0,
                        Some(std::cmp::Ordering::Greater) => 1,
                        None => nan,
                    }),
                    _ => None,
                };
                Constraint::Int(match result {
                    Some(v) => IntRange::constant(32, v),
                    None => IntRange::new(32, -1, 1),
                })
            }
        }
    }

    fn instance_of(&self, input: &ObjectConstraint, target: &TypeDesc) -> Constraint {
        let unknown = Constraint::Int(IntRange::new(32, 0, 1));
        if input.is_bottom() {
            return Constraint::bottom(VarType::Int);
        }
        if !input.may_be_object {
            return Constraint::Int(IntRange::constant(32, 0));
        }
        let TypeDesc::Object(name) = target else {
            return unknown;
        };
        let always = input.supertypes.iter().any(|s| self.extends(s, name))
            || input
                .exact
                .as_ref()
                .is_some_and(|e| !e.is_empty() && e.iter().all(|x| self.extends(x, name)));
        if always && !input.may_be_null {
            return Constraint::Int(IntRange::constant(32, 1));
        }
        let never = self.is_class(name)
            && input
                .exact
                .as_ref()
                .is_some_and(|e| e.iter().all(|x| !self.oracle.is_subclass(x, name)));
        if never {
            return Constraint::Int(IntRange::constant(32, 0));
        }
        unknown
    }
}

/// Builds the operation dependency graph over the live operations of `graph`.
/// Returns the graph and the operation behind each node.
fn dependency_graph(graph: &MethodGraph) -> Result<(DirectedGraph<OpId>, Vec<OpId>)> {
    let mut deps = DirectedGraph::new();
    let mut node_of: HashMap<OpId, NodeId> = HashMap::new();
    let mut ops = Vec::new();
    for block in graph.block_ids() {
        for op in graph.block_ops(block) {
            node_of.insert(op, deps.add_node(op));
            ops.push(op);
        }
    }
    for &op in &ops {
        let target = node_of[&op];
        for &input in &graph.op(op).inputs {
            let source = graph
                .var(input)
                .def
                .filter(|def| !graph.op(*def).removed)
                .and_then(|def| node_of.get(&def).copied());
            if let Some(source) = source {
                deps.add_edge(source, target)?;
            }
        }
    }
    Ok((deps, ops))
}
