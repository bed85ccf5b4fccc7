//! The constraint graph: one variable node per integer SSA name, one
//! operation node per defining instruction.
//!
//! The graph is built in a single pass over the function. Nodes are stored in
//! vectors owned by the graph and reference each other by index, which keeps
//! the cyclic structure (phis close loops) free of ownership knots. Alongside
//! the nodes the builder maintains:
//!
//! - the **use map**: variable -> operations reading it (the edges the SCC
//!   discovery and the solver walk),
//! - the **symb map**: variable -> operations whose intersection bound is
//!   still symbolic on that variable,
//! - the **def map**: variable -> the operation defining it,
//! - the **branch map**: one record per comparison branch operand.
//!
//! [`find_intervals`][ConstraintGraph::find_intervals] (in the solver module)
//! executes the graph; afterwards every node holds its final interval.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::interval::{self, Intersect};
use crate::range::{Bounds, Range};
use crate::ssa::{BinOp, CastOp, Function, InstKind, Predicate, Terminator};
use crate::types::{BlockId, OpId, ValueId, VarId};

/// A program variable and its inferred interval.
///
/// Created during graph build; the range is mutated only by the solver.
#[derive(Debug, Clone)]
pub struct VarNode {
    pub value: ValueId,
    pub name: String,
    /// Original bit width, before normalization to the analysis width.
    pub width: u32,
    pub range: Range,
}

/// Opcode of a unary operation node. `Copy` is the identity of a sigma.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryCode {
    Trunc,
    Sext,
    Zext,
    Copy,
}

impl From<CastOp> for UnaryCode {
    fn from(op: CastOp) -> Self {
        match op {
            CastOp::Trunc => UnaryCode::Trunc,
            CastOp::Sext => UnaryCode::Sext,
            CastOp::Zext => UnaryCode::Zext,
        }
    }
}

/// Operation payloads. `ControlDep` is a zero-effect edge that only exists
/// while SCCs are being discovered, to order a symbolic bound before the
/// sigma it constrains.
#[derive(Debug, Clone)]
pub enum OpKind {
    Unary { code: UnaryCode, source: VarId },
    Binary { op: BinOp, lhs: VarId, rhs: VarId },
    Phi { sources: Vec<VarId> },
    ControlDep { source: VarId },
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub sink: VarId,
    pub intersect: Intersect,
    pub kind: OpKind,
}

impl Operation {
    pub fn sources(&self) -> Vec<VarId> {
        match &self.kind {
            OpKind::Unary { source, .. } | OpKind::ControlDep { source } => vec![*source],
            OpKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            OpKind::Phi { sources } => sources.clone(),
        }
    }

    /// Short opcode label for diagnostics and dot output.
    pub fn label(&self) -> String {
        match &self.kind {
            OpKind::Unary { code, .. } => match code {
                UnaryCode::Trunc => "trunc".to_string(),
                UnaryCode::Sext => "sext".to_string(),
                UnaryCode::Zext => "zext".to_string(),
                UnaryCode::Copy => "sigma".to_string(),
            },
            OpKind::Binary { op, .. } => op.to_string(),
            OpKind::Phi { .. } => "phi".to_string(),
            OpKind::ControlDep { .. } => "ctrl".to_string(),
        }
    }
}

/// The intervals a comparison branch implies for one of its operands.
#[derive(Debug, Clone)]
pub struct ValueBranchMap {
    pub value: ValueId,
    pub on_true: BlockId,
    pub on_false: BlockId,
    /// True-side predicate, oriented so that `value pred bound` holds on the
    /// true edge; the false edge carries its negation.
    pub pred: Predicate,
    pub bound: ValueId,
}

/// The constraint graph of one function.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    pub(crate) bounds: Option<Bounds>,
    pub(crate) vars: Vec<VarNode>,
    pub(crate) ops: Vec<Operation>,
    pub(crate) var_of: HashMap<ValueId, VarId>,
    pub(crate) names: HashMap<String, VarId>,
    pub(crate) use_map: HashMap<VarId, HashSet<OpId>>,
    pub(crate) symb_map: HashMap<VarId, HashSet<OpId>>,
    pub(crate) def_map: HashMap<VarId, OpId>,
    pub(crate) branches: Vec<ValueBranchMap>,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The saturation bounds of the current run.
    ///
    /// # Panics
    ///
    /// Panics if the graph has not been built yet.
    pub fn bounds(&self) -> &Bounds {
        self.bounds.as_ref().expect("graph not built")
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn var(&self, id: VarId) -> &VarNode {
        &self.vars[id.index()]
    }

    pub fn vars(&self) -> impl Iterator<Item = (VarId, &VarNode)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId::new(i), v))
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    pub fn branch_constraints(&self) -> &[ValueBranchMap] {
        &self.branches
    }

    /// The final interval of an SSA name, after
    /// [`find_intervals`][Self::find_intervals] ran.
    pub fn get_range(&self, name: &str) -> Option<&Range> {
        self.names.get(name).map(|&v| &self.vars[v.index()].range)
    }

    /// Releases all graph state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Walks the function once and materializes variable and operation
    /// nodes. Widths are normalized first: all internal arithmetic happens in
    /// `max_bits + 1` signed bits.
    pub fn build(&mut self, func: &Function) {
        let bounds = Bounds::new(func.max_bits());
        self.bounds = Some(bounds);

        for (_, block) in func.blocks() {
            for inst in &block.insts {
                self.build_operation(func, inst.result, &inst.kind);
            }
            self.build_branch_entries(func, &block.term);
        }
        self.init_var_ranges(func);

        debug!(
            "built constraint graph for `{}`: {} vars, {} ops, {} branch records",
            func.name(),
            self.vars.len(),
            self.ops.len(),
            self.branches.len()
        );
    }

    fn build_operation(&mut self, func: &Function, result: ValueId, kind: &InstKind) {
        match kind {
            InstKind::Binary { op, lhs, rhs } => {
                let l = self.add_var_node(func, *lhs);
                let r = self.add_var_node(func, *rhs);
                let sink = self.add_var_node(func, result);
                let intersect = Intersect::full(self.bounds());
                self.add_op(Operation {
                    sink,
                    intersect,
                    kind: OpKind::Binary {
                        op: *op,
                        lhs: l,
                        rhs: r,
                    },
                });
            }
            InstKind::Cast { op, src } => {
                let source = self.add_var_node(func, *src);
                let sink = self.add_var_node(func, result);
                let intersect = Intersect::full(self.bounds());
                self.add_op(Operation {
                    sink,
                    intersect,
                    kind: OpKind::Unary {
                        code: (*op).into(),
                        source,
                    },
                });
            }
            InstKind::Phi { args } => {
                let sources: Vec<VarId> = args
                    .iter()
                    .map(|(_, v)| self.add_var_node(func, *v))
                    .collect();
                let sink = self.add_var_node(func, result);
                let intersect = Intersect::full(self.bounds());
                self.add_op(Operation {
                    sink,
                    intersect,
                    kind: OpKind::Phi { sources },
                });
            }
            InstKind::Sigma { src, pred, bound } => {
                let source = self.add_var_node(func, *src);
                let sink = self.add_var_node(func, result);
                let width = func.value(*src).width;
                let intersect = match func.value(*bound).as_const() {
                    Some(c) => {
                        let r = interval::resolve(
                            *pred,
                            &Range::singleton(c.clone()),
                            width,
                            self.bounds(),
                        );
                        Intersect::Concrete(r)
                    }
                    None => {
                        let bound_var = self.add_var_node(func, *bound);
                        Intersect::Symbolic {
                            bound: bound_var,
                            pred: *pred,
                        }
                    }
                };
                let id = self.add_op(Operation {
                    sink,
                    intersect,
                    kind: OpKind::Unary {
                        code: UnaryCode::Copy,
                        source,
                    },
                });
                if let Some(bound_var) = self.ops[id.index()].intersect.symbolic_bound() {
                    self.symb_map.entry(bound_var).or_default().insert(id);
                }
            }
        }
    }

    fn build_branch_entries(&mut self, func: &Function, term: &Terminator) {
        let (pred, lhs, rhs, on_true, on_false) = match *term {
            Terminator::Branch {
                pred,
                lhs,
                rhs,
                on_true,
                on_false,
            } => (pred, lhs, rhs, on_true, on_false),
            _ => return,
        };
        let mut operands = vec![(lhs, rhs, pred)];
        if rhs != lhs {
            operands.push((rhs, lhs, pred.swap()));
        }
        for (x, other, oriented) in operands {
            if func.value(x).as_const().is_some() {
                continue;
            }
            self.branches.push(ValueBranchMap {
                value: x,
                on_true,
                on_false,
                pred: oriented,
                bound: other,
            });
        }
    }

    fn add_var_node(&mut self, func: &Function, v: ValueId) -> VarId {
        if let Some(&id) = self.var_of.get(&v) {
            return id;
        }
        let data = func.value(v);
        let id = VarId::new(self.vars.len());
        self.vars.push(VarNode {
            value: v,
            name: data.name.clone(),
            width: data.width,
            range: Range::empty(),
        });
        self.var_of.insert(v, id);
        self.names.insert(data.name.clone(), id);
        self.use_map.entry(id).or_default();
        id
    }

    fn add_op(&mut self, op: Operation) -> OpId {
        let id = OpId::new(self.ops.len());
        for source in op.sources() {
            self.use_map.entry(source).or_default().insert(id);
        }
        if !matches!(op.kind, OpKind::ControlDep { .. }) {
            let previous = self.def_map.insert(op.sink, id);
            debug_assert!(
                previous.is_none(),
                "SSA name {} defined twice",
                self.vars[op.sink.index()].name
            );
        }
        self.ops.push(op);
        id
    }

    /// Constants start at their singleton, inputs (no defining operation) at
    /// the full range, defined names empty until the solver reaches them.
    fn init_var_ranges(&mut self, func: &Function) {
        for (i, var) in self.vars.iter_mut().enumerate() {
            let id = VarId::new(i);
            var.range = if let Some(c) = func.value(var.value).as_const() {
                Range::singleton(c.clone())
            } else if self.def_map.contains_key(&id) {
                Range::empty()
            } else {
                Range::full(self.bounds.as_ref().expect("bounds set in build"))
            };
        }
    }

    /// Evaluates one operation over the current variable ranges, without the
    /// intersection bound.
    pub(crate) fn eval_op(&self, op: &Operation) -> Range {
        let b = self.bounds();
        match &op.kind {
            OpKind::Unary { code, source } => {
                let src = &self.vars[source.index()].range;
                match code {
                    UnaryCode::Copy => src.clone(),
                    UnaryCode::Trunc => src.truncate(self.vars[op.sink.index()].width, b),
                    UnaryCode::Sext => src.sext_or_trunc(self.vars[op.sink.index()].width, b),
                    UnaryCode::Zext => src.zext_or_trunc(self.vars[source.index()].width, b),
                }
            }
            OpKind::Binary { op: code, lhs, rhs } => {
                let l = &self.vars[lhs.index()].range;
                let r = &self.vars[rhs.index()].range;
                let width = self.vars[op.sink.index()].width;
                match code {
                    BinOp::Add => l.add(r, b),
                    BinOp::Sub => l.sub(r, b),
                    BinOp::Mul => l.mul(r, b),
                    BinOp::Udiv => l.udiv(r, b),
                    BinOp::Sdiv => l.sdiv(r, b),
                    BinOp::Urem => l.urem(r, b),
                    BinOp::Srem => l.srem(r, b),
                    BinOp::Shl => l.shl(r, width, b),
                    BinOp::Lshr => l.lshr(r, width, b),
                    BinOp::Ashr => l.ashr(r, width, b),
                    BinOp::And => l.and(r, b),
                    BinOp::Or => l.or(r, b),
                    BinOp::Xor => l.xor(r, b),
                }
            }
            OpKind::Phi { sources } => sources.iter().fold(Range::empty(), |acc, s| {
                acc.union_with(&self.vars[s.index()].range)
            }),
            OpKind::ControlDep { source } => self.vars[source.index()].range.clone(),
        }
    }

    /// `eval(op) /\ op.intersect`, the value the solver meets into the sink.
    pub(crate) fn eval_constrained(&self, op_id: OpId) -> Range {
        let op = &self.ops[op_id.index()];
        let evaluated = self.eval_op(op);
        evaluated.intersect_with(&op.intersect.range(self.bounds()))
    }

    /// Injects the control-dependence edges that order symbolic bounds before
    /// the sigmas they constrain. Returns the boundary index for
    /// [`del_control_dependence_edges`][Self::del_control_dependence_edges].
    pub(crate) fn add_control_dependence_edges(&mut self) -> usize {
        let boundary = self.ops.len();
        let mut entries: Vec<(VarId, OpId)> = self
            .symb_map
            .iter()
            .flat_map(|(&bound, ops)| ops.iter().map(move |&o| (bound, o)))
            .collect();
        entries.sort();
        for (bound, sigma_op) in entries {
            let sink = self.ops[sigma_op.index()].sink;
            let id = OpId::new(self.ops.len());
            let intersect = Intersect::full(self.bounds());
            self.ops.push(Operation {
                sink,
                intersect,
                kind: OpKind::ControlDep { source: bound },
            });
            self.use_map.entry(bound).or_default().insert(id);
        }
        boundary
    }

    /// Removes the edges added by
    /// [`add_control_dependence_edges`][Self::add_control_dependence_edges];
    /// they must not contribute to evaluation.
    pub(crate) fn del_control_dependence_edges(&mut self, boundary: usize) {
        for idx in boundary..self.ops.len() {
            let id = OpId::new(idx);
            if let OpKind::ControlDep { source } = self.ops[idx].kind {
                if let Some(users) = self.use_map.get_mut(&source) {
                    users.remove(&id);
                }
            }
        }
        self.ops.truncate(boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essa::split_live_ranges;
    use crate::ssa::Function;
    use num_bigint::BigInt;

    fn simple_branch_function() -> Function {
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let i = f.input("i", 32);
        let ten = f.constant(10, 32);
        let one = f.constant(1, 32);
        f.branch(entry, Predicate::Slt, i, ten, then_bb, else_bb);
        let a = f.binary(then_bb, "a", BinOp::Add, i, one);
        f.ret(then_bb, Some(a));
        let b = f.binary(else_bb, "b", BinOp::Sub, i, one);
        f.ret(else_bb, Some(b));
        f
    }

    #[test]
    fn test_build_creates_one_def_per_name() {
        let mut f = simple_branch_function();
        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);

        // i, 1, i.then, i.else, a, b. The branch constant 10 is folded into
        // the sigma intersects and never becomes a node.
        assert_eq!(g.num_vars(), 6);
        // Constants and the input have no defining operation.
        let defined: Vec<_> = g
            .vars()
            .filter(|(id, _)| g.def_map.contains_key(id))
            .map(|(_, v)| v.name.clone())
            .collect();
        assert_eq!(defined.len(), 4);
        assert!(defined.contains(&"a".to_string()));
        assert!(defined.contains(&"i.then".to_string()));
    }

    #[test]
    fn test_initial_ranges() {
        let mut f = simple_branch_function();
        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);

        assert!(g.get_range("i").unwrap().is_full(g.bounds()));
        assert_eq!(*g.get_range("c1").unwrap(), Range::singleton(1));
        assert!(g.get_range("a").unwrap().is_empty());
    }

    #[test]
    fn test_sigma_intersect_from_constant_bound() {
        let mut f = simple_branch_function();
        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);

        let sigma_var = g.names["i.then"];
        let op = &g.ops[g.def_map[&sigma_var].index()];
        match &op.intersect {
            Intersect::Concrete(r) => {
                assert_eq!(r.lo(), g.bounds().min());
                assert_eq!(*r.hi(), BigInt::from(9));
            }
            other => panic!("expected concrete intersect, got {:?}", other),
        }
    }

    #[test]
    fn test_symbolic_bound_registers_in_symb_map() {
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let x = f.input("x", 32);
        let y = f.input("y", 32);
        f.branch(entry, Predicate::Slt, x, y, then_bb, else_bb);
        f.ret(then_bb, Some(x));
        f.ret(else_bb, Some(y));
        split_live_ranges(&mut f);

        let mut g = ConstraintGraph::new();
        g.build(&f);
        // Four sigmas, each with a symbolic bound on the other operand.
        let symbolic_ops: usize = g.symb_map.values().map(|s| s.len()).sum();
        assert_eq!(symbolic_ops, 4);
    }

    #[test]
    fn test_control_dependence_edges_roundtrip() {
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let x = f.input("x", 32);
        let y = f.input("y", 32);
        f.branch(entry, Predicate::Ult, x, y, then_bb, else_bb);
        f.ret(then_bb, Some(x));
        f.ret(else_bb, Some(y));
        split_live_ranges(&mut f);

        let mut g = ConstraintGraph::new();
        g.build(&f);
        let ops_before = g.ops.len();
        let use_sizes: Vec<usize> = g.use_map.values().map(|s| s.len()).collect();

        let boundary = g.add_control_dependence_edges();
        assert_eq!(boundary, ops_before);
        assert!(g.ops.len() > ops_before);

        g.del_control_dependence_edges(boundary);
        assert_eq!(g.ops.len(), ops_before);
        let mut restored: Vec<usize> = g.use_map.values().map(|s| s.len()).collect();
        let mut original = use_sizes;
        original.sort();
        restored.sort();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_branch_map_records_both_operands() {
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let x = f.input("x", 32);
        let y = f.input("y", 32);
        f.branch(entry, Predicate::Sle, x, y, then_bb, else_bb);
        f.ret(then_bb, None);
        f.ret(else_bb, None);

        let mut g = ConstraintGraph::new();
        g.build(&f);
        assert_eq!(g.branch_constraints().len(), 2);
        assert_eq!(g.branch_constraints()[0].pred, Predicate::Sle);
        assert_eq!(g.branch_constraints()[1].pred, Predicate::Sge);
    }
}
