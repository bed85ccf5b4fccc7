//! Fixed-point execution of the constraint graph.
//!
//! Components are solved smallest-dependency-first (the reverse of the
//! Nuutila worklist). Each component goes through three phases:
//!
//! 1. **Widening**: a chaotic iteration where an endpoint that moves jumps
//!    straight to its sentinel. Every endpoint moves at most twice, so the
//!    phase terminates regardless of component shape.
//! 2. **Symbolic resolution**: sigma intersects whose bound lives in an
//!    already-stable component are replaced by hard intervals.
//! 3. **Narrowing**: the dual iteration pulls sentinel endpoints back to the
//!    finite bounds the resolved intersects justify.
//!
//! Downstream components read the finished ranges directly; no explicit
//! propagation step is needed.

use hashbrown::HashSet;
use log::{debug, trace, warn};

use crate::graph::ConstraintGraph;
use crate::interval::{self, Intersect};
use crate::nuutila::Nuutila;
use crate::range::{Bounds, Range};
use crate::types::{OpId, VarId};

impl ConstraintGraph {
    /// Runs the analysis to its fixed point. Afterwards every variable node
    /// holds its final interval, readable through
    /// [`get_range`][Self::get_range]. Running the solver again is a no-op.
    pub fn find_intervals(&mut self) {
        let scc = Nuutila::compute(self);
        for &rep in scc.worklist.iter().rev() {
            let component = &scc.components[&rep];
            let members: HashSet<VarId> = component.iter().copied().collect();
            let comp_ops = self.component_ops(component);
            if comp_ops.is_empty() {
                // Constants and inputs: their initial range is already final.
                continue;
            }
            trace!(
                "solving component of {} ({} vars, {} ops)",
                self.vars[rep.index()].name,
                component.len(),
                comp_ops.len()
            );
            self.update(&comp_ops, &members, widen);
            self.fix_intersects(&comp_ops);
            self.update(&comp_ops, &members, narrow);
        }
        debug!("solved {} components", scc.components.len());
    }

    /// The operations that write into `component`: each member's defining
    /// operation. Sorted for deterministic scheduling.
    fn component_ops(&self, component: &[VarId]) -> Vec<OpId> {
        let mut ops: Vec<OpId> = component
            .iter()
            .filter_map(|v| self.def_map.get(v).copied())
            .collect();
        ops.sort();
        ops
    }

    /// Chaotic iteration of one component with the given meet operator.
    fn update(
        &mut self,
        comp_ops: &[OpId],
        members: &HashSet<VarId>,
        meet: fn(&Range, &Range, &Bounds) -> Range,
    ) {
        let mut active: Vec<OpId> = comp_ops.to_vec();
        let mut queued: HashSet<OpId> = active.iter().copied().collect();
        // Endpoints move monotonically, so this only trips on a solver bug.
        let step_limit = 16 * comp_ops.len() * comp_ops.len() + 64;
        let mut steps = 0;

        while let Some(op_id) = active.pop() {
            queued.remove(&op_id);
            steps += 1;
            if steps > step_limit {
                warn!("component did not stabilize after {} steps", steps);
                break;
            }

            let new = self.eval_constrained(op_id);
            let sink = self.ops[op_id.index()].sink;
            let old = self.vars[sink.index()].range.clone();
            let met = meet(&old, &new, self.bounds());
            if met != old {
                trace!(
                    "{}: {} -> {}",
                    self.vars[sink.index()].name,
                    self.bounds().display(&old),
                    self.bounds().display(&met)
                );
                self.vars[sink.index()].range = met;
                self.push_users(sink, members, &mut active, &mut queued);
            }
        }
    }

    fn push_users(
        &self,
        var: VarId,
        members: &HashSet<VarId>,
        active: &mut Vec<OpId>,
        queued: &mut HashSet<OpId>,
    ) {
        let Some(users) = self.use_map.get(&var) else {
            return;
        };
        let mut inside: Vec<OpId> = users
            .iter()
            .copied()
            .filter(|o| members.contains(&self.ops[o.index()].sink))
            .collect();
        inside.sort();
        for op in inside {
            if queued.insert(op) {
                active.push(op);
            }
        }
    }

    /// Replaces symbolic intersects by the hard interval their bound's (now
    /// stable) range implies.
    fn fix_intersects(&mut self, comp_ops: &[OpId]) {
        for &op_id in comp_ops {
            let op = &self.ops[op_id.index()];
            let (bound, pred) = match op.intersect {
                Intersect::Symbolic { bound, pred } => (bound, pred),
                Intersect::Concrete(_) => continue,
            };
            let bound_range = self.vars[bound.index()].range.clone();
            let width = self.vars[op.sink.index()].width;
            let resolved = interval::resolve(pred, &bound_range, width, self.bounds());
            trace!(
                "resolved intersect of {}: {} {} -> {}",
                self.vars[op.sink.index()].name,
                pred,
                self.vars[bound.index()].name,
                self.bounds().display(&resolved)
            );
            self.ops[op_id.index()].intersect = Intersect::Concrete(resolved);
        }
    }
}

/// Jumps moving endpoints to their sentinel. An endpoint can change at most
/// twice (to a finite value, then to the sentinel), which bounds the phase.
fn widen(old: &Range, new: &Range, b: &Bounds) -> Range {
    if old.is_empty() {
        return new.clone();
    }
    if new.is_empty() {
        return old.clone();
    }
    let lo = if new.lo() < old.lo() {
        b.min().clone()
    } else {
        old.lo().clone()
    };
    let hi = if new.hi() > old.hi() {
        b.max().clone()
    } else {
        old.hi().clone()
    };
    Range::new(lo, hi)
}

/// Tightens a sentinel endpoint to the finite value the evaluation supplies;
/// finite endpoints only intersect, so the range never grows back.
fn narrow(old: &Range, new: &Range, b: &Bounds) -> Range {
    if old.is_empty() {
        return new.clone();
    }
    if new.is_empty() {
        return Range::empty();
    }
    let lo = if old.lo() == b.min() && new.lo() != b.min() {
        new.lo().clone()
    } else {
        old.lo().clone().max(new.lo().clone())
    };
    let hi = if old.hi() == b.max() && new.hi() != b.max() {
        new.hi().clone()
    } else {
        old.hi().clone().min(new.hi().clone())
    };
    Range::new(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essa::split_live_ranges;
    use crate::ssa::{BinOp, Function, Predicate};
    use num_bigint::BigInt;

    fn counting_loop() -> Function {
        // x0 = 0; loop: x1 = phi(x0, x2); if (x1 < 100) { x2 = x1 + 1 }
        let mut f = Function::new("count");
        let entry = f.block("entry");
        let header = f.block("header");
        let body = f.block("body");
        let exit = f.block("exit");
        let x0 = f.constant(0, 32);
        let one = f.constant(1, 32);
        let hundred = f.constant(100, 32);
        f.jump(entry, header);
        let x1 = f.phi(header, "x1", vec![(entry, x0), (body, x0)]);
        f.branch(header, Predicate::Slt, x1, hundred, body, exit);
        let x2 = f.binary(body, "x2", BinOp::Add, x1, one);
        f.set_phi_arg(header, x1, body, x2);
        f.jump(body, header);
        f.ret(exit, Some(x1));
        f
    }

    fn assert_range(g: &ConstraintGraph, name: &str, lo: i64, hi: i64) {
        let r = g.get_range(name).unwrap_or_else(|| panic!("no range for {}", name));
        assert_eq!(*r.lo(), BigInt::from(lo), "{} lower end", name);
        assert_eq!(*r.hi(), BigInt::from(hi), "{} upper end", name);
    }

    #[test]
    fn test_widen_jumps_moved_endpoints() {
        let b = Bounds::new(8);
        let old = Range::new(0.into(), 5.into());
        let grown = Range::new((-1).into(), 9.into());
        let w = widen(&old, &grown, &b);
        assert_eq!(w.lo(), b.min());
        assert_eq!(w.hi(), b.max());

        let within = Range::new(1.into(), 4.into());
        assert_eq!(widen(&old, &within, &b), old);
        assert_eq!(widen(&Range::empty(), &old, &b), old);
    }

    #[test]
    fn test_narrow_pulls_back_sentinels() {
        let b = Bounds::new(8);
        let widened = Range::new(0.into(), b.max().clone());
        let evaluated = Range::new(0.into(), 100.into());
        assert_eq!(narrow(&widened, &evaluated, &b), evaluated);

        // Finite endpoints only intersect.
        let old = Range::new(0.into(), 50.into());
        let wider = Range::new((-5).into(), 60.into());
        assert_eq!(narrow(&old, &wider, &b), old);
    }

    #[test]
    fn test_counting_loop_converges() {
        let mut f = counting_loop();
        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);
        g.find_intervals();

        assert_range(&g, "x1", 0, 100);
        assert_range(&g, "x2", 1, 100);
        assert_range(&g, "x1.body", 0, 99);
        assert_range(&g, "x1.exit", 100, 100);
    }

    #[test]
    fn test_solver_is_idempotent() {
        let mut f = counting_loop();
        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);
        g.find_intervals();
        let first: Vec<Range> = g.vars().map(|(_, v)| v.range.clone()).collect();

        g.find_intervals();
        let second: Vec<Range> = g.vars().map(|(_, v)| v.range.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unreachable_side_goes_empty() {
        // if (x == 3) on a value pinned to [5, 5]: the true side is dead.
        let mut f = Function::new("dead");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let five = f.constant(5, 32);
        let three = f.constant(3, 32);
        let zero = f.constant(0, 32);
        let x = f.binary(entry, "x", BinOp::Add, five, zero);
        f.branch(entry, Predicate::Eq, x, three, then_bb, else_bb);
        f.ret(then_bb, Some(x));
        f.ret(else_bb, Some(x));
        split_live_ranges(&mut f);

        let mut g = ConstraintGraph::new();
        g.build(&f);
        g.find_intervals();

        assert!(g.get_range("x.then").unwrap().is_empty());
        assert_eq!(*g.get_range("x.else").unwrap(), Range::singleton(5));
    }
}
