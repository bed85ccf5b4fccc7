//! Strongly connected components of the constraint graph, in Nuutila's
//! variant of Tarjan's algorithm.
//!
//! Variables:
//!   dfs(v)  = discovery order of v
//!   root(v) = representative candidate: the oldest variable known to be in
//!             v's component
//!
//! A variable is a component representative iff `root(v) = v` when its DFS
//! finishes; members that are not representatives wait on an auxiliary stack
//! until their representative retires them. Components complete in reverse
//! topological order of the condensation, so iterating the worklist
//! *backwards* hands every component its inputs before its users.
//!
//! The walk runs over the union of the use map and the control-dependence
//! edges; the latter exist only to pull a symbolic bound's component ahead of
//! the sigma it constrains and are removed again before solving.
//!
//! The DFS is iterative with an explicit frame stack, so pathological
//! functions cannot exhaust the call stack.

use hashbrown::HashMap;
use log::debug;

use crate::graph::ConstraintGraph;
use crate::types::VarId;

#[derive(Debug)]
pub struct Nuutila {
    /// Component representatives in completion order; iterate in reverse for
    /// defs-before-uses processing.
    pub worklist: Vec<VarId>,
    /// Representative -> members (the representative included).
    pub components: HashMap<VarId, Vec<VarId>>,
}

impl Nuutila {
    pub fn compute(graph: &mut ConstraintGraph) -> Self {
        let boundary = graph.add_control_dependence_edges();

        let n = graph.num_vars();
        let mut dfs: Vec<i64> = vec![-1; n];
        let mut root: Vec<VarId> = (0..n).map(VarId::new).collect();
        let mut in_component = vec![false; n];
        let mut pending: Vec<VarId> = Vec::new();
        let mut worklist: Vec<VarId> = Vec::new();
        let mut components: HashMap<VarId, Vec<VarId>> = HashMap::new();
        let mut index: i64 = 0;

        for i in 0..n {
            if dfs[i] >= 0 {
                continue;
            }
            let start = VarId::new(i);
            dfs[i] = index;
            index += 1;

            // Frame: (variable, its successor list, next successor position).
            let mut frames: Vec<(VarId, Vec<VarId>, usize)> = vec![(start, targets(graph, start), 0)];

            while let Some(top) = frames.last_mut() {
                let v = top.0;
                if top.2 < top.1.len() {
                    let w = top.1[top.2];
                    top.2 += 1;
                    if dfs[w.index()] < 0 {
                        dfs[w.index()] = index;
                        index += 1;
                        let succs = targets(graph, w);
                        frames.push((w, succs, 0));
                    } else if !in_component[w.index()]
                        && dfs[root[v.index()].index()] >= dfs[root[w.index()].index()]
                    {
                        root[v.index()] = root[w.index()];
                    }
                } else {
                    frames.pop();
                    if root[v.index()] == v {
                        in_component[v.index()] = true;
                        let mut members = vec![v];
                        while let Some(&m) = pending.last() {
                            if dfs[m.index()] <= dfs[v.index()] {
                                break;
                            }
                            pending.pop();
                            in_component[m.index()] = true;
                            members.push(m);
                        }
                        worklist.push(v);
                        components.insert(v, members);
                    } else {
                        pending.push(v);
                    }
                    if let Some(parent) = frames.last() {
                        let p = parent.0;
                        if !in_component[v.index()]
                            && dfs[root[p.index()].index()] >= dfs[root[v.index()].index()]
                        {
                            root[p.index()] = root[v.index()];
                        }
                    }
                }
            }
        }

        graph.del_control_dependence_edges(boundary);

        debug!(
            "found {} SCCs over {} variables (largest: {})",
            components.len(),
            n,
            components.values().map(|c| c.len()).max().unwrap_or(0)
        );

        Nuutila {
            worklist,
            components,
        }
    }
}

/// Deduplicated, sorted successor variables of `v`: the sinks of every
/// operation that reads it. Sorting keeps the traversal deterministic across
/// hash-map iteration orders.
fn targets(graph: &ConstraintGraph, v: VarId) -> Vec<VarId> {
    let mut out: Vec<VarId> = graph
        .use_map
        .get(&v)
        .map(|ops| {
            ops.iter()
                .map(|&o| graph.ops[o.index()].sink)
                .filter(|&s| s != v)
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essa::split_live_ranges;
    use crate::ssa::{BinOp, Function, Predicate};

    fn scc_position(scc: &Nuutila, graph: &ConstraintGraph, name: &str) -> usize {
        let var = *graph.names.get(name).unwrap();
        let order: Vec<&VarId> = scc.worklist.iter().rev().collect();
        order
            .iter()
            .position(|&&rep| scc.components[&rep].contains(&var))
            .unwrap()
    }

    #[test]
    fn test_chain_is_processed_defs_first() {
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let x = f.input("x", 32);
        let one = f.constant(1, 32);
        let a = f.binary(entry, "a", BinOp::Add, x, one);
        let b = f.binary(entry, "b", BinOp::Add, a, one);
        f.ret(entry, Some(b));

        let mut g = ConstraintGraph::new();
        g.build(&f);
        let scc = Nuutila::compute(&mut g);

        // Every variable is its own component.
        assert_eq!(scc.components.len(), 4);
        assert!(scc_position(&scc, &g, "x") < scc_position(&scc, &g, "a"));
        assert!(scc_position(&scc, &g, "a") < scc_position(&scc, &g, "b"));
    }

    #[test]
    fn test_loop_forms_one_component() {
        // x1 = phi(x0, x2); x2 = x1 + 1: a cycle through the phi.
        let mut f = Function::new("t");
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

        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);
        let scc = Nuutila::compute(&mut g);

        let x1_var = g.names["x1"];
        let x2_var = g.names["x2"];
        let cycle = scc
            .components
            .values()
            .find(|c| c.contains(&x1_var))
            .unwrap();
        assert!(cycle.contains(&x2_var));
        // The control-dependence edges are gone after discovery.
        assert!(!g
            .ops
            .iter()
            .any(|o| matches!(o.kind, crate::graph::OpKind::ControlDep { .. })));
    }

    #[test]
    fn test_symbolic_bound_ordered_before_sigma() {
        // if (x < y): the sigma on x is constrained by y, so y's component
        // must be handed out first even though no data edge connects them.
        let mut f = Function::new("t");
        let entry = f.block("entry");
        let then_bb = f.block("then");
        let else_bb = f.block("else");
        let x = f.input("x", 32);
        let y0 = f.input("y0", 32);
        let one = f.constant(1, 32);
        let y = f.binary(entry, "y", BinOp::Add, y0, one);
        f.branch(entry, Predicate::Slt, x, y, then_bb, else_bb);
        f.ret(then_bb, Some(x));
        f.ret(else_bb, Some(y));

        split_live_ranges(&mut f);
        let mut g = ConstraintGraph::new();
        g.build(&f);
        let scc = Nuutila::compute(&mut g);

        assert!(scc_position(&scc, &g, "y") < scc_position(&scc, &g, "x.then"));
    }
}
