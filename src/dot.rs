//! Graphviz rendering of the constraint graph.

use crate::graph::{ConstraintGraph, OpKind};
use crate::interval::Intersect;

impl ConstraintGraph {
    /// Renders the graph in `dot` format: one node per variable labeled with
    /// its current range, one edge per operation source labeled with the
    /// opcode and, when it actually constrains something, the intersect.
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let b = self.bounds();
        let mut dot = String::new();
        writeln!(dot, "digraph G {{")?;
        writeln!(dot, "node [shape=box];")?;

        for (_, var) in self.vars() {
            writeln!(
                dot,
                "\"{}\" [label=\"{}: {}\"];",
                var.name,
                var.name,
                b.display(&var.range)
            )?;
        }

        for op in self.operations() {
            if matches!(op.kind, OpKind::ControlDep { .. }) {
                continue;
            }
            let mut label = op.label();
            match &op.intersect {
                Intersect::Concrete(r) if !r.is_full(b) => {
                    label.push_str(&format!(" \u{2229} {}", b.display(r)));
                }
                Intersect::Symbolic { bound, pred } => {
                    label.push_str(&format!(
                        " \u{2229} {} {}",
                        pred,
                        self.var(*bound).name
                    ));
                }
                Intersect::Concrete(_) => {}
            }
            let sink = &self.var(op.sink).name;
            for source in op.sources() {
                writeln!(
                    dot,
                    "\"{}\" -> \"{}\" [label=\"{}\"];",
                    self.var(source).name,
                    sink,
                    label
                )?;
            }
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use crate::essa::split_live_ranges;
    use crate::graph::ConstraintGraph;
    use crate::ssa::{BinOp, Function, Predicate};

    #[test]
    fn test_dot_output_shape() {
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
        f.ret(else_bb, Some(i));
        split_live_ranges(&mut f);

        let mut g = ConstraintGraph::new();
        g.build(&f);
        g.find_intervals();
        let dot = g.to_dot().unwrap();

        assert!(dot.starts_with("digraph G {"));
        assert!(dot.trim_end().ends_with('}'));
        // Nodes carry final ranges, edges carry opcodes.
        assert!(dot.contains("\"i.then\" [label=\"i.then: [-inf, 9]\"];"));
        assert!(dot.contains("\"i.then\" -> \"a\" [label=\"add\"]"));
        // The sigma edge shows its resolved intersect.
        assert!(dot.contains("\"i\" -> \"i.then\""));
        assert!(dot.contains("sigma \u{2229} [-inf, 9]"));
    }
}
