//! Extended-SSA lifting: live-range splitting at conditional branches.
//!
//! For a branch `if a < b` the value `a` means something different on the two
//! sides, but plain SSA gives both sides the same name. The lifter inserts a
//! *sigma*, a renamed copy carrying the predicate implied by the edge, at
//! the head of each side, and rewrites every use the side dominates:
//!
//! ```text
//! entry:  br (i slt 10) then, else        entry:  br (i slt 10) then, else
//! then:   a = add i, 1          ==>       then:   i.then = sigma(i slt 10)
//! else:   b = sub i, 1                            a = add i.then, 1
//!                                         else:   i.else = sigma(i sge 10)
//!                                                 b = sub i.else, 1
//! ```
//!
//! A sigma is only placed when the successor has the branch block as its sole
//! predecessor; on a shared edge the predicate does not hold for every entry
//! and the value keeps its unsplit name.

use log::debug;

use crate::dom::DominatorTree;
use crate::ssa::{Function, Inst, InstKind, Terminator, ValueKind};
use crate::types::{BlockId, ValueId};

/// Splits live ranges at every comparison branch of `func`.
///
/// Blocks are processed in reverse postorder, so sigmas of nested branches
/// chain onto the sigmas of enclosing ones. Constant operands are left alone.
pub fn split_live_ranges(func: &mut Function) {
    let dom = DominatorTree::compute(func);
    let preds = func.predecessors();

    let order = dom.rpo().to_vec();
    for bb in order {
        let (pred, lhs, rhs, on_true, on_false) = match func.block_data(bb).term {
            Terminator::Branch {
                pred,
                lhs,
                rhs,
                on_true,
                on_false,
            } => (pred, lhs, rhs, on_true, on_false),
            _ => continue,
        };

        let mut operands = vec![(lhs, rhs, pred)];
        if rhs != lhs {
            operands.push((rhs, lhs, pred.swap()));
        }

        for (x, other, oriented) in operands {
            if func.value(x).as_const().is_some() {
                continue;
            }
            for (succ, side_pred) in [(on_true, oriented), (on_false, oriented.negate())] {
                if preds[succ.index()].len() != 1 {
                    continue;
                }
                let name = func.unique_name(format!(
                    "{}.{}",
                    func.value(x).name,
                    func.block_data(succ).name
                ));
                let width = func.value(x).width;
                let sigma = func.new_value(name, width, ValueKind::Name);
                func.blocks[succ.index()].insts.insert(
                    0,
                    Inst {
                        result: sigma,
                        kind: InstKind::Sigma {
                            src: x,
                            pred: side_pred,
                            bound: other,
                        },
                    },
                );
                debug!(
                    "sigma {} = {} ({} {})",
                    func.value(sigma).name,
                    func.value(x).name,
                    side_pred,
                    func.value(other).name
                );
                rename_dominated_uses(func, &dom, x, sigma, succ);
            }
        }
    }
}

/// Rewrites uses of `from` to `to` in every block dominated by `root`.
///
/// A phi argument is a use at its incoming predecessor, so it is renamed by
/// the predecessor's position, not the phi's. Sigmas sitting in `root` itself
/// read their operands on the incoming edge and are left untouched.
fn rename_dominated_uses(
    func: &mut Function,
    dom: &DominatorTree,
    from: ValueId,
    to: ValueId,
    root: BlockId,
) {
    for bi in 0..func.blocks.len() {
        let b = BlockId::new(bi);
        let in_scope = dom.dominates(root, b);
        let block = &mut func.blocks[bi];

        for inst in &mut block.insts {
            match &mut inst.kind {
                InstKind::Phi { args } => {
                    for (incoming, v) in args.iter_mut() {
                        if *v == from && dom.dominates(root, *incoming) {
                            *v = to;
                        }
                    }
                }
                InstKind::Binary { lhs, rhs, .. } if in_scope => {
                    replace(lhs, from, to);
                    replace(rhs, from, to);
                }
                InstKind::Cast { src, .. } if in_scope => {
                    replace(src, from, to);
                }
                InstKind::Sigma { src, bound, .. } if in_scope && b != root => {
                    replace(src, from, to);
                    replace(bound, from, to);
                }
                _ => {}
            }
        }

        if in_scope {
            match &mut block.term {
                Terminator::Branch { lhs, rhs, .. } => {
                    replace(lhs, from, to);
                    replace(rhs, from, to);
                }
                Terminator::Return(Some(v)) => replace(v, from, to),
                _ => {}
            }
        }
    }
}

fn replace(slot: &mut ValueId, from: ValueId, to: ValueId) {
    if *slot == from {
        *slot = to;
    }
}
