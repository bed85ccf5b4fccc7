//! Dominator tree over the block CFG.
//!
//! A block `d` dominates a block `n` when every path from the entry to `n`
//! passes through `d`. The live-range splitter needs exactly two things from
//! this module: a reverse postorder to process branches outer-first, and the
//! `dominates` query to decide which uses a sigma captures.
//!
//! The immediate dominators are computed with the iterative scheme of
//! Cooper, Harvey and Kennedy ("A Simple, Fast Dominance Algorithm"): walk
//! the blocks in reverse postorder and intersect the predecessors' dominator
//! chains until a fixed point. Quadratic in the worst case, but the constant
//! factor is tiny and CFGs are shallow.

use crate::ssa::Function;
use crate::types::BlockId;

#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    /// Immediate dominator per block; `None` for the entry and for blocks
    /// unreachable from it.
    idom: Vec<Option<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DominatorTree {
    pub fn compute(func: &Function) -> Self {
        let entry = func.entry();
        let rpo = reverse_postorder(func, entry);
        let mut rpo_number = vec![usize::MAX; func.num_blocks()];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_number[b.index()] = i;
        }

        let preds = func.predecessors();
        let mut idom: Vec<Option<BlockId>> = vec![None; func.num_blocks()];
        idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &preds[b.index()] {
                    if idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_number, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.index()] != new_idom {
                    idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        DominatorTree { entry, idom, rpo }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Blocks in reverse postorder; unreachable blocks are absent.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.idom[b.index()].is_some()
    }

    /// The closest strict dominator, or `None` for the entry block and
    /// unreachable blocks.
    pub fn immediate_dominator(&self, b: BlockId) -> Option<BlockId> {
        if b == self.entry {
            None
        } else {
            self.idom[b.index()]
        }
    }

    /// Whether `a` dominates `b`. A block dominates itself; nothing dominates
    /// an unreachable block.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == self.entry {
                return false;
            }
            current = self.idom[current.index()].expect("reachable block has an idom");
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_number: &[usize],
    mut f1: BlockId,
    mut f2: BlockId,
) -> BlockId {
    while f1 != f2 {
        while rpo_number[f1.index()] > rpo_number[f2.index()] {
            f1 = idom[f1.index()].expect("processed block has an idom");
        }
        while rpo_number[f2.index()] > rpo_number[f1.index()] {
            f2 = idom[f2.index()].expect("processed block has an idom");
        }
    }
    f1
}

fn reverse_postorder(func: &Function, entry: BlockId) -> Vec<BlockId> {
    let mut visited = vec![false; func.num_blocks()];
    let mut postorder = Vec::with_capacity(func.num_blocks());
    // Explicit stack of (block, next successor index) to survive deep CFGs.
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited[entry.index()] = true;

    while let Some((b, i)) = stack.last_mut() {
        let succs = func.block_data(*b).term.successors();
        if *i < succs.len() {
            let s = succs[*i];
            *i += 1;
            if !visited[s.index()] {
                visited[s.index()] = true;
                stack.push((s, 0));
            }
        } else {
            postorder.push(*b);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}
