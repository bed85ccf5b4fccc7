//! Intersection intervals attached to constraint-graph operations.
//!
//! A sigma constrains its sink with the interval implied by the branch
//! predicate. When the other comparand is a constant, that interval is known
//! at graph-build time; when it is another SSA name the interval is
//! *symbolic*, like `[-inf, ub(b) - 1]` for `x slt b`, and gets resolved to a
//! concrete range once `b`'s interval has stabilized.

use num_bigint::BigInt;

use crate::range::{Bounds, Range};
use crate::ssa::Predicate;
use crate::types::VarId;

/// An operation's intersection bound: either a hard interval or a pending
/// symbolic one. [`resolve`] turns the latter into the former in place.
#[derive(Debug, Clone)]
pub enum Intersect {
    Concrete(Range),
    Symbolic { bound: VarId, pred: Predicate },
}

impl Intersect {
    pub fn full(b: &Bounds) -> Self {
        Intersect::Concrete(Range::full(b))
    }

    /// The interval to meet evaluation results with. A still-symbolic bound
    /// constrains nothing yet.
    pub fn range(&self, b: &Bounds) -> Range {
        match self {
            Intersect::Concrete(r) => r.clone(),
            Intersect::Symbolic { .. } => Range::full(b),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Intersect::Symbolic { .. })
    }

    pub fn symbolic_bound(&self) -> Option<VarId> {
        match self {
            Intersect::Symbolic { bound, .. } => Some(*bound),
            Intersect::Concrete(_) => None,
        }
    }
}

/// Derives the interval of values `x` (of `width` bits) may hold given that
/// `x pred bound` is known to be true.
///
/// Signed predicates open toward the `-inf`/`+inf` sentinels; unsigned ones
/// toward `[0, 2^width - 1]`. An `ne` bound constrains nothing usefully and
/// yields the full range. An empty bound marks an unreachable edge.
pub fn resolve(pred: Predicate, bound: &Range, width: u32, b: &Bounds) -> Range {
    if bound.is_empty() {
        return Range::empty();
    }
    match pred {
        Predicate::Eq => bound.clone(),
        Predicate::Ne => Range::full(b),
        Predicate::Slt => {
            if bound.hi() == b.min() {
                return Range::empty();
            }
            let hi = if bound.hi() == b.max() {
                b.max().clone()
            } else {
                bound.hi() - 1
            };
            Range::new(b.min().clone(), hi)
        }
        Predicate::Sle => Range::new(b.min().clone(), bound.hi().clone()),
        Predicate::Sgt => {
            if bound.lo() == b.max() {
                return Range::empty();
            }
            let lo = if bound.lo() == b.min() {
                b.min().clone()
            } else {
                bound.lo() + 1
            };
            Range::new(lo, b.max().clone())
        }
        Predicate::Sge => Range::new(bound.lo().clone(), b.max().clone()),
        Predicate::Ult | Predicate::Ule | Predicate::Ugt | Predicate::Uge => {
            let umax = b.unsigned_max(width);
            let u_hi = if bound.hi() == b.max() {
                umax.clone()
            } else {
                bound.hi().clone().min(umax.clone())
            };
            let u_lo = bound.lo().clone().max(BigInt::from(0));
            match pred {
                Predicate::Ult => Range::new(BigInt::from(0), u_hi - 1),
                Predicate::Ule => Range::new(BigInt::from(0), u_hi),
                Predicate::Ugt => Range::new(u_lo + 1, umax),
                Predicate::Uge => Range::new(u_lo, umax),
                _ => unreachable!(),
            }
        }
    }
}
