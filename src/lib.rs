//! # vra-rs: Value-Range Analysis in Rust
//!
//! **`vra-rs`** computes, for every integer SSA name of a function, a
//! conservative interval `[lo, hi]` over the arbitrary-precision integers
//! extended with `-inf`/`+inf`, such that every concrete execution keeps the
//! value inside the interval. The results feed optimizations like
//! bounds-check elimination, overflow reasoning and width narrowing.
//!
//! ## How it works
//!
//! - **e-SSA lifting** ([`essa`]) splits live ranges at conditional branches
//!   so predicate information gets its own names (`i.then`, `i.else`).
//! - A **constraint graph** ([`graph`]) gives every SSA name a variable node
//!   and every defining instruction a typed operation node (unary, binary,
//!   phi), with symbolic intersection bounds on the sigmas.
//! - A **fixed-point solver** ([`solver`]) executes the graph per strongly
//!   connected component ([`nuutila`]) using widening and narrowing, with
//!   symbolic bounds resolved in between.
//!
//! The analysis is *total*: every well-formed SSA input produces a result,
//! and conditions like division by an interval containing zero simply
//! degrade to the full range.
//!
//! ## Basic Usage
//!
//! ```rust
//! use vra_rs::analyze;
//! use vra_rs::ssa::{BinOp, Function, Predicate};
//!
//! // i = input(); if (i < 10) { a = i + 1 } else { b = i - 1 }
//! let mut f = Function::new("example");
//! let entry = f.block("entry");
//! let then_bb = f.block("then");
//! let else_bb = f.block("else");
//! let i = f.input("i", 32);
//! let ten = f.constant(10, 32);
//! let one = f.constant(1, 32);
//! f.branch(entry, Predicate::Slt, i, ten, then_bb, else_bb);
//! let a = f.binary(then_bb, "a", BinOp::Add, i, one);
//! f.ret(then_bb, Some(a));
//! let b = f.binary(else_bb, "b", BinOp::Sub, i, one);
//! f.ret(else_bb, Some(b));
//!
//! let graph = analyze(&mut f);
//! let a_range = graph.get_range("a").unwrap();
//! assert_eq!(*a_range.hi(), 10.into());   // a is at most 10
//! let b_range = graph.get_range("b").unwrap();
//! assert_eq!(*b_range.lo(), 9.into());    // b is at least 9
//! ```
//!
//! ## Core Components
//!
//! - **[`ssa`]**: the input representation and its builder.
//! - **[`graph`]**: the constraint graph and its one-pass builder.
//! - **[`range`]**: saturating interval arithmetic over big integers.
//! - **[`dot`]**: Graphviz dumps of the solved graph.

pub mod dom;
pub mod dot;
pub mod essa;
pub mod graph;
pub mod interval;
pub mod nuutila;
pub mod range;
pub mod solver;
pub mod ssa;
pub mod types;

use graph::ConstraintGraph;
use ssa::Function;

/// Runs the whole pipeline on `func`: e-SSA lifting, graph construction and
/// the fixed-point solve. The function is mutated by the lifting step; the
/// returned graph answers [`get_range`][ConstraintGraph::get_range] queries.
pub fn analyze(func: &mut Function) -> ConstraintGraph {
    essa::split_live_ranges(func);
    let mut graph = ConstraintGraph::new();
    graph.build(func);
    graph.find_intervals();
    graph
}
