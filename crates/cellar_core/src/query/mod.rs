//! Queries over a view.
//!
//! [`Results`] are built from a type and narrowed with string predicates
//! such as `age > 20 AND name BEGINSWITH[c] "a"`. Predicates are parsed and
//! checked against the type when `filtered` is called; evaluation happens
//! on access, using an index where one answers a comparison.

mod parser;
mod predicate;
mod results;

pub use parser::{parse, Comparison, Operator};
pub use results::{Results, ResultsIter};
