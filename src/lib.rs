//! # triform: one expression, three engines
//!
//! **`triform`** is a toolkit for verification and test-generation tools. A host
//! program builds a typed expression DAG over structured values and runs it
//! three ways:
//!
//! 1. **interpreted** directly against concrete arguments,
//! 2. **compiled** ahead of time into a flat slot machine,
//! 3. **encoded symbolically** and handed to a decision procedure, which finds
//!    satisfying or optimal inputs or shows there are none.
//!
//! ## Values
//!
//! Booleans, fixed-width integers (any width, signed or not, wrapping),
//! unbounded integers, rationals, characters, options, tuples, sequences
//! (strings are sequences of characters), maps, const-maps (maps over a fixed
//! key set) and named records. [`Type`][crate::types::Type] describes a shape
//! and [`Value`][crate::value::Value] holds one.
//!
//! ## Quick start
//!
//! ```no_run
//! use triform::function::Function;
//! use triform::solver::Backend;
//! use triform::types::Type;
//!
//! # fn main() -> triform::error::Result<()> {
//! // f(x) = x + 1 over u32
//! let f = Function::new(vec![Type::u32()], |arena, xs| {
//!     let one = arena.u32(1);
//!     arena.add(xs[0], one)
//! })?;
//!
//! // Which x makes f(x) wrap around to zero?
//! let x = f.find(
//!     |arena, output, _| {
//!         let zero = arena.u32(0);
//!         arena.eq(output, zero)
//!     },
//!     &Backend::DecisionDiagram,
//! )?;
//! println!("{:?}", x); // Some([4294967295])
//! # Ok(())
//! # }
//! ```
//!
//! ## Core components
//!
//! - **[`expr`]**: the expression arena, its builders and the visitor every engine implements.
//! - **[`interpreter`]** and **[`compiler`]**: the two concrete engines.
//! - **[`encoder`]** and **[`model_checker`]**: symbolic evaluation and the query loop on top of it.
//! - **[`solver`]**: the backend contract, realized by [`smt_solver`] (z3) and [`dd_solver`]
//!   (bit-blasting into the decision diagrams of [`bdd`]).
//! - **[`function`]**: the façade tying it together.

pub mod bdd;
pub mod compiler;
pub mod dd_solver;
pub mod encoder;
pub mod env;
pub mod error;
pub mod expr;
pub mod fixed;
pub mod function;
pub mod generate;
pub mod interpreter;
pub mod model_checker;
pub mod reference;
pub mod regex;
pub mod smt_solver;
pub mod solver;
pub mod substitute;
pub mod symbolic;
pub mod types;
pub mod value;
pub mod worker;
