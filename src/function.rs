//! The façade: a typed function over an expression arena.
//!
//! A [`Function`] owns an arena, one argument node per parameter and the body
//! built from them. The same body can be evaluated, compiled, or handed to a
//! model checker together with a constraint built over the body and the
//! parameters. Every entry point runs on a worker thread with
//! [`Options::stack_size`] bytes of stack.
//!
//! ```no_run
//! use triform::function::Function;
//! use triform::solver::Backend;
//! use triform::types::Type;
//! use triform::value::Value;
//!
//! # fn main() -> triform::error::Result<()> {
//! let succ = Function::new(vec![Type::u32()], |arena, xs| {
//!     let one = arena.u32(1);
//!     arena.add(xs[0], one)
//! })?;
//! assert_eq!(succ.evaluate(&[Value::fixed(41, 32, false)?])?, Value::fixed(42, 32, false)?);
//!
//! let wraps = succ.find(
//!     |arena, output, _| {
//!         let zero = arena.u32(0);
//!         arena.eq(output, zero)
//!     },
//!     &Backend::default(),
//! )?;
//! assert_eq!(wraps, Some(vec![Value::fixed(4294967295, 32, false)?]));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::debug;

use crate::compiler::{compile, CompiledFunction};
use crate::error::{invalid, Error, Result};
use crate::expr::{ArgId, ExprArena, ExprId};
use crate::interpreter::{Interpreter, Scope};
use crate::model_checker::{model_checker, Assignment, Query};
use crate::solver::Backend;
use crate::types::Type;
use crate::value::Value;
use crate::worker::{run_on_worker, DEFAULT_STACK_SIZE};

#[derive(Debug, Clone)]
pub struct Options {
    /// Stack of the worker thread each entry point runs on.
    pub stack_size: usize,
    /// Number of guarded slots a symbolic sequence input gets.
    pub max_list_length: usize,
    pub memoize_interpreter: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_list_length: 5,
            memoize_interpreter: true,
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum Search {
    Satisfy,
    Maximize(ExprId),
    Minimize(ExprId),
}

pub struct Function {
    arena: Arc<ExprArena>,
    params: Vec<(ArgId, ExprId)>,
    types: Vec<Type>,
    body: ExprId,
    output: Type,
    options: Options,
}

impl Function {
    /// Build a function of `types`. `build` receives the arena and one
    /// argument node per parameter, and returns the body.
    pub fn new<F>(types: Vec<Type>, build: F) -> Result<Self>
    where
        F: FnOnce(&ExprArena, &[ExprId]) -> Result<ExprId>,
    {
        for ty in &types {
            ty.validate()?;
        }
        let arena = Arc::new(ExprArena::new());
        let params: Vec<(ArgId, ExprId)> = types.iter().map(|t| arena.argument(t.clone())).collect();
        let nodes: Vec<ExprId> = params.iter().map(|(_, node)| *node).collect();
        let body = build(&arena, &nodes)?;
        let output = arena.check(body)?;
        debug!("function of {} parameters returning {} ({} nodes)", types.len(), output, arena.len());
        Ok(Self {
            arena,
            params,
            types,
            body,
            output,
            options: Options::default(),
        })
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn body(&self) -> ExprId {
        self.body
    }

    pub fn param_types(&self) -> &[Type] {
        &self.types
    }

    pub fn output_type(&self) -> &Type {
        &self.output
    }

    fn param_nodes(&self) -> Vec<ExprId> {
        self.params.iter().map(|(_, node)| *node).collect()
    }

    fn check_args(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.types.len() {
            return Err(Error::Arity {
                expected: self.types.len(),
                found: args.len(),
            });
        }
        for (arg, ty) in args.iter().zip(&self.types) {
            if !arg.conforms(ty) {
                return invalid(format!("argument {} is not a {}", arg, ty));
            }
        }
        Ok(())
    }

    /// Interpret the body on concrete arguments.
    pub fn evaluate(&self, args: &[Value]) -> Result<Value> {
        self.check_args(args)?;
        run_on_worker(self.options.stack_size, || {
            Interpreter::new(&self.arena)
                .memoized(self.options.memoize_interpreter)
                .run(self.body, &Scope::inputs(&self.params, args))
        })
    }

    /// Compile the body, unrolling case-splits up to `max_unroll_depth`
    /// levels deep.
    pub fn compile(&self, max_unroll_depth: usize) -> Result<CompiledFunction> {
        run_on_worker(self.options.stack_size, || {
            compile(&self.arena, &self.params, self.body, max_unroll_depth)
        })
    }

    /// Build a boolean constraint over the body and the parameters.
    fn constraint<F>(&self, build: F) -> Result<ExprId>
    where
        F: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
    {
        let constraint = build(&self.arena, self.body, &self.param_nodes())?;
        let ty = self.arena.check(constraint)?;
        if ty != Type::Bool {
            return invalid(format!("constraint must be boolean, found {}", ty));
        }
        Ok(constraint)
    }

    fn search(&self, search: Search, constraint: ExprId, backend: &Backend) -> Result<Option<Assignment>> {
        let query = Query {
            constraint,
            inputs: self
                .params
                .iter()
                .zip(&self.types)
                .map(|((arg, _), ty)| (*arg, ty.clone()))
                .collect(),
        };
        run_on_worker(self.options.stack_size, || {
            let mut checker = model_checker(backend, self.options.max_list_length);
            match search {
                Search::Satisfy => checker.model_check(&self.arena, &query),
                Search::Maximize(objective) => checker.maximize(&self.arena, objective, &query),
                Search::Minimize(objective) => checker.minimize(&self.arena, objective, &query),
            }
        })
    }

    /// Inputs for which `invariant(output, inputs)` holds, if any.
    pub fn find<F>(&self, invariant: F, backend: &Backend) -> Result<Option<Vec<Value>>>
    where
        F: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
    {
        let constraint = self.constraint(invariant)?;
        Ok(self.search(Search::Satisfy, constraint, backend)?.map(|a| a.inputs))
    }

    /// Every input satisfying `invariant`, one solver call per item. Each
    /// answer is excluded from the following calls.
    pub fn find_all<F>(&self, invariant: F, backend: &Backend) -> Result<FindAll<'_>>
    where
        F: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
    {
        let constraint = self.constraint(invariant)?;
        Ok(FindAll {
            function: self,
            backend: backend.clone(),
            constraint: Some(constraint),
        })
    }

    /// Inputs satisfying `precondition`, one per distinct execution path of
    /// the body.
    pub fn generate_inputs<F>(&self, precondition: F, backend: &Backend) -> Result<GenerateInputs<'_>>
    where
        F: FnOnce(&ExprArena, &[ExprId]) -> Result<ExprId>,
    {
        let constraint = self.constraint(|arena, _, inputs| precondition(arena, inputs))?;
        Ok(GenerateInputs {
            function: self,
            backend: backend.clone(),
            constraint: Some(constraint),
        })
    }

    /// Inputs satisfying `constraint` that maximize the numeric `objective`.
    pub fn maximize<O, C>(&self, objective: O, constraint: C, backend: &Backend) -> Result<Option<Vec<Value>>>
    where
        O: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
        C: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
    {
        let objective = objective(&self.arena, self.body, &self.param_nodes())?;
        let constraint = self.constraint(constraint)?;
        Ok(self
            .search(Search::Maximize(objective), constraint, backend)?
            .map(|a| a.inputs))
    }

    /// Inputs satisfying `constraint` that minimize the numeric `objective`.
    pub fn minimize<O, C>(&self, objective: O, constraint: C, backend: &Backend) -> Result<Option<Vec<Value>>>
    where
        O: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
        C: FnOnce(&ExprArena, ExprId, &[ExprId]) -> Result<ExprId>,
    {
        let objective = objective(&self.arena, self.body, &self.param_nodes())?;
        let constraint = self.constraint(constraint)?;
        Ok(self
            .search(Search::Minimize(objective), constraint, backend)?
            .map(|a| a.inputs))
    }

    /// `not(inputs == values)`, over every parameter.
    fn exclude(&self, values: &[Value]) -> Result<ExprId> {
        let arena = &*self.arena;
        let equalities = self
            .params
            .iter()
            .zip(&self.types)
            .zip(values)
            .map(|(((_, node), ty), value)| {
                let constant = arena.constant(value, ty)?;
                arena.eq(*node, constant)
            })
            .collect::<Result<Vec<_>>>()?;
        let same = arena.and_all(equalities)?;
        arena.not(same)
    }

    /// The conjunction of the decisions the interpreter takes on `assignment`.
    fn path_of(&self, assignment: &Assignment) -> Result<ExprId> {
        run_on_worker(self.options.stack_size, || {
            let mut interpreter = Interpreter::new(&self.arena)
                .tracing()
                .with_arbitraries(assignment.arbitraries.clone());
            interpreter.run(self.body, &Scope::inputs(&self.params, &assignment.inputs))?;
            self.arena.and_all(interpreter.path().iter().copied())
        })
    }
}

/// Lazy enumeration of distinct satisfying inputs.
pub struct FindAll<'f> {
    function: &'f Function,
    backend: Backend,
    /// `None` once exhausted.
    constraint: Option<ExprId>,
}

impl Iterator for FindAll<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let constraint = self.constraint.take()?;
        let step = || -> Result<Option<(Vec<Value>, ExprId)>> {
            let Some(found) = self.function.search(Search::Satisfy, constraint, &self.backend)? else {
                return Ok(None);
            };
            let excluded = self.function.exclude(&found.inputs)?;
            let next = self.function.arena.and(constraint, excluded)?;
            Ok(Some((found.inputs, next)))
        };
        match step() {
            Ok(Some((inputs, next))) => {
                self.constraint = Some(next);
                Some(Ok(inputs))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Lazy path-directed input generation: each item drives the body down an
/// execution path no earlier item took.
pub struct GenerateInputs<'f> {
    function: &'f Function,
    backend: Backend,
    constraint: Option<ExprId>,
}

impl Iterator for GenerateInputs<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let constraint = self.constraint.take()?;
        let step = || -> Result<Option<(Vec<Value>, ExprId)>> {
            let Some(found) = self.function.search(Search::Satisfy, constraint, &self.backend)? else {
                return Ok(None);
            };
            let arena = &*self.function.arena;
            let path = self.function.path_of(&found)?;
            debug!("covered path {}", arena.describe(path));
            let other_path = arena.not(path)?;
            let next = arena.and(constraint, other_path)?;
            Ok(Some((found.inputs, next)))
        };
        match step() {
            Ok(Some((inputs, next))) => {
                self.constraint = Some(next);
                Some(Ok(inputs))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
