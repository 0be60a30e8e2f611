//! Satisfiability and optimization queries over expressions.
//!
//! A [`ModelChecker`] encodes a boolean constraint with the [`Encoder`], asks
//! its backend for a model and reads the model back into host [`Value`]s: one
//! per query input and one per arbitrary node the constraint reached.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use z3::{Config, Context};

use crate::encoder::{ArbitraryRegistry, Encoder, RegistryKey};
use crate::env::Env;
use crate::error::{invalid, Result};
use crate::expr::{ArgId, ExprArena, ExprId};
use crate::dd_solver::DdSolver;
use crate::smt_solver::SmtSolver;
use crate::solver::{Backend, Objective, SmtOptions, SolveOutcome, Solver};
use crate::symbolic::SymbolicValue;
use crate::types::Type;
use crate::value::{RecordValue, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckerState {
    Idle,
    Encoding,
    Solved,
    Unsat,
}

/// A boolean constraint over the arguments bound by `inputs`.
#[derive(Debug, Clone)]
pub struct Query {
    pub constraint: ExprId,
    pub inputs: Vec<(ArgId, Type)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// One value per query input, in order.
    pub inputs: Vec<Value>,
    /// Values chosen for the arbitrary nodes the constraint depends on.
    pub arbitraries: HashMap<ExprId, Value>,
}

pub trait ModelChecker {
    /// An assignment satisfying the query, or `None` when there is none (or
    /// the backend gave up).
    fn model_check(&mut self, arena: &ExprArena, query: &Query) -> Result<Option<Assignment>>;

    /// A satisfying assignment maximizing the numeric `objective`.
    fn maximize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>>;

    /// A satisfying assignment minimizing the numeric `objective`.
    fn minimize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>>;

    fn state(&self) -> CheckerState;
}

#[derive(Debug, Copy, Clone)]
enum Goal {
    Satisfy,
    Maximize(ExprId),
    Minimize(ExprId),
}

impl Goal {
    fn objective(self) -> Option<ExprId> {
        match self {
            Goal::Satisfy => None,
            Goal::Maximize(o) | Goal::Minimize(o) => Some(o),
        }
    }
}

fn objective_of<S: Solver>(value: SymbolicValue<S>) -> Result<Objective<S>> {
    match value {
        SymbolicValue::BitVec { value, signed, .. } => Ok(Objective::BitVec { value, signed }),
        SymbolicValue::Int(x) => Ok(Objective::Int(x)),
        SymbolicValue::Real(x) => Ok(Objective::Real(x)),
        other => invalid(format!("objective must be numeric, found {:?}", other)),
    }
}

fn check<S: Solver>(
    solver: &mut S,
    arena: &ExprArena,
    query: &Query,
    goal: Goal,
    max_list_length: usize,
    state: &mut CheckerState,
) -> Result<Option<Assignment>> {
    *state = CheckerState::Encoding;
    let result = solve_query(solver, arena, query, goal, max_list_length);
    *state = match &result {
        Ok(Some(_)) => CheckerState::Solved,
        Ok(None) => CheckerState::Unsat,
        Err(_) => CheckerState::Idle,
    };
    result
}

fn solve_query<S: Solver>(
    solver: &mut S,
    arena: &ExprArena,
    query: &Query,
    goal: Goal,
    max_list_length: usize,
) -> Result<Option<Assignment>> {
    let constraint_ty = arena.check(query.constraint)?;
    if constraint_ty != Type::Bool {
        return invalid(format!("constraint must be boolean, found {}", constraint_ty));
    }
    if let Some(objective) = goal.objective() {
        let ty = arena.check(objective)?;
        if !ty.is_numeric() {
            return invalid(format!("objective must be numeric, found {}", ty));
        }
    }

    let name = solver.name();
    let mut encoder = Encoder::new(arena, solver, max_list_length);
    let mut env = Env::new();
    for (i, (arg, ty)) in query.inputs.iter().enumerate() {
        let value = encoder.input(i, ty)?;
        env = env.bind(*arg, value);
    }
    let constraint = encoder.encode(query.constraint, &env)?;
    let objective = goal.objective().map(|o| encoder.encode(o, &env)).transpose()?;
    let (registry, side) = encoder.finish();
    let assertion = solver.and(&[side, constraint.as_bool().clone()]);

    debug!("{}: solving {:?} for {:?}", name, goal, query.constraint);
    let outcome = match (goal, objective) {
        (Goal::Maximize(_), Some(o)) => solver.maximize(&objective_of(o)?, &assertion),
        (Goal::Minimize(_), Some(o)) => solver.minimize(&objective_of(o)?, &assertion),
        _ => solver.solve(&assertion),
    };
    match outcome {
        SolveOutcome::Sat(model) => {
            let assignment = Reconstruct {
                solver: &*solver,
                model: &model,
                registry: &registry,
            }
            .assignment(query.inputs.len())?;
            info!("{}: found {:?}", name, assignment.inputs);
            Ok(Some(assignment))
        }
        SolveOutcome::Unsat => {
            info!("{}: no assignment", name);
            Ok(None)
        }
        SolveOutcome::Unknown => {
            warn!("{}: solver returned unknown, reporting no assignment", name);
            Ok(None)
        }
    }
}

/// Reads symbolic values back through a model.
struct Reconstruct<'r, S: Solver> {
    solver: &'r S,
    model: &'r S::Model,
    registry: &'r ArbitraryRegistry<S>,
}

impl<S: Solver> Reconstruct<'_, S> {
    fn assignment(&self, inputs: usize) -> Result<Assignment> {
        let mut values: Vec<Option<Value>> = vec![None; inputs];
        let mut arbitraries = HashMap::new();
        for (key, ty, symbolic) in self.registry.entries() {
            let value = self.value(symbolic, ty)?;
            match key {
                RegistryKey::Input(i) => values[*i] = Some(value),
                RegistryKey::Node(id) => {
                    arbitraries.insert(*id, value);
                }
            }
        }
        let inputs = values
            .into_iter()
            .map(|v| v.unwrap_or_else(|| unreachable!("every input is registered")))
            .collect();
        Ok(Assignment { inputs, arbitraries })
    }

    fn value(&self, symbolic: &SymbolicValue<S>, ty: &Type) -> Result<Value> {
        let (solver, model) = (self.solver, self.model);
        Ok(match (symbolic, ty) {
            (SymbolicValue::Bool(b), _) => Value::Bool(solver.eval_bool(model, b)),
            (SymbolicValue::BitVec { value, width, signed }, _) => {
                Value::Fixed(solver.eval_bitvec(model, value, *width, *signed)?)
            }
            (SymbolicValue::Int(x), _) => Value::Integer(solver.eval_int(model, x)?),
            (SymbolicValue::Real(x), _) => Value::Real(solver.eval_real(model, x)?),
            (SymbolicValue::Char(c), _) => Value::Char(solver.eval_char(model, c)?),
            (SymbolicValue::Record(_), Type::Option(inner)) => {
                if solver.eval_bool(model, symbolic.field(0).as_bool()) {
                    Value::some(self.value(symbolic.field(1), inner)?)
                } else {
                    Value::none()
                }
            }
            (SymbolicValue::Record(fields), Type::Tuple(types)) => Value::Tuple(
                fields
                    .iter()
                    .zip(types)
                    .map(|((_, v), t)| self.value(v, t))
                    .collect::<Result<_>>()?,
            ),
            (SymbolicValue::Record(fields), Type::Record(shape)) => Value::Record(RecordValue::new(
                shape.clone(),
                fields
                    .iter()
                    .zip(shape.fields())
                    .map(|((_, v), (_, t))| self.value(v, t))
                    .collect::<Result<_>>()?,
            )),
            (SymbolicValue::Seq { items, .. }, Type::Seq(element)) => {
                let mut values = Vec::new();
                for (guard, item) in items {
                    if solver.eval_bool(model, guard) {
                        values.push(self.value(item, element)?);
                    }
                }
                Value::Seq(values)
            }
            (SymbolicValue::ConstMap(entries), Type::ConstMap(shape)) => Value::ConstMap(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v, shape.value())?)))
                    .collect::<Result<_>>()?,
            ),
            (SymbolicValue::Map { present, values, .. }, Type::Map(key, value)) => {
                let mut entries = BTreeMap::new();
                for queried in self.registry.queried_keys(key) {
                    let k = self.value(queried, key)?;
                    if entries.contains_key(&k) {
                        continue;
                    }
                    let has = solver.array_select(present, queried, &Type::Bool)?;
                    if solver.eval_bool(model, has.as_bool()) {
                        let v = solver.array_select(values, queried, value)?;
                        entries.insert(k, self.value(&v, value)?);
                    }
                }
                Value::Map(entries)
            }
            (symbolic, ty) => unreachable!("{:?} does not have type {}", symbolic, ty),
        })
    }
}

/// Model checking through z3, with a fresh context per query.
#[derive(Debug)]
pub struct SmtModelChecker {
    options: SmtOptions,
    max_list_length: usize,
    state: CheckerState,
}

impl SmtModelChecker {
    pub fn new(options: SmtOptions, max_list_length: usize) -> Self {
        Self {
            options,
            max_list_length,
            state: CheckerState::Idle,
        }
    }

    fn run(&mut self, arena: &ExprArena, query: &Query, goal: Goal) -> Result<Option<Assignment>> {
        let ctx = Context::new(&Config::new());
        let mut solver = SmtSolver::new(&ctx, self.options.clone());
        check(&mut solver, arena, query, goal, self.max_list_length, &mut self.state)
    }
}

impl ModelChecker for SmtModelChecker {
    fn model_check(&mut self, arena: &ExprArena, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Satisfy)
    }

    fn maximize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Maximize(objective))
    }

    fn minimize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Minimize(objective))
    }

    fn state(&self) -> CheckerState {
        self.state
    }
}

/// Model checking by bit-blasting into a fresh decision diagram per query.
#[derive(Debug)]
pub struct DdModelChecker {
    max_list_length: usize,
    state: CheckerState,
}

impl DdModelChecker {
    pub fn new(max_list_length: usize) -> Self {
        Self {
            max_list_length,
            state: CheckerState::Idle,
        }
    }

    fn run(&mut self, arena: &ExprArena, query: &Query, goal: Goal) -> Result<Option<Assignment>> {
        let mut solver = DdSolver::new();
        let result = check(&mut solver, arena, query, goal, self.max_list_length, &mut self.state);
        debug!("decision diagram grew to {} nodes", solver.bdd().size());
        result
    }
}

impl ModelChecker for DdModelChecker {
    fn model_check(&mut self, arena: &ExprArena, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Satisfy)
    }

    fn maximize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Maximize(objective))
    }

    fn minimize(&mut self, arena: &ExprArena, objective: ExprId, query: &Query) -> Result<Option<Assignment>> {
        self.run(arena, query, Goal::Minimize(objective))
    }

    fn state(&self) -> CheckerState {
        self.state
    }
}

pub fn model_checker(backend: &Backend, max_list_length: usize) -> Box<dyn ModelChecker> {
    match backend {
        Backend::Smt(options) => Box::new(SmtModelChecker::new(options.clone(), max_list_length)),
        Backend::DecisionDiagram => Box::new(DdModelChecker::new(max_list_length)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::error::Error;
    use crate::interpreter::{Interpreter, Scope};

    fn backends() -> Vec<Backend> {
        vec![Backend::default(), Backend::DecisionDiagram]
    }

    #[test]
    fn test_overflow_witness_on_both_backends() {
        for backend in backends() {
            let arena = ExprArena::new();
            let (arg, x) = arena.argument(Type::u32());
            let one = arena.u32(1);
            let sum = arena.add(x, one).unwrap();
            let zero = arena.u32(0);
            let constraint = arena.eq(sum, zero).unwrap();
            let query = Query {
                constraint,
                inputs: vec![(arg, Type::u32())],
            };
            let mut checker = model_checker(&backend, 5);
            assert_eq!(checker.state(), CheckerState::Idle);
            let found = checker.model_check(&arena, &query).unwrap().unwrap();
            assert_eq!(found.inputs, vec![Value::fixed(4294967295, 32, false).unwrap()]);
            assert_eq!(checker.state(), CheckerState::Solved);
        }
    }

    #[test]
    fn test_unsat_moves_to_unsat_state() {
        for backend in backends() {
            let arena = ExprArena::new();
            let (arg, x) = arena.argument(Type::u8());
            let ten = arena.u8(10);
            let below = arena.lt(x, ten).unwrap();
            let above = arena.gt(x, ten).unwrap();
            let constraint = arena.and(below, above).unwrap();
            let query = Query {
                constraint,
                inputs: vec![(arg, Type::u8())],
            };
            let mut checker = model_checker(&backend, 5);
            assert_eq!(checker.model_check(&arena, &query).unwrap(), None);
            assert_eq!(checker.state(), CheckerState::Unsat);
        }
    }

    #[test]
    fn test_arbitrary_nodes_are_assigned() {
        for backend in backends() {
            let arena = ExprArena::new();
            let (arg, x) = arena.argument(Type::u8());
            let hidden = arena.arbitrary(Type::u8());
            let sum = arena.add(x, hidden).unwrap();
            let target = arena.u8(200);
            let constraint = arena.eq(sum, target).unwrap();
            let query = Query {
                constraint,
                inputs: vec![(arg, Type::u8())],
            };
            let found = model_checker(&backend, 5).model_check(&arena, &query).unwrap().unwrap();
            let value = Interpreter::new(&arena)
                .with_arbitraries(found.arbitraries.clone())
                .run(constraint, &Scope::inputs(&[(arg, x)], &found.inputs))
                .unwrap();
            assert_eq!(value, Value::Bool(true));
        }
    }

    #[test]
    fn test_composite_inputs_reconstructed() {
        for backend in backends() {
            let arena = ExprArena::new();
            let ty = Type::tuple(vec![Type::option(Type::u8()), Type::seq(Type::Bool)]);
            let (arg, x) = arena.argument(ty.clone());
            let first = arena.tuple_get(x, 0).unwrap();
            let seven = arena.u8(7);
            let some_seven = arena.some(seven).unwrap();
            let has_seven = arena.eq(first, some_seven).unwrap();
            let flags = arena.tuple_get(x, 1).unwrap();
            let length = arena.seq_length(flags).unwrap();
            let two = arena.u32(2);
            let has_two = arena.eq(length, two).unwrap();
            let constraint = arena.and(has_seven, has_two).unwrap();
            let query = Query {
                constraint,
                inputs: vec![(arg, ty.clone())],
            };
            let found = model_checker(&backend, 3).model_check(&arena, &query).unwrap().unwrap();
            let Value::Tuple(items) = &found.inputs[0] else {
                panic!("expected a tuple, got {}", found.inputs[0]);
            };
            assert_eq!(items[0], Value::some(Value::fixed(7, 8, false).unwrap()));
            assert_eq!(items[1].as_seq().map(|s| s.len()), Some(2));
            assert!(found.inputs[0].conforms(&ty));
        }
    }

    #[test]
    fn test_map_keys_read_back() {
        let arena = ExprArena::new();
        let ty = Type::map(Type::u8(), Type::u8());
        let (arg, m) = arena.argument(ty.clone());
        let one = arena.u8(1);
        let got = arena.map_get(m, one).unwrap();
        let two = arena.u8(2);
        let some_two = arena.some(two).unwrap();
        let constraint = arena.eq(got, some_two).unwrap();
        let query = Query {
            constraint,
            inputs: vec![(arg, ty)],
        };
        let found = model_checker(&Backend::default(), 5)
            .model_check(&arena, &query)
            .unwrap()
            .unwrap();
        let Value::Map(entries) = &found.inputs[0] else {
            panic!("expected a map, got {}", found.inputs[0]);
        };
        assert_eq!(
            entries.get(&Value::fixed(1, 8, false).unwrap()),
            Some(&Value::fixed(2, 8, false).unwrap())
        );
    }

    #[test]
    fn test_maps_unsupported_by_decision_diagrams() {
        let arena = ExprArena::new();
        let ty = Type::map(Type::u8(), Type::u8());
        let (arg, m) = arena.argument(ty.clone());
        let empty = arena.map_empty(Type::u8(), Type::u8());
        let constraint = arena.eq(m, empty).unwrap();
        let query = Query {
            constraint,
            inputs: vec![(arg, ty)],
        };
        let mut checker = model_checker(&Backend::DecisionDiagram, 5);
        let result = checker.model_check(&arena, &query);
        assert!(matches!(result, Err(Error::Unsupported(_))), "{:?}", result);
        assert_eq!(checker.state(), CheckerState::Idle);
    }

    #[test]
    fn test_optimize_signed_objective() {
        for backend in backends() {
            let arena = ExprArena::new();
            let (arg, x) = arena.argument(Type::i8());
            let bound = arena.fixed(20, 8, true).unwrap();
            let constraint = arena.lt(x, bound).unwrap();
            let query = Query {
                constraint,
                inputs: vec![(arg, Type::i8())],
            };
            let mut checker = model_checker(&backend, 5);
            let max = checker.maximize(&arena, x, &query).unwrap().unwrap();
            assert_eq!(max.inputs, vec![Value::fixed(19, 8, true).unwrap()]);
            let min = checker.minimize(&arena, x, &query).unwrap().unwrap();
            assert_eq!(min.inputs, vec![Value::fixed(-128, 8, true).unwrap()]);
        }
    }

    #[test]
    fn test_non_numeric_objective_rejected() {
        let arena = ExprArena::new();
        let (arg, x) = arena.argument(Type::Bool);
        let query = Query {
            constraint: x,
            inputs: vec![(arg, Type::Bool)],
        };
        let result = model_checker(&Backend::DecisionDiagram, 5).maximize(&arena, x, &query);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
