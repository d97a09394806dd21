//! Handle-addressed linear program that is mutated in place between solves.
//!
//! Structure (columns, rows, sparsity) is fixed when the owning solver is built.
//! Per-timestep data only ever flows in through [`IncrementalModel::set_row_bounds`],
//! [`IncrementalModel::set_column_bounds`] and
//! [`IncrementalModel::set_objective_coefficient`], so a model that has been
//! updated to data `D` is indistinguishable from one freshly built from `D`.
//!
//! The simplex engine is built on the first solve and kept afterwards. Every
//! finite row bound lives in its own fixed right-hand-side column, so a bound
//! change is applied to the previous optimal basis with a dual simplex re-solve
//! instead of a rebuild. The engine cannot change objective coefficients or
//! column bounds of a solved problem; a change to either rebuilds it once.

use log::debug;
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Solution, Variable};

use super::env::SolverEnv;
use crate::error::{EamodError, Result};

/// Right-hand-side columns may move within `±RHS_ENVELOPE · (1 + Σ|bound|)`
/// of the build-time bounds before the engine has to be rebuilt.
const RHS_ENVELOPE: f64 = 4.0;

/// Handle to a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnHandle(usize);

/// Handle to a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowHandle(usize);

impl ColumnHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl RowHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    cost: f64,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    coefficients: Vec<(ColumnHandle, f64)>,
    lower: f64,
    upper: f64,
}

/// Which sides of a row are finite. Changing the shape changes the engine's
/// constraint set, so it forces a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowShape {
    Free,
    Equal,
    AtLeast,
    AtMost,
    Range,
}

impl Row {
    fn shape(&self) -> RowShape {
        if self.coefficients.is_empty() {
            return RowShape::Free;
        }
        match (self.lower.is_finite(), self.upper.is_finite()) {
            _ if self.lower == self.upper => RowShape::Equal,
            (true, true) => RowShape::Range,
            (true, false) => RowShape::AtLeast,
            (false, true) => RowShape::AtMost,
            (false, false) => RowShape::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Upper,
    Both,
}

impl Side {
    fn value(self, row: &Row) -> f64 {
        match self {
            Side::Lower | Side::Both => row.lower,
            Side::Upper => row.upper,
        }
    }
}

/// Fixed column carrying one side of a row: `Σ a·x − r (op) 0`.
#[derive(Debug, Clone)]
struct RhsColumn {
    row: usize,
    side: Side,
    var: Variable,
    value: f64,
}

/// Solved engine state kept between solves.
#[derive(Debug, Clone)]
struct Engine {
    solution: Solution,
    vars: Vec<Variable>,
    rhs: Vec<RhsColumn>,
    span: f64,
    columns: Vec<Column>,
    shapes: Vec<RowShape>,
}

/// Optimal primal values of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    values: Vec<f64>,
    objective: f64,
}

impl LpSolution {
    pub fn value(&self, column: ColumnHandle) -> f64 {
        self.values[column.0]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }
}

/// Linear program with stable handles for every column and row.
#[derive(Debug, Clone)]
pub struct IncrementalModel {
    name: &'static str,
    sense: Sense,
    columns: Vec<Column>,
    rows: Vec<Row>,
    engine: Option<Engine>,
    builds: u64,
}

/// Compares the model data only; the cached engine is not part of it.
impl PartialEq for IncrementalModel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.sense == other.sense
            && self.columns == other.columns
            && self.rows == other.rows
    }
}

impl IncrementalModel {
    /// Creates an empty model. `name` identifies it in errors and logs.
    pub fn new(name: &'static str, sense: Sense) -> Self {
        Self {
            name,
            sense,
            columns: Vec::new(),
            rows: Vec::new(),
            engine: None,
            builds: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of times the simplex engine was built from scratch.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Adds a variable with objective coefficient `cost` and bounds `(lower, upper)`.
    /// Infinite bounds are allowed.
    pub fn add_column(&mut self, cost: f64, (lower, upper): (f64, f64)) -> ColumnHandle {
        self.engine = None;
        self.columns.push(Column { cost, lower, upper });
        ColumnHandle(self.columns.len() - 1)
    }

    /// Adds `lower <= Σ coef·x <= upper`. Use equal bounds for an equality row.
    pub fn add_row(&mut self, (lower, upper): (f64, f64), coefficients: &[(ColumnHandle, f64)]) -> RowHandle {
        self.engine = None;
        self.rows.push(Row {
            coefficients: coefficients.to_vec(),
            lower,
            upper,
        });
        RowHandle(self.rows.len() - 1)
    }

    pub fn set_objective_coefficient(&mut self, column: ColumnHandle, cost: f64) {
        self.columns[column.0].cost = cost;
    }

    pub fn objective_coefficient(&self, column: ColumnHandle) -> f64 {
        self.columns[column.0].cost
    }

    pub fn set_column_bounds(&mut self, column: ColumnHandle, lower: f64, upper: f64) {
        let c = &mut self.columns[column.0];
        c.lower = lower;
        c.upper = upper;
    }

    pub fn set_row_bounds(&mut self, row: RowHandle, lower: f64, upper: f64) {
        let r = &mut self.rows[row.0];
        r.lower = lower;
        r.upper = upper;
    }

    pub fn row_bounds(&self, row: RowHandle) -> (f64, f64) {
        let r = &self.rows[row.0];
        (r.lower, r.upper)
    }

    /// Solves the current data with the simplex engine, re-solving from the
    /// previous basis when only row bounds changed since the last solve.
    ///
    /// Fails with [`EamodError::InfeasibleModel`] or [`EamodError::UnboundedModel`]
    /// instead of returning a default flow.
    pub fn solve(&mut self, env: &SolverEnv) -> Result<LpSolution> {
        env.record_solve();
        for row in &self.rows {
            if row.coefficients.is_empty() && (row.lower > 0.0 || row.upper < 0.0) {
                return Err(EamodError::InfeasibleModel { model: self.name });
            }
        }
        if self.columns.is_empty() {
            return Ok(LpSolution {
                values: Vec::new(),
                objective: 0.0,
            });
        }

        let engine = match self.engine.take().and_then(|engine| self.apply_deltas(engine)) {
            Some(engine) => engine,
            None => {
                self.builds += 1;
                debug!("{}: building simplex engine (build {})", self.name, self.builds);
                self.build()?
            }
        };
        let solution = LpSolution {
            values: engine.vars.iter().map(|&v| engine.solution[v]).collect(),
            objective: engine.solution.objective(),
        };
        self.engine = Some(engine);
        Ok(solution)
    }

    fn shapes(&self) -> Vec<RowShape> {
        self.rows.iter().map(Row::shape).collect()
    }

    fn engine_error(&self, error: minilp::Error) -> EamodError {
        match error {
            minilp::Error::Infeasible => EamodError::InfeasibleModel { model: self.name },
            minilp::Error::Unbounded => EamodError::UnboundedModel { model: self.name },
        }
    }

    /// Moves the changed right-hand sides of a solved engine to their new
    /// values. `None` means the engine has to be rebuilt; a failed warm
    /// re-solve is always confirmed by a rebuild.
    fn apply_deltas(&self, mut engine: Engine) -> Option<Engine> {
        if engine.columns != self.columns || engine.shapes != self.shapes() {
            return None;
        }
        let mut changed = 0;
        for i in 0..engine.rhs.len() {
            let column = &engine.rhs[i];
            let value = column.side.value(&self.rows[column.row]);
            if value == column.value {
                continue;
            }
            if value.abs() > engine.span {
                return None;
            }
            let var = column.var;
            engine.solution = engine.solution.fix_var(var, value).ok()?;
            engine.rhs[i].value = value;
            changed += 1;
        }
        debug!("{}: warm re-solve with {} changed row bounds", self.name, changed);
        Some(engine)
    }

    fn build(&self) -> Result<Engine> {
        let direction = match self.sense {
            Sense::Minimize => OptimizationDirection::Minimize,
            Sense::Maximize => OptimizationDirection::Maximize,
        };
        let mut problem = Problem::new(direction);
        let vars: Vec<_> = self
            .columns
            .iter()
            .map(|c| problem.add_var(c.cost, (c.lower, c.upper)))
            .collect();

        let span = RHS_ENVELOPE
            * self
                .rows
                .iter()
                .flat_map(|r| [r.lower, r.upper])
                .filter(|b| b.is_finite())
                .fold(1.0, |total: f64, b| total + b.abs());
        let shapes = self.shapes();
        let mut rhs = Vec::new();
        for (i, (row, shape)) in self.rows.iter().zip(&shapes).enumerate() {
            let sides: &[(Side, ComparisonOp)] = match shape {
                RowShape::Free => &[],
                RowShape::Equal => &[(Side::Both, ComparisonOp::Eq)],
                RowShape::AtLeast => &[(Side::Lower, ComparisonOp::Ge)],
                RowShape::AtMost => &[(Side::Upper, ComparisonOp::Le)],
                RowShape::Range => &[(Side::Lower, ComparisonOp::Ge), (Side::Upper, ComparisonOp::Le)],
            };
            for &(side, op) in sides {
                let var = problem.add_var(0.0, (-span, span));
                let mut expr = LinearExpr::empty();
                for (column, coef) in &row.coefficients {
                    expr.add(vars[column.0], *coef);
                }
                expr.add(var, -1.0);
                problem.add_constraint(expr, op, 0.0);
                rhs.push(RhsColumn {
                    row: i,
                    side,
                    var,
                    value: side.value(row),
                });
            }
        }

        let mut solution = problem.solve().map_err(|e| self.engine_error(e))?;
        for column in &rhs {
            solution = solution
                .fix_var(column.var, column.value)
                .map_err(|e| self.engine_error(e))?;
        }
        Ok(Engine {
            solution,
            vars,
            rhs,
            span,
            columns: self.columns.clone(),
            shapes,
        })
    }
}
