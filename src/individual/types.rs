//! User-facing evaluation contracts.
//!
//! An [`Objective`] computes raw fitness for a flattened parameter
//! vector; an optional [`Constraint`] reports how badly a candidate
//! violates the feasible region. Both must be `Send + Sync` because
//! executors evaluate populations from worker threads.

/// Scratch state handed to the user's evaluation function.
///
/// Secondary criteria and the invalid mark can only be set through this
/// context, which exists for the duration of a single evaluation. This
/// is what seals the invalid-by-user lock outside of evaluations.
#[derive(Debug)]
pub struct EvalContext {
    n_criteria: usize,
    secondary: Vec<Option<f64>>,
    marked_invalid: bool,
}

impl EvalContext {
    pub(crate) fn new(n_criteria: usize) -> Self {
        EvalContext {
            n_criteria,
            secondary: vec![None; n_criteria.saturating_sub(1)],
            marked_invalid: false,
        }
    }

    /// Number of fitness criteria the surrounding population expects.
    pub fn n_criteria(&self) -> usize {
        self.n_criteria
    }

    /// Registers the raw value of a secondary fitness criterion.
    ///
    /// `id` must be in `1..n_criteria`; criterion 0 is the primary value
    /// returned from [`Objective::evaluate`] itself.
    ///
    /// # Panics
    /// Panics if `id` is 0 or out of range.
    pub fn register_secondary(&mut self, id: usize, value: f64) {
        assert!(
            id >= 1 && id < self.n_criteria,
            "secondary criterion id {id} out of range 1..{}",
            self.n_criteria
        );
        self.secondary[id - 1] = Some(value);
    }

    /// Marks the solution under evaluation as invalid.
    ///
    /// The individual is then treated like a constraint violator with an
    /// infinite validity level under the population's evaluation policy.
    pub fn mark_invalid(&mut self) {
        self.marked_invalid = true;
    }

    pub(crate) fn marked_invalid(&self) -> bool {
        self.marked_invalid
    }

    pub(crate) fn secondary(&self, id: usize) -> Option<f64> {
        self.secondary.get(id - 1).copied().flatten()
    }
}

/// A deterministic, side-effect-free fitness function.
pub trait Objective: Send + Sync {
    /// Number of fitness criteria this objective produces. Defaults to 1.
    fn n_criteria(&self) -> usize {
        1
    }

    /// Computes the primary raw fitness for `params`.
    ///
    /// Secondary criteria are registered through `ctx`; the solution can
    /// be declared unusable with [`EvalContext::mark_invalid`].
    fn evaluate(&self, params: &[f64], ctx: &mut EvalContext) -> f64;
}

/// Single-criterion objectives can be plain closures.
impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, params: &[f64], _ctx: &mut EvalContext) -> f64 {
        self(params)
    }
}

/// Reports the degree of constraint violation for a candidate.
pub trait Constraint: Send + Sync {
    /// Validity level `v >= 0`. Values `v <= 1` mean the candidate is
    /// valid; larger values express the degree of infeasibility.
    fn validity_level(&self, params: &[f64]) -> f64;
}

impl<F> Constraint for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn validity_level(&self, params: &[f64]) -> f64 {
        self(params)
    }
}
