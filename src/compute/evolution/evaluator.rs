//! Evaluator boundary: turns a candidate's parameters into a fitness value.
//!
//! Evaluators are black boxes. They may be slow (an external simulation run
//! per call) and they may fail; failures are reported as [`EvaluationError`]
//! and never leak into genome state.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::schema::ParameterView;

/// A single candidate's evaluation failed.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation failed: {0}")]
    Failed(String),
    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Evaluator returned non-finite fitness {0}")]
    InvalidFitness(f64),
    #[error("Failed to launch evaluator process: {0}")]
    Spawn(#[source] io::Error),
    #[error("Evaluator process exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },
    #[error("Malformed evaluator output: {0}")]
    MalformedOutput(String),
}

impl EvaluationError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Per-call limits handed to an evaluator.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    timeout: Option<Duration>,
    started: Instant,
    cancelled: Arc<AtomicBool>,
}

impl EvaluationContext {
    /// Start a context now.
    pub fn new(timeout: Option<Duration>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            timeout,
            started: Instant::now(),
            cancelled,
        }
    }

    /// Context with no deadline and a private cancel flag.
    pub fn unbounded() -> Self {
        Self::new(None, Arc::new(AtomicBool::new(false)))
    }

    /// Fresh context with the same limits, restarting the clock.
    pub fn restarted(&self) -> Self {
        Self::new(self.timeout, Arc::clone(&self.cancelled))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if cancelled or past the deadline.
    pub fn check(&self) -> Result<(), EvaluationError> {
        if self.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }
        if let Some(timeout) = self.timeout
            && self.is_expired()
        {
            return Err(EvaluationError::Timeout(timeout));
        }
        Ok(())
    }
}

/// Scores one candidate.
pub trait Evaluator: Send + Sync {
    /// Return the fitness of `params`. Implementations that can be interrupted
    /// should honor `ctx`'s deadline and cancel flag.
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError>;
}

impl<E: Evaluator + ?Sized> Evaluator for Arc<E> {
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError> {
        (**self).evaluate(params, ctx)
    }
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError> {
        (**self).evaluate(params, ctx)
    }
}

/// Evaluator backed by an in-process function.
///
/// The function cannot be interrupted; a result delivered after the deadline
/// is reported as [`EvaluationError::Timeout`].
pub struct FnEvaluator<F> {
    func: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&ParameterView<'_>) -> Result<f64, EvaluationError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&ParameterView<'_>) -> Result<f64, EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError> {
        ctx.check()?;
        let fitness = (self.func)(params)?;
        ctx.check()?;
        Ok(fitness)
    }
}

/// Wraps an evaluator with a bounded number of retries.
pub struct RetryEvaluator<E> {
    inner: E,
    max_retries: u32,
}

impl<E: Evaluator> RetryEvaluator<E> {
    pub fn new(inner: E, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

impl<E: Evaluator> Evaluator for RetryEvaluator<E> {
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError> {
        let mut attempt = 0;
        let mut attempt_ctx = ctx.clone();
        loop {
            match self.inner.evaluate(params, &attempt_ctx) {
                Ok(fitness) => return Ok(fitness),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    log::debug!(
                        "retrying evaluation ({}/{}): {}",
                        attempt,
                        self.max_retries,
                        err
                    );
                    attempt_ctx = ctx.restarted();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run an evaluator and reject non-finite results.
pub(crate) fn evaluate_checked<E: Evaluator + ?Sized>(
    evaluator: &E,
    params: &ParameterView<'_>,
    ctx: &EvaluationContext,
) -> Result<f64, EvaluationError> {
    let fitness = evaluator.evaluate(params, ctx)?;
    if fitness.is_finite() {
        Ok(fitness)
    } else {
        Err(EvaluationError::InvalidFitness(fitness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FitnessDirection, ParameterSchema, ParameterSpec};
    use std::sync::atomic::AtomicU32;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(
            vec![ParameterSpec::continuous("x", -1.0, 1.0)],
            FitnessDirection::Minimize,
        )
        .unwrap()
    }

    #[test]
    fn test_fn_evaluator() {
        let schema = schema();
        let values = [0.5];
        let eval = FnEvaluator::new(|p: &ParameterView<'_>| Ok(p.values()[0] * 2.0));
        let ctx = EvaluationContext::unbounded();
        let fitness = eval
            .evaluate(&ParameterView::new(&schema, &values), &ctx)
            .unwrap();
        assert_eq!(fitness, 1.0);
    }

    #[test]
    fn test_cancelled_context_short_circuits() {
        let schema = schema();
        let values = [0.5];
        let flag = Arc::new(AtomicBool::new(true));
        let ctx = EvaluationContext::new(None, flag);
        let eval = FnEvaluator::new(|_: &ParameterView<'_>| Ok(1.0));
        assert!(matches!(
            eval.evaluate(&ParameterView::new(&schema, &values), &ctx),
            Err(EvaluationError::Cancelled)
        ));
    }

    #[test]
    fn test_late_result_is_timeout() {
        let schema = schema();
        let values = [0.5];
        let ctx = EvaluationContext::new(
            Some(Duration::from_millis(5)),
            Arc::new(AtomicBool::new(false)),
        );
        let eval = FnEvaluator::new(|_: &ParameterView<'_>| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(1.0)
        });
        assert!(matches!(
            eval.evaluate(&ParameterView::new(&schema, &values), &ctx),
            Err(EvaluationError::Timeout(_))
        ));
    }

    #[test]
    fn test_retry_bounded() {
        let schema = schema();
        let values = [0.5];
        let calls = AtomicU32::new(0);
        let eval = RetryEvaluator::new(
            FnEvaluator::new(|_: &ParameterView<'_>| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EvaluationError::Failed("flaky".into()))
                } else {
                    Ok(3.0)
                }
            }),
            2,
        );
        let ctx = EvaluationContext::unbounded();
        let params = ParameterView::new(&schema, &values);
        assert_eq!(eval.evaluate(&params, &ctx).unwrap(), 3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let schema = schema();
        let values = [0.5];
        let calls = AtomicU32::new(0);
        let eval = RetryEvaluator::new(
            FnEvaluator::new(|_: &ParameterView<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EvaluationError::Failed("broken".into()))
            }),
            1,
        );
        let ctx = EvaluationContext::unbounded();
        assert!(
            eval.evaluate(&ParameterView::new(&schema, &values), &ctx)
                .is_err()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_skips_cancelled() {
        let schema = schema();
        let values = [0.5];
        let calls = AtomicU32::new(0);
        let eval = RetryEvaluator::new(
            FnEvaluator::new(|_: &ParameterView<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EvaluationError::Cancelled)
            }),
            5,
        );
        let ctx = EvaluationContext::unbounded();
        assert!(matches!(
            eval.evaluate(&ParameterView::new(&schema, &values), &ctx),
            Err(EvaluationError::Cancelled)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_finite_rejected() {
        let schema = schema();
        let values = [0.5];
        let eval = FnEvaluator::new(|_: &ParameterView<'_>| Ok(f64::NAN));
        let ctx = EvaluationContext::unbounded();
        assert!(matches!(
            evaluate_checked(&eval, &ParameterView::new(&schema, &values), &ctx),
            Err(EvaluationError::InvalidFitness(_))
        ));
    }
}
