use thiserror::Error;

/// Stage status codes.
///
/// The pipeline short-circuits on the first failing stage; workspace contents
/// written by earlier stages are then indeterminate and must not be consumed.
/// The two denominator codes are reserved for backend reductions that can
/// abort mid-flight; the built-in CPU path never produces them on finite
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The max reduction of the denominator stage aborted.
    #[error("denominator max reduction failed")]
    DenominatorReduceMax,
    /// The sum-of-exponentials reduction of the denominator stage aborted.
    #[error("denominator sum reduction failed")]
    DenominatorReduceSum,
    /// The log-prob pair projection failed.
    #[error("log-prob projection failed")]
    LogProbs,
    /// The alpha/beta recursion or the cost extraction failed.
    #[error("alpha/beta/cost recursion failed")]
    AlphasBetasCosts,
    /// The gradient stage failed.
    #[error("gradient computation failed")]
    Gradients,
}
