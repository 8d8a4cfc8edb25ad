use crate::element::{cast, AccElement, LogitElement};
use crate::error::ComputeError;
use crate::sharing::UnsafeSharedRef;
use crate::{iter_range_par, run_par};

/// Row-wise log-partition of an `[N, D]` logit matrix.
///
/// Two passes per row: find the maximum, then accumulate
/// `sum(exp(x - max))` and emit `max + log(sum)`. `N` is the full padded
/// lattice in dense mode and the packed-cell count in sparse mode. Rows are
/// independent, so the reduction is a parallel-for over rows.
pub(crate) fn log_sum_exp_2d<L: LogitElement, A: AccElement>(
    num_rows: usize,
    dim: usize,
    logits: &[L],
    outputs: &mut [A],
) -> Result<(), ComputeError> {
    debug_assert!(dim >= 1, "empty vocabulary rows are not reducible");
    debug_assert!(logits.len() >= num_rows * dim);
    debug_assert!(outputs.len() >= num_rows);

    let shared_outputs = UnsafeSharedRef::new(outputs);

    run_par!(|| {
        iter_range_par!(0, num_rows).for_each(|row| unsafe {
            let outputs = shared_outputs.get();
            let row_logits = &logits[row * dim..(row + 1) * dim];

            let mut max: A = cast(row_logits[0]);
            for &x in &row_logits[1..] {
                let x: A = cast(x);
                if x > max {
                    max = x;
                }
            }

            let mut sum = A::zero();
            for &x in row_logits {
                sum += (cast::<L, A>(x) - max).exp_elem();
            }

            outputs[row] = max + sum.log_elem();
        })
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_row_reduces_to_log_dim() {
        let logits = [0.0f32; 8];
        let mut out = [0.0f32; 2];

        log_sum_exp_2d(2, 4, &logits, &mut out).unwrap();

        assert_relative_eq!(out[0], 4.0f32.ln(), max_relative = 1e-6);
        assert_relative_eq!(out[1], 4.0f32.ln(), max_relative = 1e-6);
    }

    #[test]
    fn matches_naive_reference() {
        let logits = [1.5f32, -0.25, 3.0, -2.0, 0.75];
        let mut out = [0.0f32; 1];

        log_sum_exp_2d(1, 5, &logits, &mut out).unwrap();

        let naive: f32 = logits.iter().map(|x| x.exp()).sum::<f32>().ln();
        assert_relative_eq!(out[0], naive, max_relative = 1e-6);
    }

    #[test]
    fn large_magnitudes_stay_finite() {
        let logits = [1000.0f32, 999.0, 998.0];
        let mut out = [0.0f32; 1];

        log_sum_exp_2d(1, 3, &logits, &mut out).unwrap();

        let expected = 1000.0 + (1.0f32 + (-1.0f32).exp() + (-2.0f32).exp()).ln();
        assert!(out[0].is_finite());
        assert_relative_eq!(out[0], expected, max_relative = 1e-6);
    }

    #[test]
    fn half_precision_input_widens() {
        use half::f16;

        let logits = [f16::from_f32(0.5), f16::from_f32(-0.5)];
        let mut out = [0.0f32; 1];

        log_sum_exp_2d(1, 2, &logits, &mut out).unwrap();

        let expected = (0.5f32.exp() + (-0.5f32).exp()).ln();
        assert_relative_eq!(out[0], expected, max_relative = 1e-3);
    }
}
