use crate::element::{cast, AccElement, LogitElement};
use crate::error::ComputeError;
use crate::ops::{Grid, RowView, RowViewMut};
use crate::options::Options;
use crate::sharing::UnsafeSharedRef;
use crate::sparse::{SampleCells, SparseLayout};
use crate::{iter_range_par, run_par};

/// Gradient storage selector.
pub(crate) enum GradientStorage<'a> {
    Dense,
    Sparse { layout: &'a SparseLayout<'a> },
}

#[derive(Clone, Copy)]
struct GradientParams<A> {
    blank: usize,
    clamp: A,
    fused: bool,
}

/// The fused log-softmax gradient of one cell row.
///
/// With `c = alpha(t, u) + cost - denom(t, u)` and `g = x + c` the gradient
/// of the cost with respect to logit `x` is `exp(g + beta(t, u))` minus the
/// probability mass that flows out of `(t, u)` through `x`'s transition, per
/// the function-merging identity. In non-fused mode the normalization was
/// applied upstream: `c` already carries no denominator and the terminal
/// blank keeps only its first term.
#[allow(clippy::too_many_arguments)]
#[inline(always)]
fn gradient_value<A: AccElement>(
    params: &GradientParams<A>,
    x: A,
    c: A,
    t: usize,
    u: usize,
    d: usize,
    src_len: usize,
    tgt_len: usize,
    target: Option<usize>,
    beta_here: A,
    beta_skip: A,
    beta_emit: A,
) -> A {
    let g = x + c;

    let mut value = if d == params.blank && t == src_len - 1 && u == tgt_len - 1 {
        if params.fused {
            (g + beta_here).exp_elem() - g.exp_elem()
        } else {
            (g + beta_here).exp_elem()
        }
    } else if d == params.blank && t < src_len - 1 {
        (g + beta_here).exp_elem() - (g + beta_skip).exp_elem()
    } else if target == Some(d) {
        (g + beta_here).exp_elem() - (g + beta_emit).exp_elem()
    } else {
        (g + beta_here).exp_elem()
    };

    if params.clamp > A::zero() {
        if value > params.clamp {
            value = params.clamp;
        }
        if value < -params.clamp {
            value = -params.clamp;
        }
    }

    value
}

/// Dense gradient of one sample, written row by row. `logits` is `None` when
/// the gradient buffer is the logit buffer; each element is then read before
/// it is overwritten, which is safe because the formula only touches the
/// current cell's logits.
#[allow(clippy::too_many_arguments)]
fn gradients_one_sequence<L: LogitElement, A: AccElement>(
    params: &GradientParams<A>,
    max_src_len: usize,
    max_tgt_len: usize,
    logits: Option<RowView<L>>,
    targets: &[i32],
    src_len: usize,
    tgt_len: usize,
    denominators: &[A],
    alpha: Grid<A>,
    beta: Grid<A>,
    grads: &mut RowViewMut<L>,
) {
    let cost = -beta[[0, 0]];

    for t in 0..src_len {
        for u in 0..tgt_len {
            let cell = t * max_tgt_len + u;
            let denominator = if params.fused { denominators[cell] } else { A::zero() };
            let c = alpha[[t, u]] + cost - denominator;

            let target = (u < tgt_len - 1).then(|| targets[u] as usize);
            let beta_here = beta[[t, u]];
            let beta_skip = if t + 1 < src_len {
                beta[[t + 1, u]]
            } else {
                A::neg_infinity()
            };
            let beta_emit = if u + 1 < tgt_len {
                beta[[t, u + 1]]
            } else {
                A::neg_infinity()
            };

            let row = grads.row_mut(cell);
            for (d, slot) in row.iter_mut().enumerate() {
                let x: A = match &logits {
                    Some(view) => cast(view.row(cell)[d]),
                    None => cast(*slot),
                };
                let value = gradient_value(
                    params, x, c, t, u, d, src_len, tgt_len, target, beta_here, beta_skip,
                    beta_emit,
                );
                *slot = L::from_f64(value.to_f64());
            }
        }
    }

    // When the gradients reuse the logit memory the padding still holds stale
    // logits and must be zeroed; a separate buffer keeps its contents.
    if logits.is_none() {
        let zero = L::from_f64(0.0);
        for t in src_len..max_src_len {
            for u in 0..max_tgt_len {
                grads.row_mut(t * max_tgt_len + u).fill(zero);
            }
        }
        for t in 0..src_len {
            for u in tgt_len..max_tgt_len {
                grads.row_mut(t * max_tgt_len + u).fill(zero);
            }
        }
    }
}

/// Packed-cell gradient of one sample. The packed layout materializes only
/// reachable cells, so there is no padding to zero in in-place mode.
#[allow(clippy::too_many_arguments)]
fn gradients_one_sequence_sparse<L: LogitElement, A: AccElement>(
    params: &GradientParams<A>,
    logits: Option<RowView<L>>,
    targets: &[i32],
    src_len: usize,
    tgt_len: usize,
    cells: &SampleCells,
    denominators: &[A],
    alpha: Grid<A>,
    beta: Grid<A>,
    grads: &mut RowViewMut<L>,
) {
    let cost = -beta[[0, 0]];

    for u in 0..tgt_len {
        let (t_start, t_end) = cells.range(u);
        for t in t_start..=t_end {
            let cell = cells.index(t, u);
            let denominator = if params.fused { denominators[cell] } else { A::zero() };
            let c = alpha[[t, u]] + cost - denominator;

            let target = (u < tgt_len - 1).then(|| targets[u] as usize);
            let beta_here = beta[[t, u]];
            let beta_skip = if t + 1 < src_len {
                beta[[t + 1, u]]
            } else {
                A::neg_infinity()
            };
            let beta_emit = if u + 1 < tgt_len {
                beta[[t, u + 1]]
            } else {
                A::neg_infinity()
            };

            let row = grads.row_mut(cell);
            for (d, slot) in row.iter_mut().enumerate() {
                let x: A = match &logits {
                    Some(view) => cast(view.row(cell)[d]),
                    None => cast(*slot),
                };
                let value = gradient_value(
                    params, x, c, t, u, d, src_len, tgt_len, target, beta_here, beta_skip,
                    beta_emit,
                );
                *slot = L::from_f64(value.to_f64());
            }
        }
    }
}

/// Gradient stage over the batch: one task per sample. `logits` is `None`
/// when `gradients` doubles as the logit buffer (in-place mode).
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_gradients<L: LogitElement, A: AccElement>(
    options: &Options,
    storage: &GradientStorage,
    logits: Option<&[L]>,
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    denominators: &[A],
    alphas: &[A],
    betas: &[A],
    gradients: &mut [L],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let lattice = options.lattice_cells();
    let dim = options.num_targets;
    let max_u = options.max_tgt_len;

    let params = GradientParams {
        blank: options.blank,
        clamp: A::from_f64(options.clamp as f64),
        fused: options.fused_log_softmax,
    };

    let shared_grads = UnsafeSharedRef::new(gradients);

    run_par!(|| {
        iter_range_par!(0, batch).for_each(|b| unsafe {
            let gradients = shared_grads.get();
            let src_len = src_lengths[b] as usize;
            let tgt_len = tgt_lengths[b] as usize + 1;
            let targets = &targets[b * (max_u - 1)..(b + 1) * (max_u - 1)];
            let alpha = Grid::new(&alphas[b * lattice..(b + 1) * lattice], max_u);
            let beta = Grid::new(&betas[b * lattice..(b + 1) * lattice], max_u);

            match storage {
                GradientStorage::Dense => {
                    let mut grads = RowViewMut::new(
                        &mut gradients[b * lattice * dim..(b + 1) * lattice * dim],
                        dim,
                    );
                    gradients_one_sequence(
                        &params,
                        options.max_src_len,
                        max_u,
                        logits.map(|l| RowView::new(&l[b * lattice * dim..(b + 1) * lattice * dim], dim)),
                        targets,
                        src_len,
                        tgt_len,
                        &denominators[b * lattice..(b + 1) * lattice],
                        alpha,
                        beta,
                        &mut grads,
                    );
                }
                GradientStorage::Sparse { layout } => {
                    let cells = layout.sample(b, tgt_len);
                    let mut grads = RowViewMut::new(gradients, dim);
                    gradients_one_sequence_sparse(
                        &params,
                        logits.map(|l| RowView::new(l, dim)),
                        targets,
                        src_len,
                        tgt_len,
                        &cells,
                        denominators,
                        alpha,
                        beta,
                        &mut grads,
                    );
                }
            }
        })
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // T=1, U=1, D=2, uniform zero logits: the softmax is (1/2, 1/2) and the
    // gradient is (-1/2, +1/2).
    fn single_cell_setup() -> (GradientParams<f32>, [f32; 1], [f32; 1], [f32; 1]) {
        let params = GradientParams {
            blank: 0,
            clamp: 0.0,
            fused: true,
        };
        let denominators = [2.0f32.ln()];
        let alphas = [0.0f32];
        let betas = [-(2.0f32.ln())];
        (params, denominators, alphas, betas)
    }

    #[test]
    fn single_cell_gradient() {
        let (params, denominators, alphas, betas) = single_cell_setup();
        let logits = [0.0f32, 0.0];
        let mut grads = [0.0f32, 0.0];
        let mut grads_view = RowViewMut::new(&mut grads[..], 2);

        gradients_one_sequence(
            &params,
            1,
            1,
            Some(RowView::new(&logits[..], 2)),
            &[],
            1,
            1,
            &denominators,
            Grid::new(&alphas[..], 1),
            Grid::new(&betas[..], 1),
            &mut grads_view,
        );

        assert_relative_eq!(grads[0], -0.5, max_relative = 1e-6);
        assert_relative_eq!(grads[1], 0.5, max_relative = 1e-6);
    }

    #[test]
    fn clamp_bounds_the_gradient() {
        let (mut params, denominators, alphas, betas) = single_cell_setup();
        params.clamp = 0.1;
        let logits = [0.0f32, 0.0];
        let mut grads = [0.0f32, 0.0];
        let mut grads_view = RowViewMut::new(&mut grads[..], 2);

        gradients_one_sequence(
            &params,
            1,
            1,
            Some(RowView::new(&logits[..], 2)),
            &[],
            1,
            1,
            &denominators,
            Grid::new(&alphas[..], 1),
            Grid::new(&betas[..], 1),
            &mut grads_view,
        );

        assert_relative_eq!(grads[0], -0.1, max_relative = 1e-6);
        assert_relative_eq!(grads[1], 0.1, max_relative = 1e-6);
    }

    #[test]
    fn in_place_zeroes_padding() {
        // T=1, U=1 inside a 2x2 padded lattice.
        let params = GradientParams {
            blank: 0,
            clamp: 0.0,
            fused: true,
        };
        let denominators = [2.0f32.ln(); 4];
        let alphas = [0.0f32, f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];
        let betas = [-(2.0f32.ln()), f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];

        // The buffer holds logits and becomes the gradient.
        let mut grads = [0.0f32, 0.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0];
        let mut grads_view = RowViewMut::new(&mut grads[..], 2);

        gradients_one_sequence(
            &params,
            2,
            2,
            None,
            &[],
            1,
            1,
            &denominators,
            Grid::new(&alphas[..], 2),
            Grid::new(&betas[..], 2),
            &mut grads_view,
        );

        assert_relative_eq!(grads[0], -0.5, max_relative = 1e-6);
        assert_relative_eq!(grads[1], 0.5, max_relative = 1e-6);
        assert_eq!(&grads[2..], &[0.0; 6]);
    }

    #[test]
    fn non_fused_terminal_blank_keeps_single_term() {
        let (mut params, _, alphas, _) = single_cell_setup();
        params.fused = false;
        // Pre-normalized logits: log(1/2) each; beta(0,0) = skip = log(1/2).
        let betas = [-(2.0f32.ln())];
        let denominators = [0.0f32];
        let logits = [-(2.0f32.ln()), -(2.0f32.ln())];
        let mut grads = [0.0f32, 0.0];
        let mut grads_view = RowViewMut::new(&mut grads[..], 2);

        gradients_one_sequence(
            &params,
            1,
            1,
            Some(RowView::new(&logits[..], 2)),
            &[],
            1,
            1,
            &denominators,
            Grid::new(&alphas[..], 1),
            Grid::new(&betas[..], 1),
            &mut grads_view,
        );

        // cost = 2 ln 2 - ... with denom dropped: c = 0 + ln 2, g = ln 2 + log(1/2) = 0
        // for the blank; only exp(g + beta) survives.
        assert_relative_eq!(grads[0], 0.5, max_relative = 1e-6);
    }
}
