use crate::element::AccElement;
use crate::error::ComputeError;
use crate::math::lse;
use crate::ops::{GridMut, PairView};
use crate::options::Options;
use crate::restriction::AlignmentRestrictionCheck;
use crate::sharing::UnsafeSharedRef;
use crate::sparse::{SampleCells, SparseLayout};
use crate::{iter_range_par, run_par};

/// Storage and pruning selector shared by every recursion driver, so the
/// dense, restricted and sparse paths cannot drift apart.
pub(crate) enum LatticePath<'a> {
    Dense,
    Restricted { wp_ends: &'a [i32] },
    Sparse { layout: &'a SparseLayout<'a> },
}

/// Forward recursion over one dense lattice. Returns the forward score
/// `alpha(T-1, U-1) + skip(T-1, U-1)`.
fn alpha_one_sequence<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    max_tgt_len: usize,
    alpha: &mut GridMut<A>,
) -> A {
    let cell = |t: usize, u: usize| t * max_tgt_len + u;

    alpha[[0, 0]] = A::zero();

    for t in 1..src_len {
        alpha[[t, 0]] = alpha[[t - 1, 0]] + pairs.skip(cell(t - 1, 0));
    }

    for u in 1..tgt_len {
        alpha[[0, u]] = alpha[[0, u - 1]] + pairs.emit(cell(0, u - 1));
    }

    for t in 1..src_len {
        for u in 1..tgt_len {
            alpha[[t, u]] = lse(
                alpha[[t - 1, u]] + pairs.skip(cell(t - 1, u)),
                alpha[[t, u - 1]] + pairs.emit(cell(t, u - 1)),
            );
        }
    }

    alpha[[src_len - 1, tgt_len - 1]] + pairs.skip(cell(src_len - 1, tgt_len - 1))
}

/// Forward recursion with an alignment restriction window. Every cell starts
/// at `-inf`; a cell is updated only when at least one admitted contribution
/// is finite, so everything outside the window stays `-inf`.
fn alpha_one_sequence_restricted<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    max_tgt_len: usize,
    alpha: &mut GridMut<A>,
    check: &AlignmentRestrictionCheck,
) -> A {
    let cell = |t: usize, u: usize| t * max_tgt_len + u;
    let neg_inf = A::neg_infinity();

    for t in 0..src_len {
        for u in 0..tgt_len {
            alpha[[t, u]] = neg_inf;
        }
    }
    alpha[[0, 0]] = A::zero();

    for t in 1..src_len {
        if !check.alpha_blank_transition(t, 0) {
            break;
        }
        alpha[[t, 0]] = alpha[[t - 1, 0]] + pairs.skip(cell(t - 1, 0));
    }

    for u in 1..tgt_len {
        if !check.alpha_emit_transition(0, u) {
            break;
        }
        alpha[[0, u]] = alpha[[0, u - 1]] + pairs.emit(cell(0, u - 1));
    }

    for u in 1..tgt_len {
        let (t_start, t_end) = check.valid_time_range(u);
        for t in t_start..=t_end {
            let mut skip = neg_inf;
            let mut emit = neg_inf;

            if check.alpha_blank_transition(t, u) {
                skip = alpha[[t - 1, u]] + pairs.skip(cell(t - 1, u));
            }
            if check.alpha_emit_transition(t, u) {
                emit = alpha[[t, u - 1]] + pairs.emit(cell(t, u - 1));
            }

            if skip != neg_inf || emit != neg_inf {
                alpha[[t, u]] = lse(skip, emit);
            }
        }
    }

    alpha[[src_len - 1, tgt_len - 1]] + pairs.skip(cell(src_len - 1, tgt_len - 1))
}

/// Forward recursion over packed cells. Transitions are admitted when both
/// endpoint cells are materialized; the packed ranges encode the same window
/// the restriction predicates would.
fn alpha_one_sequence_sparse<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    cells: &SampleCells,
    alpha: &mut GridMut<A>,
) -> A {
    let neg_inf = A::neg_infinity();

    for t in 0..src_len {
        for u in 0..tgt_len {
            alpha[[t, u]] = neg_inf;
        }
    }

    debug_assert!(cells.contains(0, 0), "origin cell must be materialized");
    alpha[[0, 0]] = A::zero();

    for t in 1..src_len {
        if !(cells.contains(t, 0) && cells.contains(t - 1, 0)) {
            break;
        }
        alpha[[t, 0]] = alpha[[t - 1, 0]] + pairs.skip(cells.index(t - 1, 0));
    }

    for u in 1..tgt_len {
        if !(cells.contains(0, u) && cells.contains(0, u - 1)) {
            break;
        }
        alpha[[0, u]] = alpha[[0, u - 1]] + pairs.emit(cells.index(0, u - 1));
    }

    for u in 1..tgt_len {
        let (t_start, t_end) = cells.range(u);
        for t in t_start..=t_end {
            let mut skip = neg_inf;
            let mut emit = neg_inf;

            if t >= 1 && cells.contains(t - 1, u) {
                skip = alpha[[t - 1, u]] + pairs.skip(cells.index(t - 1, u));
            }
            if cells.contains(t, u - 1) {
                emit = alpha[[t, u - 1]] + pairs.emit(cells.index(t, u - 1));
            }

            if skip != neg_inf || emit != neg_inf {
                alpha[[t, u]] = lse(skip, emit);
            }
        }
    }

    debug_assert!(cells.contains(src_len - 1, tgt_len - 1));
    alpha[[src_len - 1, tgt_len - 1]] + pairs.skip(cells.index(src_len - 1, tgt_len - 1))
}

/// Backward recursion over one dense lattice. Returns `beta(0, 0)`.
fn beta_one_sequence<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    max_tgt_len: usize,
    beta: &mut GridMut<A>,
) -> A {
    let cell = |t: usize, u: usize| t * max_tgt_len + u;
    let t_last = src_len - 1;
    let u_last = tgt_len - 1;

    beta[[t_last, u_last]] = pairs.skip(cell(t_last, u_last));

    for t in (0..t_last).rev() {
        beta[[t, u_last]] = beta[[t + 1, u_last]] + pairs.skip(cell(t, u_last));
    }

    for u in (0..u_last).rev() {
        beta[[t_last, u]] = beta[[t_last, u + 1]] + pairs.emit(cell(t_last, u));
    }

    for t in (0..t_last).rev() {
        for u in (0..u_last).rev() {
            beta[[t, u]] = lse(
                beta[[t + 1, u]] + pairs.skip(cell(t, u)),
                beta[[t, u + 1]] + pairs.emit(cell(t, u)),
            );
        }
    }

    beta[[0, 0]]
}

/// Backward recursion with an alignment restriction window. The terminal
/// cell is written unconditionally, exactly as alpha writes its origin.
fn beta_one_sequence_restricted<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    max_tgt_len: usize,
    beta: &mut GridMut<A>,
    check: &AlignmentRestrictionCheck,
) -> A {
    let cell = |t: usize, u: usize| t * max_tgt_len + u;
    let neg_inf = A::neg_infinity();
    let t_last = src_len - 1;
    let u_last = tgt_len - 1;

    for t in 0..src_len {
        for u in 0..tgt_len {
            beta[[t, u]] = neg_inf;
        }
    }

    beta[[t_last, u_last]] = pairs.skip(cell(t_last, u_last));

    for t in (0..t_last).rev() {
        if !check.beta_blank_transition(t, u_last) {
            break;
        }
        beta[[t, u_last]] = beta[[t + 1, u_last]] + pairs.skip(cell(t, u_last));
    }

    for u in (0..u_last).rev() {
        if !check.beta_emit_transition(t_last, u) {
            break;
        }
        beta[[t_last, u]] = beta[[t_last, u + 1]] + pairs.emit(cell(t_last, u));
    }

    for u in (0..u_last).rev() {
        let (t_start, t_end) = check.valid_time_range(u);
        for t in (t_start..=t_end).rev() {
            let mut skip = neg_inf;
            let mut emit = neg_inf;

            if check.beta_blank_transition(t, u) {
                skip = beta[[t + 1, u]] + pairs.skip(cell(t, u));
            }
            if check.beta_emit_transition(t, u) {
                emit = beta[[t, u + 1]] + pairs.emit(cell(t, u));
            }

            if skip != neg_inf || emit != neg_inf {
                beta[[t, u]] = lse(skip, emit);
            }
        }
    }

    beta[[0, 0]]
}

/// Backward recursion over packed cells.
fn beta_one_sequence_sparse<A: AccElement>(
    pairs: PairView<A>,
    src_len: usize,
    tgt_len: usize,
    cells: &SampleCells,
    beta: &mut GridMut<A>,
) -> A {
    let neg_inf = A::neg_infinity();
    let t_last = src_len - 1;
    let u_last = tgt_len - 1;

    for t in 0..src_len {
        for u in 0..tgt_len {
            beta[[t, u]] = neg_inf;
        }
    }

    debug_assert!(cells.contains(t_last, u_last));
    beta[[t_last, u_last]] = pairs.skip(cells.index(t_last, u_last));

    for t in (0..t_last).rev() {
        if !(cells.contains(t, u_last) && cells.contains(t + 1, u_last)) {
            break;
        }
        beta[[t, u_last]] = beta[[t + 1, u_last]] + pairs.skip(cells.index(t, u_last));
    }

    for u in (0..u_last).rev() {
        if !(cells.contains(t_last, u) && cells.contains(t_last, u + 1)) {
            break;
        }
        beta[[t_last, u]] = beta[[t_last, u + 1]] + pairs.emit(cells.index(t_last, u));
    }

    for u in (0..u_last).rev() {
        let (t_start, t_end) = cells.range(u);
        for t in (t_start..=t_end).rev() {
            let mut skip = neg_inf;
            let mut emit = neg_inf;

            if t + 1 < src_len && cells.contains(t + 1, u) {
                skip = beta[[t + 1, u]] + pairs.skip(cells.index(t, u));
            }
            if cells.contains(t, u + 1) {
                emit = beta[[t, u + 1]] + pairs.emit(cells.index(t, u));
            }

            if skip != neg_inf || emit != neg_inf {
                beta[[t, u]] = lse(skip, emit);
            }
        }
    }

    beta[[0, 0]]
}

struct Task<'a, A> {
    pairs: PairView<'a, A>,
    src_len: usize,
    tgt_len: usize,
}

fn sample_task<'a, A: AccElement>(
    options: &Options,
    path: &LatticePath,
    log_probs: &'a [A],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    b: usize,
) -> Task<'a, A> {
    let lattice = options.lattice_cells();
    let pairs = match path {
        LatticePath::Sparse { .. } => PairView::new(log_probs),
        _ => PairView::new(&log_probs[2 * b * lattice..2 * (b + 1) * lattice]),
    };

    Task {
        pairs,
        src_len: src_lengths[b] as usize,
        tgt_len: tgt_lengths[b] as usize + 1,
    }
}

fn run_alpha<A: AccElement>(
    options: &Options,
    path: &LatticePath,
    task: &Task<'_, A>,
    b: usize,
    alpha: &mut GridMut<A>,
) -> A {
    match path {
        LatticePath::Dense => alpha_one_sequence(
            task.pairs,
            task.src_len,
            task.tgt_len,
            options.max_tgt_len,
            alpha,
        ),
        LatticePath::Restricted { wp_ends } => {
            let wp = &wp_ends[b * options.max_tgt_len..(b + 1) * options.max_tgt_len];
            let check = AlignmentRestrictionCheck::new(
                wp,
                task.src_len,
                task.tgt_len,
                options.l_buffer,
                options.r_buffer,
            );
            alpha_one_sequence_restricted(
                task.pairs,
                task.src_len,
                task.tgt_len,
                options.max_tgt_len,
                alpha,
                &check,
            )
        }
        LatticePath::Sparse { layout } => {
            let cells = layout.sample(b, task.tgt_len);
            alpha_one_sequence_sparse(task.pairs, task.src_len, task.tgt_len, &cells, alpha)
        }
    }
}

fn run_beta<A: AccElement>(
    options: &Options,
    path: &LatticePath,
    task: &Task<'_, A>,
    b: usize,
    beta: &mut GridMut<A>,
) -> A {
    match path {
        LatticePath::Dense => beta_one_sequence(
            task.pairs,
            task.src_len,
            task.tgt_len,
            options.max_tgt_len,
            beta,
        ),
        LatticePath::Restricted { wp_ends } => {
            let wp = &wp_ends[b * options.max_tgt_len..(b + 1) * options.max_tgt_len];
            let check = AlignmentRestrictionCheck::new(
                wp,
                task.src_len,
                task.tgt_len,
                options.l_buffer,
                options.r_buffer,
            );
            beta_one_sequence_restricted(
                task.pairs,
                task.src_len,
                task.tgt_len,
                options.max_tgt_len,
                beta,
                &check,
            )
        }
        LatticePath::Sparse { layout } => {
            let cells = layout.sample(b, task.tgt_len);
            beta_one_sequence_sparse(task.pairs, task.src_len, task.tgt_len, &cells, beta)
        }
    }
}

/// Run alpha and beta for the whole batch: `2 * B * H` tasks, odd task index
/// computes alpha, even computes beta, so both directions of one sample
/// proceed concurrently on their own buffers. `scores[2b]` receives the
/// backward score and `scores[2b + 1]` the forward score of sample `b`.
pub(crate) fn compute_alphas_betas<A: AccElement>(
    options: &Options,
    path: &LatticePath,
    log_probs: &[A],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    alphas: &mut [A],
    betas: &mut [A],
    scores: &mut [A],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let lattice = options.lattice_cells();
    debug_assert_eq!(scores.len(), 2 * batch);

    let shared_alphas = UnsafeSharedRef::new(alphas);
    let shared_betas = UnsafeSharedRef::new(betas);
    let shared_scores = UnsafeSharedRef::new(scores);

    run_par!(|| {
        iter_range_par!(0, 2 * batch).for_each(|index| unsafe {
            let b = index >> 1;
            let task = sample_task(options, path, log_probs, src_lengths, tgt_lengths, b);

            let score = if index & 1 == 1 {
                let alphas = shared_alphas.get();
                let mut alpha = GridMut::new(
                    &mut alphas[b * lattice..(b + 1) * lattice],
                    options.max_tgt_len,
                );
                run_alpha(options, path, &task, b, &mut alpha)
            } else {
                let betas = shared_betas.get();
                let mut beta = GridMut::new(
                    &mut betas[b * lattice..(b + 1) * lattice],
                    options.max_tgt_len,
                );
                run_beta(options, path, &task, b, &mut beta)
            };

            shared_scores.get()[index] = score;
        })
    });

    Ok(())
}

/// Forward half only, for the diagnostic entry point.
pub(crate) fn compute_alphas_only<A: AccElement>(
    options: &Options,
    path: &LatticePath,
    log_probs: &[A],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    alphas: &mut [A],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let lattice = options.lattice_cells();

    let shared_alphas = UnsafeSharedRef::new(alphas);

    run_par!(|| {
        iter_range_par!(0, batch).for_each(|b| unsafe {
            let task = sample_task(options, path, log_probs, src_lengths, tgt_lengths, b);
            let alphas = shared_alphas.get();
            let mut alpha = GridMut::new(
                &mut alphas[b * lattice..(b + 1) * lattice],
                options.max_tgt_len,
            );
            run_alpha(options, path, &task, b, &mut alpha);
        })
    });

    Ok(())
}

/// Backward half only; `scores[b]` receives `beta(0, 0)`.
pub(crate) fn compute_betas_only<A: AccElement>(
    options: &Options,
    path: &LatticePath,
    log_probs: &[A],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    betas: &mut [A],
    scores: &mut [A],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let lattice = options.lattice_cells();
    debug_assert_eq!(scores.len(), batch);

    let shared_betas = UnsafeSharedRef::new(betas);
    let shared_scores = UnsafeSharedRef::new(scores);

    run_par!(|| {
        iter_range_par!(0, batch).for_each(|b| unsafe {
            let task = sample_task(options, path, log_probs, src_lengths, tgt_lengths, b);
            let betas = shared_betas.get();
            let mut beta = GridMut::new(
                &mut betas[b * lattice..(b + 1) * lattice],
                options.max_tgt_len,
            );
            shared_scores.get()[b] = run_beta(options, path, &task, b, &mut beta);
        })
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use approx::assert_relative_eq;

    // Uniform zero logits over D=2 give skip = emit = -ln(2) per cell.
    fn uniform_pairs(cells: usize) -> alloc::vec::Vec<f32> {
        let mut data = vec![0.0f32; 2 * cells];
        for value in data.iter_mut() {
            *value = -(2.0f32.ln());
        }
        data
    }

    #[test]
    fn forward_equals_backward_on_uniform_lattice() {
        // T=2, U=2: two monotonic paths of three transitions each.
        let pairs_buf = uniform_pairs(4);
        let pairs = PairView::new(&pairs_buf[..]);

        let mut alpha_buf = vec![0.0f32; 4];
        let mut beta_buf = vec![0.0f32; 4];
        let mut alpha = GridMut::new(&mut alpha_buf[..], 2);
        let mut beta = GridMut::new(&mut beta_buf[..], 2);

        let forward = alpha_one_sequence(pairs, 2, 2, 2, &mut alpha);
        let backward = beta_one_sequence(pairs, 2, 2, 2, &mut beta);

        // Two paths of three transitions each: -log(2 * (1/2)^3) = 2 ln 2.
        assert_relative_eq!(forward, backward, max_relative = 1e-6);
        assert_relative_eq!(forward, -(2.0 * 2.0f32.ln()), max_relative = 1e-6);
    }

    #[test]
    fn unbounded_restriction_matches_dense() {
        let pairs_buf = uniform_pairs(12);
        let pairs = PairView::new(&pairs_buf[..]);

        let mut dense_buf = vec![0.0f32; 12];
        let mut dense = GridMut::new(&mut dense_buf[..], 3);
        let plain = alpha_one_sequence(pairs, 4, 3, 3, &mut dense);

        let wp_ends = [1, 2, 0];
        let check = AlignmentRestrictionCheck::new(&wp_ends, 4, 3, usize::MAX, usize::MAX);
        let mut restricted_buf = vec![0.0f32; 12];
        let mut restricted = GridMut::new(&mut restricted_buf[..], 3);
        let windowed = alpha_one_sequence_restricted(pairs, 4, 3, 3, &mut restricted, &check);

        assert_relative_eq!(plain, windowed, max_relative = 1e-6);
        for (a, b) in dense_buf.iter().zip(restricted_buf.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-6);
        }
    }

    #[test]
    fn tight_window_leaves_outside_cells_unreachable() {
        let pairs_buf = uniform_pairs(12);
        let pairs = PairView::new(&pairs_buf[..]);

        // Word pieces end at frames 0 and 2; zero-width buffers.
        let wp_ends = [0, 2, 0];
        let check = AlignmentRestrictionCheck::new(&wp_ends, 4, 3, 0, 0);
        let mut alpha_buf = vec![0.0f32; 12];
        let mut alpha = GridMut::new(&mut alpha_buf[..], 3);
        let forward = alpha_one_sequence_restricted(pairs, 4, 3, 3, &mut alpha, &check);

        assert!(forward.is_finite());
        // Row u=0 collapses to t=0: cells (1,0) and (2,0) stay unreachable.
        assert_eq!(alpha_buf[3], f32::NEG_INFINITY);
        assert_eq!(alpha_buf[6], f32::NEG_INFINITY);
        // (t=0, u=2) is ahead of the second word piece's window.
        assert_eq!(alpha_buf[2], f32::NEG_INFINITY);
    }

    #[test]
    fn sparse_full_coverage_matches_dense() {
        // T=3, U=2, every row covering [0, 2].
        let pairs_buf = uniform_pairs(6);
        let pairs = PairView::new(&pairs_buf[..]);

        let mut dense_buf = vec![0.0f32; 6];
        let mut dense = GridMut::new(&mut dense_buf[..], 2);
        let plain = alpha_one_sequence(pairs, 3, 2, 2, &mut dense);

        let ranges = [0, 2, 0, 2];
        let cells_per_sample = [6];
        let layout = SparseLayout::new(&ranges, &cells_per_sample, 2);
        let cells = layout.sample(0, 2);

        // Repack the uniform pairs in packed order: (t,u) -> u-major rows.
        let mut packed = vec![0.0f32; 12];
        for u in 0..2 {
            for t in 0..3 {
                let idx = cells.index(t, u);
                packed[2 * idx] = -(2.0f32.ln());
                packed[2 * idx + 1] = -(2.0f32.ln());
            }
        }
        let packed_pairs = PairView::new(&packed[..]);

        let mut sparse_buf = vec![0.0f32; 6];
        let mut sparse = GridMut::new(&mut sparse_buf[..], 2);
        let packed_score = alpha_one_sequence_sparse(packed_pairs, 3, 2, &cells, &mut sparse);

        assert_relative_eq!(plain, packed_score, max_relative = 1e-6);
    }
}
