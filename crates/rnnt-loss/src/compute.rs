use alloc::vec;

use crate::element::{AccElement, LogitElement};
use crate::error::ComputeError;
use crate::ops::alpha_beta::{
    compute_alphas_betas, compute_alphas_only, compute_betas_only, LatticePath,
};
use crate::ops::denominator::log_sum_exp_2d;
use crate::ops::gradient::{compute_gradients, GradientStorage};
use crate::ops::log_probs::{compute_log_probs, compute_log_probs_sparse};
use crate::options::Options;
use crate::restriction::AlignmentRestrictionCheck;
use crate::sparse::SparseLayout;
use crate::workspace::Workspace;

/// Storage selector threaded through the pipeline so the dense and sparse
/// paths share one stage sequence instead of drifting apart in four near
/// copies.
enum Storage<'a> {
    Dense,
    Sparse(&'a SparseLayout<'a>),
}

fn debug_validate<L: LogitElement>(
    options: &Options,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
) {
    let batch = options.effective_batch_size();
    debug_assert!(options.num_targets >= 1);
    debug_assert!(options.blank < options.num_targets);
    debug_assert_eq!(logits.len(), options.logit_cells() * options.num_targets);
    debug_assert_eq!(targets.len(), batch * (options.max_tgt_len - 1));
    debug_assert_eq!(src_lengths.len(), batch);
    debug_assert_eq!(tgt_lengths.len(), batch);
    for b in 0..batch {
        debug_assert!(src_lengths[b] >= 1);
        debug_assert!((src_lengths[b] as usize) <= options.max_src_len);
        debug_assert!((tgt_lengths[b] as usize) < options.max_tgt_len);
        for &label in &targets[b * (options.max_tgt_len - 1)..][..tgt_lengths[b] as usize] {
            debug_assert!((label as usize) < options.num_targets);
        }
    }
}

/// Every packed range must sit inside the alignment window it claims to
/// materialize; checked in debug builds when both descriptions are supplied.
fn ranges_respect_windows(
    options: &Options,
    layout: &SparseLayout,
    wp_ends: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
) -> bool {
    let batch = options.effective_batch_size();
    for b in 0..batch {
        let src_len = src_lengths[b] as usize;
        let tgt_len = tgt_lengths[b] as usize + 1;
        let check = AlignmentRestrictionCheck::new(
            &wp_ends[b * options.max_tgt_len..(b + 1) * options.max_tgt_len],
            src_len,
            tgt_len,
            options.l_buffer,
            options.r_buffer,
        );
        for u in 0..tgt_len {
            let (packed_start, packed_end) = layout.range(b, u);
            let (window_start, window_end) = check.valid_time_range(u);
            if packed_start < window_start || packed_end > window_end {
                return false;
            }
        }
    }
    true
}

/// Stages 1 and 2: denominators, then log-prob pairs, into the workspace.
fn prepare_log_probs<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    storage: &Storage,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    workspace.reset_counters();
    let regions = workspace.regions();

    log_sum_exp_2d(
        options.logit_cells(),
        options.num_targets,
        logits,
        regions.denominators,
    )?;

    match storage {
        Storage::Dense => compute_log_probs(
            &options,
            logits,
            targets,
            src_lengths,
            tgt_lengths,
            regions.denominators,
            regions.log_probs,
        )?,
        Storage::Sparse(layout) => compute_log_probs_sparse(
            &options,
            layout,
            logits,
            targets,
            tgt_lengths,
            regions.denominators,
            regions.log_probs,
        )?,
    }

    Ok(())
}

fn lattice_path<'a>(storage: &Storage<'a>, wp_ends: Option<&'a [i32]>) -> LatticePath<'a> {
    match (storage, wp_ends) {
        (Storage::Sparse(layout), _) => LatticePath::Sparse { layout: *layout },
        (Storage::Dense, Some(wp_ends)) => LatticePath::Restricted { wp_ends },
        (Storage::Dense, None) => LatticePath::Dense,
    }
}

/// Stages 1-3. `scores[2b]` ends up holding the backward score of sample
/// `b`, `scores[2b + 1]` the forward score.
fn scores_pipeline<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    storage: &Storage,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    wp_ends: Option<&[i32]>,
    scores: &mut [A],
) -> Result<(), ComputeError> {
    prepare_log_probs(workspace, storage, logits, targets, src_lengths, tgt_lengths)?;

    let options = *workspace.options();
    let regions = workspace.regions();
    let path = lattice_path(storage, wp_ends);

    compute_alphas_betas(
        &options,
        &path,
        regions.log_probs,
        src_lengths,
        tgt_lengths,
        regions.alphas,
        regions.betas,
        scores,
    )
}

fn write_costs<L: LogitElement, A: AccElement>(costs: &mut [L], scores: &[A]) {
    for (b, cost) in costs.iter_mut().enumerate() {
        *cost = L::from_f64((-scores[2 * b]).to_f64());
    }
}

/// Dense transducer loss: per-sample costs and, when a gradient buffer is
/// supplied, `dL/dlogits` into it. Passing `wp_ends` (`[B*H, maxU]` word
/// piece end frames) restricts the lattice to the configured alignment
/// window. Without a gradient buffer only the scoring stages run.
#[allow(clippy::too_many_arguments)]
pub fn compute<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    costs: &mut [L],
    gradients: Option<&mut [L]>,
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, logits, targets, src_lengths, tgt_lengths);

    let mut scores = vec![A::zero(); 2 * options.effective_batch_size()];
    scores_pipeline(
        workspace,
        &Storage::Dense,
        logits,
        targets,
        src_lengths,
        tgt_lengths,
        wp_ends,
        &mut scores,
    )?;
    write_costs(costs, &scores);

    if let Some(gradients) = gradients {
        compute_gradients(
            &options,
            &GradientStorage::Dense,
            Some(logits),
            targets,
            src_lengths,
            tgt_lengths,
            workspace.denominators(),
            workspace.alphas(),
            workspace.betas(),
            gradients,
        )?;
    }

    Ok(())
}

/// Dense loss with the gradient written over the logit buffer. Padding cells
/// of the buffer are zeroed, since they still hold stale logits afterwards.
pub fn compute_in_place<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits_to_gradients: &mut [L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    costs: &mut [L],
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, &*logits_to_gradients, targets, src_lengths, tgt_lengths);

    let mut scores = vec![A::zero(); 2 * options.effective_batch_size()];
    scores_pipeline(
        workspace,
        &Storage::Dense,
        &*logits_to_gradients,
        targets,
        src_lengths,
        tgt_lengths,
        wp_ends,
        &mut scores,
    )?;
    write_costs(costs, &scores);

    compute_gradients::<L, A>(
        &options,
        &GradientStorage::Dense,
        None,
        targets,
        src_lengths,
        tgt_lengths,
        workspace.denominators(),
        workspace.alphas(),
        workspace.betas(),
        logits_to_gradients,
    )
}

/// Sparse transducer loss over packed cells. `logits` (and the gradient
/// buffer) are `[sparse_cells, D]`; `valid_ranges` is `[B*H, maxU, 2]` and
/// `cells_per_sample` is `[B*H]`. When `wp_ends` is supplied the packed
/// ranges are checked against the alignment windows in debug builds; the
/// traversal itself is driven by the ranges, which the caller guarantees to
/// cover exactly the reachable cells.
#[allow(clippy::too_many_arguments)]
pub fn compute_sparse<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    valid_ranges: &[i32],
    cells_per_sample: &[i32],
    costs: &mut [L],
    gradients: Option<&mut [L]>,
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, logits, targets, src_lengths, tgt_lengths);

    let layout = SparseLayout::new(valid_ranges, cells_per_sample, options.max_tgt_len);
    debug_assert_eq!(layout.total_cells(), options.sparse_cells);
    debug_assert!(wp_ends.map_or(true, |wp_ends| ranges_respect_windows(
        &options,
        &layout,
        wp_ends,
        src_lengths,
        tgt_lengths
    )));

    let mut scores = vec![A::zero(); 2 * options.effective_batch_size()];
    scores_pipeline(
        workspace,
        &Storage::Sparse(&layout),
        logits,
        targets,
        src_lengths,
        tgt_lengths,
        wp_ends,
        &mut scores,
    )?;
    write_costs(costs, &scores);

    if let Some(gradients) = gradients {
        compute_gradients(
            &options,
            &GradientStorage::Sparse { layout: &layout },
            Some(logits),
            targets,
            src_lengths,
            tgt_lengths,
            workspace.denominators(),
            workspace.alphas(),
            workspace.betas(),
            gradients,
        )?;
    }

    Ok(())
}

/// Sparse loss with the gradient written over the packed logit buffer. The
/// packed layout holds no padding cells, so nothing needs zeroing.
#[allow(clippy::too_many_arguments)]
pub fn compute_sparse_in_place<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits_to_gradients: &mut [L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    valid_ranges: &[i32],
    cells_per_sample: &[i32],
    costs: &mut [L],
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, &*logits_to_gradients, targets, src_lengths, tgt_lengths);

    let layout = SparseLayout::new(valid_ranges, cells_per_sample, options.max_tgt_len);
    debug_assert_eq!(layout.total_cells(), options.sparse_cells);
    debug_assert!(wp_ends.map_or(true, |wp_ends| ranges_respect_windows(
        &options,
        &layout,
        wp_ends,
        src_lengths,
        tgt_lengths
    )));

    let mut scores = vec![A::zero(); 2 * options.effective_batch_size()];
    scores_pipeline(
        workspace,
        &Storage::Sparse(&layout),
        &*logits_to_gradients,
        targets,
        src_lengths,
        tgt_lengths,
        wp_ends,
        &mut scores,
    )?;
    write_costs(costs, &scores);

    compute_gradients::<L, A>(
        &options,
        &GradientStorage::Sparse { layout: &layout },
        None,
        targets,
        src_lengths,
        tgt_lengths,
        workspace.denominators(),
        workspace.alphas(),
        workspace.betas(),
        logits_to_gradients,
    )
}

/// Forward half only: fills `alphas` (`[B*H, maxT, maxU]` accumulators) and
/// leaves costs and gradients alone.
pub fn compute_alphas<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    alphas: &mut [A],
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, logits, targets, src_lengths, tgt_lengths);

    let storage = Storage::Dense;
    prepare_log_probs(workspace, &storage, logits, targets, src_lengths, tgt_lengths)?;

    let path = lattice_path(&storage, wp_ends);
    compute_alphas_only(
        &options,
        &path,
        workspace.log_probs(),
        src_lengths,
        tgt_lengths,
        alphas,
    )
}

/// Backward half only: fills `betas` and writes the per-sample costs
/// `-beta(0, 0)` in the accumulator type.
#[allow(clippy::too_many_arguments)]
pub fn compute_betas<L: LogitElement, A: AccElement>(
    workspace: &mut Workspace<A>,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    costs: &mut [A],
    betas: &mut [A],
    wp_ends: Option<&[i32]>,
) -> Result<(), ComputeError> {
    let options = *workspace.options();
    debug_validate(&options, logits, targets, src_lengths, tgt_lengths);

    let storage = Storage::Dense;
    prepare_log_probs(workspace, &storage, logits, targets, src_lengths, tgt_lengths)?;

    let path = lattice_path(&storage, wp_ends);
    let mut scores = vec![A::zero(); options.effective_batch_size()];
    compute_betas_only(
        &options,
        &path,
        workspace.log_probs(),
        src_lengths,
        tgt_lengths,
        betas,
        &mut scores,
    )?;

    for (cost, score) in costs.iter_mut().zip(scores.iter()) {
        *cost = -*score;
    }

    Ok(())
}
