use crate::element::{cast, AccElement, LogitElement};
use crate::error::ComputeError;
use crate::ops::{PairViewMut, RowView};
use crate::options::Options;
use crate::sharing::UnsafeSharedRef;
use crate::sparse::{SampleCells, SparseLayout};
use crate::{iter_range_par, run_par};

/// Project the normalized log-probabilities of one sample down to the two
/// transitions the recursions consume: `skip` (blank) and `emit` (next
/// label). `emit` exists only below the last row. With the fused form
/// disabled the logits are already normalized and the denominator drops.
fn log_probs_one_sequence<L: LogitElement, A: AccElement>(
    blank: usize,
    fused: bool,
    logits: RowView<L>,
    targets: &[i32],
    src_len: usize,
    tgt_len: usize,
    max_tgt_len: usize,
    denominators: &[A],
    pairs: &mut PairViewMut<A>,
) {
    for t in 0..src_len {
        for u in 0..tgt_len {
            let cell = t * max_tgt_len + u;
            let denominator = if fused { denominators[cell] } else { A::zero() };
            let row = logits.row(cell);

            if u < tgt_len - 1 {
                let emit: A = cast(row[targets[u] as usize]);
                pairs.set_emit(cell, emit - denominator);
            }
            let skip: A = cast(row[blank]);
            pairs.set_skip(cell, skip - denominator);
        }
    }
}

/// Packed-cell variant: every touched cell goes through the sparse address.
fn log_probs_one_sequence_sparse<L: LogitElement, A: AccElement>(
    blank: usize,
    fused: bool,
    logits: RowView<L>,
    targets: &[i32],
    tgt_len: usize,
    cells: &SampleCells,
    denominators: &[A],
    pairs: &mut PairViewMut<A>,
) {
    for u in 0..tgt_len {
        let (t_start, t_end) = cells.range(u);
        for t in t_start..=t_end {
            let cell = cells.index(t, u);
            let denominator = if fused { denominators[cell] } else { A::zero() };
            let row = logits.row(cell);

            if u < tgt_len - 1 {
                let emit: A = cast(row[targets[u] as usize]);
                pairs.set_emit(cell, emit - denominator);
            }
            let skip: A = cast(row[blank]);
            pairs.set_skip(cell, skip - denominator);
        }
    }
}

pub(crate) fn compute_log_probs<L: LogitElement, A: AccElement>(
    options: &Options,
    logits: &[L],
    targets: &[i32],
    src_lengths: &[i32],
    tgt_lengths: &[i32],
    denominators: &[A],
    log_probs: &mut [A],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let lattice = options.lattice_cells();
    let dim = options.num_targets;
    let max_u = options.max_tgt_len;

    let shared_pairs = UnsafeSharedRef::new(log_probs);

    run_par!(|| {
        iter_range_par!(0, batch).for_each(|b| unsafe {
            let pairs = shared_pairs.get();
            let mut pairs = PairViewMut::new(&mut pairs[2 * b * lattice..2 * (b + 1) * lattice]);

            log_probs_one_sequence(
                options.blank,
                options.fused_log_softmax,
                RowView::new(&logits[b * lattice * dim..(b + 1) * lattice * dim], dim),
                &targets[b * (max_u - 1)..(b + 1) * (max_u - 1)],
                src_lengths[b] as usize,
                tgt_lengths[b] as usize + 1,
                max_u,
                &denominators[b * lattice..(b + 1) * lattice],
                &mut pairs,
            );
        })
    });

    Ok(())
}

pub(crate) fn compute_log_probs_sparse<L: LogitElement, A: AccElement>(
    options: &Options,
    layout: &SparseLayout,
    logits: &[L],
    targets: &[i32],
    tgt_lengths: &[i32],
    denominators: &[A],
    log_probs: &mut [A],
) -> Result<(), ComputeError> {
    let batch = options.effective_batch_size();
    let dim = options.num_targets;
    let max_u = options.max_tgt_len;

    let shared_pairs = UnsafeSharedRef::new(log_probs);

    run_par!(|| {
        iter_range_par!(0, batch).for_each(|b| unsafe {
            let mut pairs = PairViewMut::new(shared_pairs.get());
            let cells = layout.sample(b, tgt_lengths[b] as usize + 1);

            log_probs_one_sequence_sparse(
                options.blank,
                options.fused_log_softmax,
                RowView::new(logits, dim),
                &targets[b * (max_u - 1)..(b + 1) * (max_u - 1)],
                tgt_lengths[b] as usize + 1,
                &cells,
                denominators,
                &mut pairs,
            );
        })
    });

    Ok(())
}
