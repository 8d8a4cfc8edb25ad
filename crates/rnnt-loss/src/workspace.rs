use alloc::vec;
use alloc::vec::Vec;

use crate::element::AccElement;
use crate::options::Options;

/// Element offsets of the workspace regions, a pure function of [`Options`].
///
/// The accumulator buffer is carved into four non-overlapping regions in this
/// order: denominators, log-prob pairs, alphas, betas. In sparse mode the
/// first two are sized by the packed-cell count while alphas and betas keep
/// the full padded lattice. The counter buffer holds one `i32` per `(b, u)`
/// for each recursion direction; an accelerator backend spins on these to
/// order its tiles, the CPU path only zeroes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkspaceOffsets {
    /// Start of the denominator region.
    pub denominators: usize,
    /// Start of the log-prob pair region (two accumulators per cell, `skip`
    /// at +0 and `emit` at +1).
    pub log_probs: usize,
    /// Start of the alpha region.
    pub alphas: usize,
    /// Start of the beta region.
    pub betas: usize,
    /// Total accumulator elements.
    pub total: usize,
    /// Start of the alpha counter region.
    pub alpha_counters: usize,
    /// Start of the beta counter region.
    pub beta_counters: usize,
    /// Total counter elements.
    pub total_counters: usize,
}

impl WorkspaceOffsets {
    /// Compute the carving for `options`.
    pub fn compute(options: &Options) -> Self {
        let lattice = options.effective_batch_size() * options.lattice_cells();
        let cells = options.logit_cells();

        let denominators = 0;
        let log_probs = denominators + cells;
        let alphas = log_probs + 2 * cells;
        let betas = alphas + lattice;
        let total = betas + lattice;

        let counters = options.effective_batch_size() * options.max_tgt_len;
        let alpha_counters = 0;
        let beta_counters = alpha_counters + counters;
        let total_counters = beta_counters + counters;

        Self {
            denominators,
            log_probs,
            alphas,
            betas,
            total,
            alpha_counters,
            beta_counters,
            total_counters,
        }
    }
}

/// Mutable view over the carved regions, handed to the pipeline stages.
pub(crate) struct Regions<'a, A> {
    pub denominators: &'a mut [A],
    pub log_probs: &'a mut [A],
    pub alphas: &'a mut [A],
    pub betas: &'a mut [A],
}

/// Per-call scratch memory shared by the pipeline stages.
///
/// Regions are written by exactly one stage and read-only afterwards; nothing
/// survives between calls, so a workspace may be reused for any call with the
/// same [`Options`].
pub struct Workspace<A> {
    options: Options,
    offsets: WorkspaceOffsets,
    data: Vec<A>,
    counters: Vec<i32>,
}

impl<A: AccElement> Workspace<A> {
    /// Allocate a zero-filled workspace for `options`.
    pub fn new(options: Options) -> Self {
        let offsets = WorkspaceOffsets::compute(&options);
        Self {
            options,
            offsets,
            data: vec![A::zero(); offsets.total],
            counters: vec![0; offsets.total_counters],
        }
    }

    /// The shared configuration.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The region carving.
    pub fn offsets(&self) -> &WorkspaceOffsets {
        &self.offsets
    }

    /// Denominator region, `logit_cells` elements.
    pub fn denominators(&self) -> &[A] {
        &self.data[self.offsets.denominators..self.offsets.log_probs]
    }

    /// Log-prob pair region, `2 * logit_cells` elements with stride 2.
    pub fn log_probs(&self) -> &[A] {
        &self.data[self.offsets.log_probs..self.offsets.alphas]
    }

    /// Alpha region, one full padded lattice per sample.
    pub fn alphas(&self) -> &[A] {
        &self.data[self.offsets.alphas..self.offsets.betas]
    }

    /// Beta region, one full padded lattice per sample.
    pub fn betas(&self) -> &[A] {
        &self.data[self.offsets.betas..self.offsets.total]
    }

    /// Alpha tile counters, one per `(b, u)`.
    pub fn alpha_counters(&self) -> &[i32] {
        &self.counters[self.offsets.alpha_counters..self.offsets.beta_counters]
    }

    /// Beta tile counters, one per `(b, u)`.
    pub fn beta_counters(&self) -> &[i32] {
        &self.counters[self.offsets.beta_counters..self.offsets.total_counters]
    }

    /// Zero both counter regions. Called once per dispatch.
    pub(crate) fn reset_counters(&mut self) {
        self.counters.fill(0);
    }

    /// Split the accumulator buffer into its four regions.
    pub(crate) fn regions(&mut self) -> Regions<'_, A> {
        let (denominators, rest) = self.data[self.offsets.denominators..]
            .split_at_mut(self.offsets.log_probs - self.offsets.denominators);
        let (log_probs, rest) = rest.split_at_mut(self.offsets.alphas - self.offsets.log_probs);
        let (alphas, betas) = rest.split_at_mut(self.offsets.betas - self.offsets.alphas);

        Regions {
            denominators,
            log_probs,
            alphas,
            betas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_offsets_tile_without_overlap() {
        let options = Options::dense(3, 7, 5, 11, 0);
        let offsets = WorkspaceOffsets::compute(&options);

        let cells = 3 * 7 * 5;
        assert_eq!(offsets.denominators, 0);
        assert_eq!(offsets.log_probs, cells);
        assert_eq!(offsets.alphas, 3 * cells);
        assert_eq!(offsets.betas, 4 * cells);
        assert_eq!(offsets.total, 5 * cells);
        assert_eq!(offsets.total_counters, 2 * 3 * 5);
    }

    #[test]
    fn sparse_offsets_shrink_logit_regions_only() {
        let options = Options::dense(2, 6, 4, 9, 0).with_sparse_cells(17);
        let offsets = WorkspaceOffsets::compute(&options);

        let lattice = 2 * 6 * 4;
        assert_eq!(offsets.log_probs, 17);
        assert_eq!(offsets.alphas, 17 + 2 * 17);
        assert_eq!(offsets.betas, offsets.alphas + lattice);
        assert_eq!(offsets.total, offsets.betas + lattice);
    }

    #[test]
    fn regions_match_offsets() {
        let options = Options::dense(1, 2, 2, 3, 0);
        let mut workspace = Workspace::<f32>::new(options);
        let regions = workspace.regions();

        assert_eq!(regions.denominators.len(), 4);
        assert_eq!(regions.log_probs.len(), 8);
        assert_eq!(regions.alphas.len(), 4);
        assert_eq!(regions.betas.len(), 4);
    }
}
