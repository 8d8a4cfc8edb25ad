/// Immutable per-call configuration.
///
/// All configuration travels here; the engine keeps no global state. The
/// effective batch is `batch_size * n_hypos`: every hypothesis carries its
/// own target row, target length and lattice.
#[derive(new, Clone, Copy, Debug, PartialEq)]
pub struct Options {
    /// Number of samples in the batch.
    pub batch_size: usize,
    /// Hypotheses per sample.
    pub n_hypos: usize,
    /// Padded source length `maxT`.
    pub max_src_len: usize,
    /// Padded target length `maxU`, including the prepended blank position.
    pub max_tgt_len: usize,
    /// Vocabulary size `D`.
    pub num_targets: usize,
    /// Blank symbol index, in `[0, num_targets)`.
    pub blank: usize,
    /// Elementwise gradient clamp; `0.0` disables.
    pub clamp: f32,
    /// Alignment-restriction half-width towards earlier frames.
    pub l_buffer: usize,
    /// Alignment-restriction half-width towards later frames.
    pub r_buffer: usize,
    /// Whether the gradient uses the fused log-softmax form. When false the
    /// denominator is treated as zero throughout: the caller has already
    /// normalized the logits.
    pub fused_log_softmax: bool,
    /// Total packed-cell count in sparse mode; `0` selects dense storage.
    pub sparse_cells: usize,
}

impl Options {
    /// Dense, unrestricted, fused configuration with a single hypothesis.
    pub fn dense(
        batch_size: usize,
        max_src_len: usize,
        max_tgt_len: usize,
        num_targets: usize,
        blank: usize,
    ) -> Self {
        Self {
            batch_size,
            n_hypos: 1,
            max_src_len,
            max_tgt_len,
            num_targets,
            blank,
            clamp: 0.0,
            l_buffer: 0,
            r_buffer: 0,
            fused_log_softmax: true,
            sparse_cells: 0,
        }
    }

    /// Switch to sparse storage with `sparse_cells` packed cells.
    pub fn with_sparse_cells(mut self, sparse_cells: usize) -> Self {
        self.sparse_cells = sparse_cells;
        self
    }

    /// Set the gradient clamp.
    pub fn with_clamp(mut self, clamp: f32) -> Self {
        self.clamp = clamp;
        self
    }

    /// Set the alignment-restriction half-widths.
    pub fn with_buffers(mut self, l_buffer: usize, r_buffer: usize) -> Self {
        self.l_buffer = l_buffer;
        self.r_buffer = r_buffer;
        self
    }

    /// Disable or enable the fused log-softmax gradient form.
    pub fn with_fused_log_softmax(mut self, fused: bool) -> Self {
        self.fused_log_softmax = fused;
        self
    }

    /// `batch_size * n_hypos`.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size * self.n_hypos
    }

    /// Lattice cells of one sample, `maxT * maxU`.
    pub fn lattice_cells(&self) -> usize {
        self.max_src_len * self.max_tgt_len
    }

    /// Cells carrying a logit row: the packed count in sparse mode, the full
    /// padded lattice otherwise.
    pub fn logit_cells(&self) -> usize {
        if self.sparse_cells > 0 {
            self.sparse_cells
        } else {
            self.effective_batch_size() * self.lattice_cells()
        }
    }
}
