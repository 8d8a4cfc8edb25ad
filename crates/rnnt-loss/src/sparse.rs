use alloc::vec::Vec;

/// Packed-cell addressing for sparse lattice storage.
///
/// `valid_ranges` is `[B*H, maxU, 2]` of inclusive `(t_start, t_end)` frame
/// ranges and `cells_per_sample` is `[B*H]`. Sample `b`'s reachable cells are
/// packed row-major by `u`, then `t` within the row's range, immediately
/// after the cells of samples `0..b`. The address of a cell is therefore
///
/// `base[b] + sum of earlier row widths + (t - t_start(b, u))`
///
/// and is defined only for in-range cells; logits, denominators, log-prob
/// pairs and gradients are all indexed this way in sparse mode.
#[derive(Clone, Debug)]
pub struct SparseLayout<'a> {
    valid_ranges: &'a [i32],
    max_tgt_len: usize,
    bases: Vec<usize>,
    total: usize,
}

impl<'a> SparseLayout<'a> {
    /// Build the layout, accumulating per-sample base offsets.
    pub fn new(valid_ranges: &'a [i32], cells_per_sample: &[i32], max_tgt_len: usize) -> Self {
        let mut bases = Vec::with_capacity(cells_per_sample.len());
        let mut base = 0usize;
        for &cells in cells_per_sample {
            bases.push(base);
            base += cells as usize;
        }

        Self {
            valid_ranges,
            max_tgt_len,
            bases,
            total: base,
        }
    }

    /// Total packed cells.
    pub fn total_cells(&self) -> usize {
        self.total
    }

    /// Inclusive `(t_start, t_end)` range of row `u` in sample `b`.
    pub fn range(&self, b: usize, u: usize) -> (usize, usize) {
        let at = 2 * (b * self.max_tgt_len + u);
        (
            self.valid_ranges[at] as usize,
            self.valid_ranges[at + 1] as usize,
        )
    }

    /// Addressing for one sample: the base plus cumulative row widths over
    /// `tgt_len` rows.
    pub fn sample(&self, b: usize, tgt_len: usize) -> SampleCells {
        let mut row_offsets = Vec::with_capacity(tgt_len + 1);
        let mut offset = self.bases[b];
        let mut ranges = Vec::with_capacity(tgt_len);
        for u in 0..tgt_len {
            let (start, end) = self.range(b, u);
            row_offsets.push(offset);
            ranges.push((start, end));
            offset += end - start + 1;
        }
        row_offsets.push(offset);

        SampleCells {
            row_offsets,
            ranges,
        }
    }

}

/// Resolved addressing for one sample of a [`SparseLayout`].
#[derive(Clone, Debug)]
pub struct SampleCells {
    row_offsets: Vec<usize>,
    ranges: Vec<(usize, usize)>,
}

impl SampleCells {
    /// Inclusive valid time range of row `u`.
    pub fn range(&self, u: usize) -> (usize, usize) {
        self.ranges[u]
    }

    /// Whether `(t, u)` is materialized.
    pub fn contains(&self, t: usize, u: usize) -> bool {
        let (start, end) = self.ranges[u];
        start <= t && t <= end
    }

    /// Packed index of `(t, u)`. Out-of-range cells are a caller bug.
    pub fn index(&self, t: usize, u: usize) -> usize {
        let (start, end) = self.ranges[u];
        debug_assert!(
            start <= t && t <= end,
            "cell (t={t}, u={u}) outside packed range [{start}, {end}]"
        );
        self.row_offsets[u] + (t - start)
    }

    /// Packed cells of this sample.
    pub fn cells(&self) -> usize {
        self.row_offsets[self.row_offsets.len() - 1] - self.row_offsets[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_rows_back_to_back() {
        // Sample 0: rows [0,1], [1,2]; sample 1: rows [0,0], [0,1].
        let ranges = [0, 1, 1, 2, 0, 0, 0, 1];
        let cells = [4, 3];
        let layout = SparseLayout::new(&ranges, &cells, 2);

        let s0 = layout.sample(0, 2);
        assert_eq!(s0.index(0, 0), 0);
        assert_eq!(s0.index(1, 0), 1);
        assert_eq!(s0.index(1, 1), 2);
        assert_eq!(s0.index(2, 1), 3);
        assert_eq!(s0.cells(), 4);

        let s1 = layout.sample(1, 2);
        assert_eq!(s1.index(0, 0), 4);
        assert_eq!(s1.index(0, 1), 5);
        assert_eq!(s1.index(1, 1), 6);
        assert_eq!(s1.cells(), 3);
    }

    #[test]
    fn membership_follows_ranges() {
        let ranges = [0, 1, 1, 2];
        let cells = [4];
        let layout = SparseLayout::new(&ranges, &cells, 2);
        let s = layout.sample(0, 2);

        assert!(s.contains(0, 0));
        assert!(!s.contains(2, 0));
        assert!(!s.contains(0, 1));
        assert!(s.contains(2, 1));
    }
}
