/// Per-sample alignment restriction window.
///
/// `wp_ends[u]` is the frame at which the `(u + 1)`-th word piece of the
/// reference ends. Lattice row `u` ("`u` labels emitted so far") is reachable
/// only inside a time window derived from the end frames of the label just
/// emitted and the label to emit next, widened by the two buffers:
///
/// - `start(u)` is `0` for the first row, else `wp_ends[u - 1] - l_buffer`
///   clamped to `0`;
/// - `end(u)` is `T - 1` for the last row, else `wp_ends[u] + r_buffer`
///   clamped to `T - 1`.
///
/// A transition is admitted only when both of its endpoint cells are inside
/// their windows, so alpha and beta prune identical regions. Unbounded
/// buffers reproduce the unrestricted lattice.
#[derive(new, Clone, Copy, Debug)]
pub struct AlignmentRestrictionCheck<'a> {
    wp_ends: &'a [i32],
    src_len: usize,
    tgt_len: usize,
    l_buffer: usize,
    r_buffer: usize,
}

impl AlignmentRestrictionCheck<'_> {
    /// Inclusive valid time range of lattice row `u`.
    pub fn valid_time_range(&self, u: usize) -> (usize, usize) {
        let start = if u == 0 {
            0
        } else {
            (self.wp_ends[u - 1] as usize).saturating_sub(self.l_buffer)
        };
        let end = if u == self.tgt_len - 1 {
            self.src_len - 1
        } else {
            (self.wp_ends[u] as usize)
                .saturating_add(self.r_buffer)
                .min(self.src_len - 1)
        };
        (start, end)
    }

    fn in_range(&self, t: usize, u: usize) -> bool {
        let (start, end) = self.valid_time_range(u);
        start <= t && t <= end
    }

    /// Whether alpha may take the blank transition `(t-1, u) -> (t, u)`.
    pub fn alpha_blank_transition(&self, t: usize, u: usize) -> bool {
        t >= 1 && self.in_range(t, u) && self.in_range(t - 1, u)
    }

    /// Whether alpha may take the emit transition `(t, u-1) -> (t, u)`.
    pub fn alpha_emit_transition(&self, t: usize, u: usize) -> bool {
        u >= 1 && self.in_range(t, u) && self.in_range(t, u - 1)
    }

    /// Whether beta may take the blank transition `(t, u) -> (t+1, u)`.
    pub fn beta_blank_transition(&self, t: usize, u: usize) -> bool {
        t + 1 < self.src_len && self.in_range(t, u) && self.in_range(t + 1, u)
    }

    /// Whether beta may take the emit transition `(t, u) -> (t, u+1)`.
    pub fn beta_emit_transition(&self, t: usize, u: usize) -> bool {
        u + 1 < self.tgt_len && self.in_range(t, u) && self.in_range(t, u + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // T=4, U=3 lattice with word pieces ending at frames 0 and 2.
    fn tight() -> AlignmentRestrictionCheck<'static> {
        AlignmentRestrictionCheck::new(&[0, 2], 4, 3, 0, 0)
    }

    #[test]
    fn tight_windows() {
        let check = tight();
        assert_eq!(check.valid_time_range(0), (0, 0));
        assert_eq!(check.valid_time_range(1), (0, 2));
        assert_eq!(check.valid_time_range(2), (2, 3));
    }

    #[test]
    fn transitions_need_both_endpoints() {
        let check = tight();
        // Row 0 collapses to t = 0, so no blank transition along it.
        assert!(!check.alpha_blank_transition(1, 0));
        // Emitting the first label is only possible at t = 0.
        assert!(check.alpha_emit_transition(0, 1));
        assert!(!check.alpha_emit_transition(1, 1));
        // Second label window: emit at t = 2, then skip to t = 3.
        assert!(check.alpha_emit_transition(2, 2));
        assert!(check.alpha_blank_transition(3, 2));
        assert!(!check.alpha_blank_transition(2, 2));
    }

    #[test]
    fn beta_mirrors_alpha() {
        let check = tight();
        assert!(check.beta_blank_transition(2, 2));
        assert!(check.beta_emit_transition(2, 1));
        // t = 3 is outside row 1, so no emit from there.
        assert!(!check.beta_emit_transition(3, 1));
        // Row 0 has no time to skip through.
        assert!(!check.beta_blank_transition(0, 0));
        assert!(check.beta_emit_transition(0, 0));
    }

    #[test]
    fn unbounded_buffers_cover_the_lattice() {
        let check = AlignmentRestrictionCheck::new(&[0, 2], 4, 3, usize::MAX, usize::MAX);
        for u in 0..3 {
            assert_eq!(check.valid_time_range(u), (0, 3));
        }
    }
}
