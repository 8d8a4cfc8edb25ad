use core::cell::UnsafeCell;

/// Stand-in for `SyncUnsafeCell`, which is not stable yet.
///
/// Lets the per-sample tasks of a parallel stage write into one output
/// buffer. Soundness rests on the scheduler handing every task a disjoint
/// region.
pub(crate) struct UnsafeSharedRef<'a, T: ?Sized> {
    cell: UnsafeCell<&'a mut T>,
}

unsafe impl<T: ?Sized> Sync for UnsafeSharedRef<'_, T> {}

impl<'a, T: ?Sized> UnsafeSharedRef<'a, T> {
    pub fn new(data: &'a mut T) -> Self {
        Self {
            cell: UnsafeCell::new(data),
        }
    }

    /// # Safety
    ///
    /// No two concurrent callers may touch the same elements.
    pub unsafe fn get(&self) -> &'a mut T {
        core::ptr::read(self.cell.get())
    }
}
