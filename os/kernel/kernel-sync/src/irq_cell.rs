use crate::IrqGuard;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// A value only reachable with interrupts disabled.
///
/// There is exactly one CPU, so masking interrupts is enough for exclusion.
/// The `borrowed` flag catches re-entry: taking the cell again while a
/// guard is alive (say from a trap handler that ran with interrupts still
/// enabled) panics instead of aliasing.
pub struct IrqCell<T> {
    /// * `false`: free
    /// * `true`: a guard is alive
    borrowed: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: exclusion via interrupt masking plus the borrow flag.
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Disable interrupts and borrow the value, or `None` if it is already
    /// borrowed.
    #[inline]
    pub fn try_lock(&self) -> Option<IrqCellGuard<'_, T>> {
        let irq = IrqGuard::new();
        if self
            .borrowed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqCellGuard { cell: self, _irq: irq })
        } else {
            None
        }
    }

    /// Disable interrupts and borrow the value.
    ///
    /// # Panics
    /// If the value is already borrowed.
    #[inline]
    pub fn lock(&self) -> IrqCellGuard<'_, T> {
        match self.try_lock() {
            Some(guard) => guard,
            None => panic!("IrqCell re-entered while borrowed"),
        }
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Exclusive access to an [`IrqCell`]'s value; interrupts stay disabled
/// until it is dropped.
pub struct IrqCellGuard<'a, T> {
    cell: &'a IrqCell<T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqCellGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.cell.inner.get() }
    }
}

impl<T> DerefMut for IrqCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.cell.inner.get() }
    }
}

impl<T> Drop for IrqCellGuard<'_, T> {
    fn drop(&mut self) {
        // The interrupt guard field drops after this, so the flag is clear
        // before interrupts come back.
        self.cell.borrowed.store(false, Ordering::Release);
    }
}
