use std::cell::UnsafeCell;

/// Interior-mutable cell for buffers shared between the host and the I/O
/// thread. There is no locking: callers rely on the buffer-exchange protocol,
/// where the host only touches the half it was handed in the last buffer
/// switch and the I/O thread only touches the other one.
#[derive(Debug)]
pub struct UnsafeMutex<T> {
    data: UnsafeCell<T>,
}

impl<T> UnsafeMutex<T> {
    pub fn new(data: T) -> Self {
        UnsafeMutex {
            data: UnsafeCell::new(data),
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

unsafe impl<T: Send> Send for UnsafeMutex<T> {}
unsafe impl<T: Send> Sync for UnsafeMutex<T> {}
