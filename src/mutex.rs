//! A common Mutex interface.
//!
//! Nothing here implements poisoning! If you panic while having locked one of
//! these mutexes, no guarantees about what happens next!
//!
//! On hosted targets this is `std::sync::Mutex` with the poison check
//! stripped; under the `no_std` feature it is `spin::Mutex`. Both expose the
//! same `const fn new` / `lock` / `get_mut` surface so the rest of the crate
//! doesn't care which one it got.

cfg_if::cfg_if! {
    if #[cfg(feature = "no_std")] {
        pub use spin::{Mutex, MutexGuard};
    } else {
        pub type MutexGuard<'a, T> = std::sync::MutexGuard<'a, T>;

        pub struct Mutex<T> {
            inner: std::sync::Mutex<T>,
        }

        impl<T> Mutex<T> {
            pub const fn new(inner: T) -> Self {
                Self { inner: std::sync::Mutex::new(inner) }
            }

            #[inline]
            pub fn lock(&self) -> MutexGuard<'_, T> {
                self.inner.lock().unwrap_or_else(|e| e.into_inner())
            }

            // Since Rust can statically prove that we have exclusive access
            // in this case, no locking occurs.
            #[inline]
            pub fn get_mut(&mut self) -> &mut T {
                self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
            }
        }
    }
}
