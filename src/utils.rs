use std::ops::{Deref, DerefMut};

/// Pads and aligns its contents out to one cache line.
///
/// Mailbox heads sit in arrays indexed by edge; without this, two
/// adjacent edges would share a line and every producer CAS would
/// false-share with its neighbor's traffic. The line size is a
/// per-target guess: 256 on s390x, 128 on aarch64 (big.LITTLE and
/// M-series prefetch in pairs), 64 everywhere else.
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(target_arch = "aarch64", repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "s390x", target_arch = "aarch64")),
    repr(align(64))
)]
pub(crate) struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
