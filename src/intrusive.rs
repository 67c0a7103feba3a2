//! Intrusive singly-linked lists and the atomic exchange endpoint.
//!
//! The link lives inside the node, so chains move between a mailbox, a
//! wait list, and a worker's local batch without any allocation. The
//! [`Exchange`] endpoint is the producer/consumer boundary: producers
//! CAS-prepend, the consumer claims the entire accumulated chain with a
//! single swap.

use crate::tag::{Tag, TaggedPtr};
use crossbeam_utils::Backoff;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A node type that carries its own list link.
///
/// # Safety
///
/// `next`/`set_next` must address a dedicated field of `this` that no
/// other component reads or writes while the node is owned by a list.
pub(crate) unsafe trait Linked: Sized {
    /// Read the link field.
    unsafe fn next(this: *mut Self) -> TaggedPtr<Self>;
    /// Write the link field.
    unsafe fn set_next(this: *mut Self, next: TaggedPtr<Self>);
}

/// A non-atomic LIFO chain of intrusively linked nodes.
///
/// The list owns whatever protocol-level references its nodes carry;
/// callers drain it and account for each popped entry.
pub(crate) struct List<T: Linked> {
    head: TaggedPtr<T>,
}

impl<T: Linked> List<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: TaggedPtr::null(Tag::Normal),
        }
    }

    pub(crate) const fn from_head(head: TaggedPtr<T>) -> Self {
        Self { head }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Prepend a single node.
    ///
    /// # Safety
    ///
    /// `link` must point to a live node not currently on any list.
    #[inline]
    pub(crate) unsafe fn push(&mut self, link: TaggedPtr<T>) {
        unsafe { T::set_next(link.ptr(), self.head) };
        self.head = link;
    }

    /// Remove and return the head node, if any.
    ///
    /// # Safety
    ///
    /// Every node on the list must still be live.
    #[inline]
    pub(crate) unsafe fn pop(&mut self) -> Option<TaggedPtr<T>> {
        if self.head.is_null() {
            return None;
        }
        let head = self.head;
        self.head = unsafe { T::next(head.ptr()) };
        Some(head)
    }
}

/// Atomic head of a single-consumer mailbox chain.
///
/// Producers prepend with [`insert`](Exchange::insert); the owning
/// consumer claims everything at once with [`clear`](Exchange::clear).
/// The chain comes back in LIFO order: reversal is the price of the
/// one-operation claim and callers must not rely on submission order
/// within a batch.
pub(crate) struct Exchange<T: Linked> {
    head: AtomicUsize,
    marker: PhantomData<*mut T>,
}

// SAFETY: the head word is only ever manipulated atomically; node access
// rights travel with the chain, not with this endpoint.
unsafe impl<T: Linked> Send for Exchange<T> {}
unsafe impl<T: Linked> Sync for Exchange<T> {}

impl<T: Linked> Exchange<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicUsize::new(TaggedPtr::<T>::null(Tag::Normal).into_usize()),
            marker: PhantomData,
        }
    }

    /// Swap the head with `sentinel` and return the prior chain.
    ///
    /// Acquire on the swap pairs with the release in [`insert`]: every
    /// write a producer made before publishing a node is visible to the
    /// consumer walking the returned chain.
    #[inline]
    pub(crate) fn clear(&self, sentinel: TaggedPtr<T>) -> List<T> {
        let prior = self.head.swap(sentinel.into_usize(), Ordering::AcqRel);
        List::from_head(TaggedPtr::from_usize(prior))
    }

    /// CAS-prepend the chain `first..=last`, returning the prior head the
    /// successful exchange observed.
    ///
    /// `prepare` maps the observed prior head to the value stored into
    /// `last`'s link. This is the hook the wake-up protocol rides on: a
    /// producer that observes a `Reverse` sentinel replaces it with null
    /// so the sentinel is never linked behind real traffic, and the
    /// returned prior head tells the caller it now owns that sentinel.
    ///
    /// # Safety
    ///
    /// `first..=last` must be a live chain owned by the caller, and
    /// `last`'s link must be writable here.
    pub(crate) unsafe fn insert(
        &self,
        first: TaggedPtr<T>,
        last: TaggedPtr<T>,
        mut prepare: impl FnMut(TaggedPtr<T>) -> TaggedPtr<T>,
    ) -> TaggedPtr<T> {
        let backoff = Backoff::new();
        loop {
            let prior = TaggedPtr::from_usize(self.head.load(Ordering::Relaxed));
            unsafe { T::set_next(last.ptr(), prepare(prior)) };
            match self.head.compare_exchange(
                prior.into_usize(),
                first.into_usize(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return prior,
                Err(_) => backoff.spin(),
            }
        }
    }
}
