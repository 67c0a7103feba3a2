//! The all-to-all mailbox mesh.
//!
//! For `n` workers the mesh owns `n * n` cache-line-aligned buffers, one
//! per directed edge with the loopbacks on the diagonal. Edge `(s, d)`
//! carries traffic from worker `s` to worker `d` and has exactly one
//! consumer — worker `d` — so a batch claim is a single swap. Producers
//! on an edge CAS-prepend; external threads share worker 0's outbound
//! row, which is the only place producers actually contend.

use crate::counted::Ref;
use crate::expression::{self, RawExpr};
use crate::intrusive::{Exchange, List};
use crate::tag::{Tag, TaggedPtr};
use crate::utils::CacheAligned;

/// One directed-edge mailbox.
pub(crate) type Buffer = CacheAligned<Exchange<RawExpr>>;

/// The full interconnect: `workers * workers` buffers in one slab.
pub(crate) struct Mesh {
    buffers: Box<[Buffer]>,
    workers: usize,
}

impl Mesh {
    pub(crate) fn new(workers: usize) -> Self {
        let buffers = (0..workers * workers)
            .map(|_| CacheAligned::new(Exchange::new()))
            .collect();
        Self { buffers, workers }
    }

    #[inline]
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    fn edge(&self, src: usize, dst: usize) -> &Buffer {
        &self.buffers[src * self.workers + dst]
    }

    /// The mesh as seen from worker `index`.
    #[inline]
    pub(crate) fn node(&self, index: usize) -> Node<'_> {
        debug_assert!(index < self.workers);
        Node { mesh: self, index }
    }

    /// Claim and release everything still sitting in any mailbox.
    ///
    /// Shutdown-only: callable once every producer and consumer thread
    /// has stopped touching the mesh.
    pub(crate) fn drain(&self) {
        for buffer in self.buffers.iter() {
            let mut batch = buffer.clear(TaggedPtr::null(Tag::Normal));
            // SAFETY: exclusive access; each queued node carries one
            // in-flight reference which we adopt and drop, wake
            // sentinels included.
            unsafe {
                while let Some(message) = batch.pop() {
                    drop(Ref::usurp(message.ptr()));
                }
            }
        }
    }
}

/// A worker-local view over the mesh.
#[derive(Clone, Copy)]
pub(crate) struct Node<'a> {
    mesh: &'a Mesh,
    index: usize,
}

impl<'a> Node<'a> {
    /// The connection between this node and worker `peer`.
    #[inline]
    pub(crate) fn route(&self, peer: usize) -> Connection<'a> {
        Connection {
            outbound: self.mesh.edge(self.index, peer),
            inbound: self.mesh.edge(peer, self.index),
        }
    }
}

/// Both directions of one edge, from one endpoint's perspective.
pub(crate) struct Connection<'a> {
    outbound: &'a Buffer,
    inbound: &'a Buffer,
}

impl Connection<'_> {
    /// Publish a node to the peer, consuming the caller's reference.
    ///
    /// Wake protocol: if the observed prior head was a `Reverse`
    /// sentinel, the peer is preparing to sleep on an empty edge. The
    /// sentinel is unhooked (our message must not be linked through it)
    /// and now belongs to us; evaluating it runs the peer's interrupt.
    pub(crate) fn send(&self, node: Ref<RawExpr>) {
        let message = TaggedPtr::new(node.leak(), Tag::Normal);
        // SAFETY: we own the single-node chain `message..=message`.
        let prior = unsafe {
            self.outbound.insert(message, message, |prior| {
                if prior.tag() == Tag::Reverse {
                    TaggedPtr::null(Tag::Normal)
                } else {
                    prior
                }
            })
        };
        if prior.tag() == Tag::Reverse && !prior.is_null() {
            // SAFETY: the successful exchange transferred the buffer's
            // reference on the sentinel to us; it is adopted after the
            // interrupt closure has run.
            unsafe {
                expression::run(prior.ptr());
                drop(Ref::usurp(prior.ptr()));
            }
        }
    }

    /// Claim the accumulated inbound batch, leaving `sentinel` armed in
    /// the head. Owner-only.
    #[inline]
    pub(crate) fn receive(&self, sentinel: TaggedPtr<RawExpr>) -> List<RawExpr> {
        self.inbound.clear(sentinel)
    }
}
