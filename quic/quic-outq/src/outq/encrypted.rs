// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Drain queue for packets protected off the connection lock.
//!
//! Offloaded crypto finishes on another thread and appends the finished
//! packet through a cloned [`EncryptedQueue`] handle without taking the
//! connection lock. A worker scheduled by the owner later re-acquires
//! the lock and drains the queue through
//! [`encrypted_work`](super::OutQueue::encrypted_work).

use crate::{connection, context::Context, packet::Builder as _, packet::EncryptedPacket};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// A shared handle to the encrypted packet queue
#[derive(Clone, Debug, Default)]
pub struct EncryptedQueue {
    inner: Arc<Mutex<VecDeque<EncryptedPacket>>>,
}

impl EncryptedQueue {
    /// Appends a finished packet; returns true when the drain worker
    /// needs to be scheduled
    pub fn tail(&self, packet: EncryptedPacket) -> bool {
        let mut queue = self.inner.lock().unwrap();
        let was_empty = queue.is_empty();
        queue.push_back(packet);
        was_empty
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    fn pop(&self) -> Option<EncryptedPacket> {
        self.inner.lock().unwrap().pop_front()
    }

    fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

impl super::OutQueue {
    /// A producer handle for crypto offload completions
    pub fn encrypted(&self) -> EncryptedQueue {
        self.encrypted.clone()
    }

    /// Drains the encrypted queue; must run under the connection lock
    ///
    /// A closed connection only discards what is queued.
    pub fn encrypted_work<C: Context>(&mut self, cx: &mut C) {
        if matches!(cx.state(), connection::State::Closed) {
            self.encrypted.clear();
            return;
        }

        while let Some(packet) = self.encrypted.pop() {
            // the packet is ready to send as-is
            let _ = cx.builder().config(packet.level, packet.path_alt);
            cx.builder().xmit(packet, true);
        }
        let _ = cx.builder().flush();
    }
}
