//! Outbound packet queue

use std::collections::VecDeque;

use crate::protocol::PendingMessage;

/// FIFO of encoded packets waiting for their send slot
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<PendingMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: PendingMessage) {
        self.messages.push_back(message);
    }

    pub fn pop(&mut self) -> Option<PendingMessage> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drop packets whose every strip is carried again by a later packet.
    ///
    /// Walks the queue from the tail, accumulating the strips seen in later
    /// packets. A packet survives if at least one of its strips is not in
    /// that set. Survivors keep their relative order. Returns the number of
    /// packets dropped.
    pub fn trim(&mut self) -> usize {
        if self.messages.len() < 2 {
            return 0;
        }

        let mut superseded = [false; 256];
        let mut keep = vec![false; self.messages.len()];
        for (i, message) in self.messages.iter().enumerate().rev() {
            keep[i] = message
                .strips
                .iter()
                .any(|&strip| !superseded[usize::from(strip)]);
            for &strip in &message.strips {
                superseded[usize::from(strip)] = true;
            }
        }

        let before = self.messages.len();
        let mut flags = keep.into_iter();
        self.messages.retain(|_| flags.next().unwrap_or(true));
        before - self.messages.len()
    }
}

impl Extend<PendingMessage> for OutboundQueue {
    fn extend<T: IntoIterator<Item = PendingMessage>>(&mut self, iter: T) {
        self.messages.extend(iter);
    }
}
