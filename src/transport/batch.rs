//! Outbound Batching
//!
//! Commands are collected for a short window and flushed together. A batch
//! flushes when the window elapses or the size cap is hit, whichever comes
//! first. Batching never reorders.

use std::time::{Duration, Instant};

use crate::lockstep::command::Command;

/// A flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBatch {
    /// Batch sequence number.
    pub seq: u64,
    /// Commands in send order.
    pub commands: Vec<Command>,
}

/// Accumulates outbound commands.
#[derive(Debug)]
pub struct OutboundBatch {
    pending: Vec<Command>,
    opened_at: Option<Instant>,
    window: Duration,
    max_size: usize,
    next_seq: u64,
}

impl OutboundBatch {
    /// Create a batcher.
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            opened_at: None,
            window,
            max_size: max_size.max(1),
            next_seq: 0,
        }
    }

    /// Add a command. Returns a batch if the size cap was reached.
    pub fn push(&mut self, command: Command, now: Instant) -> Option<FlushedBatch> {
        if self.pending.is_empty() {
            self.opened_at = Some(now);
        }
        self.pending.push(command);
        if self.pending.len() >= self.max_size {
            return self.take();
        }
        None
    }

    /// When the open batch must be flushed, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.window)
    }

    /// Whether the window has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }

    /// Flush whatever is pending.
    pub fn take(&mut self) -> Option<FlushedBatch> {
        if self.pending.is_empty() {
            return None;
        }
        self.opened_at = None;
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(FlushedBatch { seq, commands: std::mem::take(&mut self.pending) })
    }

    /// Commands waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
