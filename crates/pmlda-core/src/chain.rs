//! Chain storage and sinks
//!
//! The runner owns one [`Chain`] and appends a [`ChainLink`] per root
//! advance. Every link is also pushed to a [`ChainSink`]; the core itself
//! persists nothing.

use pmlda_tree::{Level, NodeId, Outcome, State};
use serde::{Deserialize, Serialize};
use std::io;

/// One chain step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Position in the chain, starting at the configured start step
    pub index: usize,
    /// Chain index within a multi-chain run
    pub chain: usize,
    /// Decision that produced this entry
    pub outcome: Outcome,
    /// Level at which the decision was reached
    pub decided_at: Level,
    /// Resulting chain state
    pub state: State,
    /// Finest-level log-density of `state`, if it was evaluated
    pub log_density: Option<f64>,
    /// Tree node that held the decision
    pub node: NodeId,
}

/// Append-only sequence of chain steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    initial: State,
    links: Vec<ChainLink>,
}

impl Chain {
    /// Start an empty chain at `initial`
    #[must_use]
    pub fn new(initial: State) -> Self {
        Self {
            initial,
            links: Vec::new(),
        }
    }

    /// Append a step
    pub fn push(&mut self, link: ChainLink) {
        self.links.push(link);
    }

    /// Number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check for an empty chain
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// State the chain started from
    #[inline]
    #[must_use]
    pub fn initial(&self) -> &State {
        &self.initial
    }

    /// Current chain state
    #[must_use]
    pub fn last_state(&self) -> &State {
        self.links.last().map_or(&self.initial, |l| &l.state)
    }

    /// All steps
    #[inline]
    #[must_use]
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// States in chain order
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.links.iter().map(|l| &l.state)
    }

    /// Number of accepted steps
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.links.iter().filter(|l| l.outcome.is_accept()).count()
    }

    /// Fraction of accepted steps, 0 for an empty chain
    #[must_use]
    pub fn acceptance_rate(&self) -> f64 {
        if self.links.is_empty() {
            return 0.0;
        }
        self.accepted() as f64 / self.links.len() as f64
    }
}

/// Receives every chain step as it is appended
pub trait ChainSink: Send {
    /// Record one step
    ///
    /// # Errors
    /// I/O failures of the sink; the runner aborts on them.
    fn record(&mut self, link: &ChainLink) -> io::Result<()>;

    /// Flush at the end of a run
    ///
    /// # Errors
    /// I/O failures of the sink.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards every step
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ChainSink for NullSink {
    fn record(&mut self, _link: &ChainLink) -> io::Result<()> {
        Ok(())
    }
}

/// Emits every step as a `tracing` event
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    every: usize,
}

impl TracingSink {
    /// Log every `every`-th step (at least every step)
    #[must_use]
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ChainSink for TracingSink {
    fn record(&mut self, link: &ChainLink) -> io::Result<()> {
        if link.index % self.every == 0 {
            tracing::info!(
                chain = link.chain,
                index = link.index,
                outcome = %link.outcome,
                level = %link.decided_at,
                log_density = ?link.log_density,
                "Chain step"
            );
        }
        Ok(())
    }
}

impl<S: ChainSink + ?Sized> ChainSink for Box<S> {
    fn record(&mut self, link: &ChainLink) -> io::Result<()> {
        (**self).record(link)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}
