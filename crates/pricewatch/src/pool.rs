//! Concurrency gate for query pipelines.
//!
//! Every pipeline holds one [`PipelineSlot`] for its whole run: a permit
//! from the gate plus its own freshly opened render context. Contexts are
//! never shared or reused across pipelines.

use crate::renderer::{RenderContext, Renderer};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Decrements the active count when the slot goes away, however it ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A pipeline's claim on the gate and its render context.
pub struct PipelineSlot {
    context: Box<dyn RenderContext>,
    _active: ActiveGuard,
    _permit: OwnedSemaphorePermit,
}

impl PipelineSlot {
    /// The slot's render context.
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        self.context.as_mut()
    }

    /// Close the context, then give the permit back.
    pub async fn release(self) -> Result<()> {
        let PipelineSlot {
            context,
            _active,
            _permit,
        } = self;
        context.close().await
    }
}

/// Bounds how many pipelines run at once.
#[derive(Clone)]
pub struct ContextPool {
    renderer: Arc<dyn Renderer>,
    semaphore: Arc<Semaphore>,
    max_contexts: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ContextPool {
    /// Gate allowing `max_contexts` pipelines at once (at least one).
    pub fn new(renderer: Arc<dyn Renderer>, max_contexts: usize) -> Self {
        let max_contexts = max_contexts.max(1);
        Self {
            renderer,
            semaphore: Arc::new(Semaphore::new(max_contexts)),
            max_contexts,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot, then open a context in it.
    pub async fn acquire(&self) -> Result<PipelineSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .context("pipeline gate closed")?;

        let context = self
            .renderer
            .new_context()
            .await
            .with_context(|| format!("opening {} context", self.renderer.name()))?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(PipelineSlot {
            context,
            _active: ActiveGuard(Arc::clone(&self.active)),
            _permit: permit,
        })
    }

    /// Pipelines currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Size of the gate.
    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
