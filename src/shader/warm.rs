//! Background shader warming.
//!
//! Hosts that know which effects are about to be shown can bake them off the
//! render thread. The warmer only ever talks to the cache, so a pair it has
//! baked is a plain cache hit for the compositor later.

use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use super::{
    cache::ShaderModuleCache,
    source::{ShaderSource, ShaderStage},
};

struct WarmRequest {
    vertex: PathBuf,
    fragment: PathBuf,
}

/// Counts reported by [`ShaderWarmer::finish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub baked: usize,
    pub failed: usize,
}

pub struct ShaderWarmer {
    tx: Option<Sender<WarmRequest>>,
    worker: Option<JoinHandle<WarmReport>>,
}

impl ShaderWarmer {
    pub fn spawn(cache: Arc<ShaderModuleCache>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<WarmRequest>();
        let worker = thread::Builder::new()
            .name("shader-warmer".to_string())
            .spawn(move || {
                let mut report = WarmReport::default();
                for req in rx.iter() {
                    match warm_pair(&cache, &req) {
                        Ok(()) => report.baked += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                vertex = %req.vertex.display(),
                                fragment = %req.fragment.display(),
                                error = %format!("{e:#}"),
                                "shader warm failed"
                            );
                        }
                    }
                }
                report
            })
            .context("failed to spawn shader warmer thread")?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a vertex/fragment pair. Returns false once the worker is gone.
    pub fn warm(&self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tx.send(WarmRequest {
            vertex: vertex.into(),
            fragment: fragment.into(),
        })
        .is_ok()
    }

    /// Drain the queue and join the worker.
    pub fn finish(mut self) -> WarmReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WarmReport {
        // Dropping the sender ends the worker's receive loop.
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return WarmReport::default();
        };
        worker.join().unwrap_or_else(|_| {
            tracing::error!("shader warmer thread panicked");
            WarmReport::default()
        })
    }
}

impl Drop for ShaderWarmer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn warm_pair(cache: &ShaderModuleCache, req: &WarmRequest) -> Result<()> {
    let vertex = ShaderSource::load(&req.vertex, ShaderStage::Vertex)?;
    let fragment = ShaderSource::load(&req.fragment, ShaderStage::Fragment)?;
    cache.bake_or_fetch(&vertex, &fragment)?;
    Ok(())
}
