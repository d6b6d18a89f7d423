// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Inference seam — a minimal tensor type and the trait every model backend
// implements. Detectors only ever talk to `ModelRuntime`, which keeps their
// pre/post-processing testable without model files.

use std::path::Path;
use std::sync::Arc;

use scrubwerk_core::error::{Result, ScrubError};

/// Dense `f32` tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Wrap `data`, checking it matches `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ScrubError::Inference(format!(
                "tensor shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A loaded, read-only inference graph.
///
/// Implementations must tolerate concurrent `run` calls: the weights are
/// shared between every caller once loaded.
pub trait ModelRuntime: Send + Sync {
    /// Run one forward pass. An empty `outputs` slice requests every graph
    /// output in declaration order.
    fn run(&self, input: Tensor, outputs: &[&str]) -> Result<Vec<Tensor>>;
}

/// Shared handle to a loaded model.
pub type SharedModel = Arc<dyn ModelRuntime>;

/// Turns a model path into a loaded model. Called at most once per slot.
pub type ModelLoader = Arc<dyn Fn(&Path) -> Result<SharedModel> + Send + Sync>;

/// Whether this build can execute model files at all.
pub fn backend_enabled() -> bool {
    cfg!(feature = "inference")
}

/// Loader backed by `rten` when the `inference` feature is on.
#[cfg(feature = "inference")]
pub fn default_loader() -> ModelLoader {
    Arc::new(|path: &Path| {
        let runtime = crate::rten_backend::RtenRuntime::load(path)?;
        Ok(Arc::new(runtime) as SharedModel)
    })
}

/// Without the `inference` feature every model reports itself unavailable.
#[cfg(not(feature = "inference"))]
pub fn default_loader() -> ModelLoader {
    Arc::new(|path: &Path| {
        Err(ScrubError::ModelUnavailable(format!(
            "{} cannot be executed: built without the `inference` feature",
            path.display()
        )))
    })
}
