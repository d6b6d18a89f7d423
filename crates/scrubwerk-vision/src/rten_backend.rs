// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `rten` model backend.
//
// # Feature Gate
//
// Only compiled with the `inference` feature:
//
// ```toml
// scrubwerk-vision = { path = "crates/scrubwerk-vision", features = ["inference"] }
// ```
//
// # Model Setup
//
// `rten` executes models in its own `.rten` format. Convert the published
// ONNX files once with `rten-convert`:
//
// ```sh
// pip install rten-convert
// rten-convert face_detection_yunet_2023mar.onnx
// rten-convert yolov8n_handwriting_detection.onnx
// ```
//
// and place the results in the configured model directory.
//
// **Important:** `rten` must be compiled in release mode; debug builds are
// 10-100x slower.

use std::path::Path;

use rten::{Model, NodeId};
use rten_tensor::Tensor as RtenTensor;
use rten_tensor::prelude::*;
use scrubwerk_core::error::{Result, ScrubError};
use tracing::{debug, info, instrument};

use crate::runtime::{ModelRuntime, Tensor};

/// A `.rten` graph plus its resolved input and output nodes.
pub struct RtenRuntime {
    model: Model,
    input_id: NodeId,
    output_ids: Vec<NodeId>,
}

impl RtenRuntime {
    /// Load a model file. Missing files are `ModelUnavailable`, anything
    /// else that goes wrong is a `ModelLoad` failure.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ScrubError::ModelUnavailable(format!(
                "model not found at {}",
                path.display()
            )));
        }

        info!("Loading inference model");
        let model = Model::load_file(path).map_err(|err| {
            ScrubError::ModelLoad(format!(
                "failed to load model from {}: {}",
                path.display(),
                err
            ))
        })?;

        let input_id = model.input_ids().first().copied().ok_or_else(|| {
            ScrubError::ModelLoad(format!("model {} declares no inputs", path.display()))
        })?;
        let output_ids = model.output_ids().to_vec();
        debug!(outputs = output_ids.len(), "Model graph resolved");

        Ok(Self {
            model,
            input_id,
            output_ids,
        })
    }
}

impl ModelRuntime for RtenRuntime {
    fn run(&self, input: Tensor, outputs: &[&str]) -> Result<Vec<Tensor>> {
        let output_ids = if outputs.is_empty() {
            self.output_ids.clone()
        } else {
            outputs
                .iter()
                .map(|name| {
                    self.model.find_node(name).ok_or_else(|| {
                        ScrubError::Inference(format!("model has no node named {name}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let tensor = RtenTensor::from_data(&input.shape, input.data);
        let values = self
            .model
            .run(vec![(self.input_id, tensor.view().into())], &output_ids, None)
            .map_err(|err| ScrubError::Inference(format!("forward pass failed: {err}")))?;

        values
            .into_iter()
            .map(|value| {
                let output: RtenTensor<f32> = value.try_into().map_err(|err| {
                    ScrubError::Inference(format!("unexpected output type: {err:?}"))
                })?;
                Ok(Tensor {
                    shape: output.shape().to_vec(),
                    data: output.to_vec(),
                })
            })
            .collect()
    }
}
