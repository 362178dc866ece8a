use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::preprocess::InputBatch;

/// Default location of the exported classifier bundle.
pub const DEFAULT_MODEL_DIR: &str = "model/image_classifier_clean";

/// A loaded classifier network.
///
/// Implementations are invoked concurrently through `&self`; any locking the
/// inference runtime needs is its own business.
pub trait Model: Send + Sync {
    /// Run one forward pass, returning one score vector per batch item.
    fn predict(&self, batch: &InputBatch) -> Result<Vec<Vec<f32>>>;

    /// Architecture details for introspection.
    fn summary(&self) -> ModelSummary;
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelSummary {
    /// Backend that executes the model
    pub backend: String,

    /// Where the artifact was loaded from
    pub source: String,

    /// Input tensor name in the serving signature
    pub input: String,

    /// Output tensor name in the serving signature
    pub output: String,

    /// Number of graph operations
    pub operations: usize,

    /// Number of scalar parameters held in variables
    pub parameters: u64,
}

/// Load the exported model at `export_dir` with the compiled-in backend.
#[cfg(feature = "tensorflow")]
pub fn load(export_dir: &Path) -> Result<Box<dyn Model>> {
    Ok(Box::new(saved_model::SavedModel::load(export_dir)?))
}

#[cfg(not(feature = "tensorflow"))]
pub fn load(export_dir: &Path) -> Result<Box<dyn Model>> {
    Err(crate::error::Error::model(format!(
        "cannot load {}: built without the `tensorflow` feature",
        export_dir.display()
    )))
}

#[cfg(feature = "tensorflow")]
pub use saved_model::SavedModel;

#[cfg(feature = "tensorflow")]
mod saved_model {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use log::{debug, info};
    use tensorflow::{
        Graph, Operation, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Tensor,
        TensorInfo, DEFAULT_SERVING_SIGNATURE_DEF_KEY,
    };

    use super::{Model, ModelSummary};
    use crate::error::{Error, Result};
    use crate::preprocess::{InputBatch, INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH};
    use crate::timer::Timer;

    /// Keras model exported as a TensorFlow SavedModel.
    pub struct SavedModel {
        graph: Graph,
        session: Session,
        input: Operation,
        input_index: i32,
        input_name: String,
        output: Operation,
        output_index: i32,
        output_name: String,
        export_dir: PathBuf,
    }

    // Signatures with several tensors are resolved by key order.
    fn first_tensor(
        tensors: &HashMap<String, TensorInfo>,
        what: &str,
    ) -> Result<(String, i32)> {
        let (key, info) = tensors
            .iter()
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .ok_or_else(|| Error::model(format!("serving signature has no {}", what)))?;

        debug!("using {} tensor '{}' ({})", what, key, info.name().name);

        Ok((info.name().name.clone(), info.name().index as i32))
    }

    impl SavedModel {
        pub fn load(export_dir: &Path) -> Result<Self> {
            let mut t = Timer::new_start("Loading session");

            let mut graph = Graph::new();
            let bundle =
                SavedModelBundle::load(&SessionOptions::new(), &["serve"], &mut graph, export_dir)?;

            let ((input_name, input_index), (output_name, output_index)) = {
                let signature = bundle
                    .meta_graph_def()
                    .get_signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY)?;
                (
                    first_tensor(signature.inputs(), "input")?,
                    first_tensor(signature.outputs(), "output")?,
                )
            };

            let input = graph.operation_by_name_required(&input_name)?;
            let output = graph.operation_by_name_required(&output_name)?;

            t.stop();
            info!("Loaded SavedModel from {}", export_dir.display());

            Ok(SavedModel {
                graph,
                session: bundle.session,
                input,
                input_index,
                input_name,
                output,
                output_index,
                output_name,
                export_dir: export_dir.to_path_buf(),
            })
        }

        fn parameter_count(&self) -> u64 {
            self.graph
                .operation_iter()
                .filter(|op| {
                    matches!(
                        op.op_type().as_deref(),
                        Ok("VarHandleOp") | Ok("VariableV2")
                    )
                })
                .filter_map(|op| op.get_attr_shape("shape").ok())
                .map(|shape| {
                    let dims: Option<Vec<Option<i64>>> = shape.into();
                    dims.unwrap_or_default()
                        .iter()
                        .map(|d| d.unwrap_or(0).max(0) as u64)
                        .product::<u64>()
                })
                .sum()
        }
    }

    impl Model for SavedModel {
        fn predict(&self, batch: &InputBatch) -> Result<Vec<Vec<f32>>> {
            let mut t = Timer::new_start("Running session");

            let input = Tensor::new(&[
                batch.len() as u64,
                INPUT_HEIGHT as u64,
                INPUT_WIDTH as u64,
                INPUT_CHANNELS as u64,
            ])
            .with_values(batch.data())?;

            let mut args = SessionRunArgs::new();
            args.add_feed(&self.input, self.input_index, &input);
            let token = args.request_fetch(&self.output, self.output_index);

            self.session.run(&mut args)?;
            let output: Tensor<f32> = args.fetch(token)?;

            t.stop();

            let dims = output.dims();
            if dims.len() != 2 || dims[0] as usize != batch.len() || dims[1] == 0 {
                return Err(Error::invalid_output(format!(
                    "expected output of shape ({}, n), got {:?}",
                    batch.len(),
                    dims
                )));
            }

            Ok(output
                .chunks_exact(dims[1] as usize)
                .map(|row| row.to_vec())
                .collect())
        }

        fn summary(&self) -> ModelSummary {
            ModelSummary {
                backend: format!("tensorflow {}", tensorflow::version().unwrap_or_default()),
                source: self.export_dir.display().to_string(),
                input: format!("{}:{}", self.input_name, self.input_index),
                output: format!("{}:{}", self.output_name, self.output_index),
                operations: self.graph.operation_iter().count(),
                parameters: self.parameter_count(),
            }
        }
    }
}
