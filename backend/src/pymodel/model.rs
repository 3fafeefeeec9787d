use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

/// Per-request parameter set handed to the prediction routine.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub image_path: PathBuf,
    pub model_path: String,
    pub labels_path: String,
    pub infer_orientation: String,
    pub dump_chars: bool,
    pub debug_boxes: bool,
}

/// Seam over the external word-prediction routine. Implementations report
/// their result by writing to `sys.stdout`, never through a return value;
/// `WordPredictor` owns turning that into a string.
pub trait WordModel: Send + Sync {
    fn invoke(&self, py: Python<'_>, call: &Invocation) -> PyResult<()>;
}

/// The real collaborator: a Python module exporting `predict_word`.
pub struct ScriptModel {
    module: String,
}

impl ScriptModel {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }

    /// Artifact paths the collaborator module declares as its defaults.
    pub fn default_artifacts(&self, py: Python<'_>) -> PyResult<(String, String)> {
        let module = py.import_bound(self.module.as_str())?;
        let model_path = module.getattr("DEFAULT_MODEL_PATH")?.extract()?;
        let labels_path = module.getattr("DEFAULT_LABELS_PATH")?.extract()?;
        Ok((model_path, labels_path))
    }
}

impl WordModel for ScriptModel {
    fn invoke(&self, py: Python<'_>, call: &Invocation) -> PyResult<()> {
        let module = py.import_bound(self.module.as_str())?;
        let kwargs = PyDict::new_bound(py);
        kwargs.set_item("image_path", call.image_path.to_string_lossy().into_owned())?;
        kwargs.set_item("model_path", call.model_path.as_str())?;
        kwargs.set_item("labels_path", call.labels_path.as_str())?;
        kwargs.set_item("infer_orientation", call.infer_orientation.as_str())?;
        kwargs.set_item("dump_chars", call.dump_chars)?;
        kwargs.set_item("debug_boxes", call.debug_boxes)?;
        module.getattr("predict_word")?.call((), Some(&kwargs))?;
        Ok(())
    }
}

/// Makes `dir` importable before the collaborator module is first loaded.
pub fn prepend_sys_path(py: Python<'_>, dir: &str) -> PyResult<()> {
    py.import_bound("sys")?
        .getattr("path")?
        .call_method1("insert", (0, dir))?;
    Ok(())
}
