use pyo3::prelude::*;
use pyo3::types::{PyAny, PyModule};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::model::{Invocation, WordModel};

pub const DEFAULT_ORIENTATION: &str = "none";

// Invocation-time constants of this service, never client-controlled.
const DUMP_CHARS: bool = false;
const DEBUG_BOXES: bool = true;

// `sys.stdout` belongs to the whole interpreter, so every predictor
// instance shares the same gate.
static STDOUT_GATE: Mutex<()> = Mutex::new(());

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("prediction routine failed: {0}")]
    Model(String),
    #[error("captured output unreadable: {0}")]
    Capture(String),
    #[error("stdout restoration failed: {0}")]
    CaptureRestoration(String),
}

/// Adapter that turns the collaborator's console output into a typed result.
///
/// The routine writes its prediction to `sys.stdout` and returns nothing, so
/// each call swaps the stream for an in-memory sink, runs the routine, puts
/// the stream back, and hands the drained sink to the caller.
#[derive(Clone)]
pub struct WordPredictor {
    model: Arc<dyn WordModel>,
    model_path: String,
    labels_path: String,
    timeout: Option<Duration>,
}

impl WordPredictor {
    pub fn new(model: Arc<dyn WordModel>, model_path: String, labels_path: String) -> Self {
        Self {
            model,
            model_path,
            labels_path,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request-side wait bound for a single prediction, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs the collaborator on a staged image and returns the text it wrote
    /// to stdout, trimmed. At most one invocation holds the redirected
    /// stream at a time.
    pub fn predict(
        &self,
        image_path: &Path,
        infer_orientation: &str,
    ) -> Result<String, InferenceError> {
        let call = Invocation {
            image_path: image_path.to_path_buf(),
            model_path: self.model_path.clone(),
            labels_path: self.labels_path.clone(),
            infer_orientation: if infer_orientation.is_empty() {
                DEFAULT_ORIENTATION.to_string()
            } else {
                infer_orientation.to_string()
            },
            dump_chars: DUMP_CHARS,
            debug_boxes: DEBUG_BOXES,
        };

        // A poisoned gate means a previous holder panicked after its guard
        // already put stdout back; the gate itself is still usable.
        let _gate = STDOUT_GATE.lock().unwrap_or_else(PoisonError::into_inner);

        Python::with_gil(|py| {
            let capture = StdoutCapture::redirect(py)
                .map_err(|e| InferenceError::Capture(e.to_string()))?;
            let outcome = self.model.invoke(py, &call);
            // Restoration runs before the invocation outcome is inspected;
            // a failed call must not leave the stream redirected.
            let captured = capture.finish()?;
            outcome.map_err(|e| InferenceError::Model(e.to_string()))?;
            Ok(captured.trim().to_string())
        })
    }
}

struct StdoutCapture<'py> {
    sys: Bound<'py, PyModule>,
    original: Bound<'py, PyAny>,
    sink: Bound<'py, PyAny>,
    active: bool,
}

impl<'py> StdoutCapture<'py> {
    fn redirect(py: Python<'py>) -> PyResult<Self> {
        let sys = py.import_bound("sys")?;
        let original = sys.getattr("stdout")?;
        let sink = py.import_bound("io")?.call_method0("StringIO")?;
        sys.setattr("stdout", &sink)?;
        Ok(Self {
            sys,
            original,
            sink,
            active: true,
        })
    }

    /// Puts the original stream back and drains the sink. Restoration
    /// happens here or in `Drop`, whichever runs first.
    fn finish(mut self) -> Result<String, InferenceError> {
        self.active = false;
        self.sys
            .setattr("stdout", &self.original)
            .map_err(|e| InferenceError::CaptureRestoration(e.to_string()))?;
        self.sink
            .call_method0("getvalue")
            .and_then(|value| value.extract::<String>())
            .map_err(|e| InferenceError::Capture(e.to_string()))
    }
}

impl Drop for StdoutCapture<'_> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.sys.setattr("stdout", &self.original);
        }
    }
}
