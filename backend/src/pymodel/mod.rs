pub mod model;
pub mod predictor;

pub use model::{Invocation, ScriptModel, WordModel, prepend_sys_path};
pub use predictor::{DEFAULT_ORIENTATION, InferenceError, WordPredictor};
