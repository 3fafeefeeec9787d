pub mod upload_stager;

pub use upload_stager::{StagedFile, StorageError, UploadStager};
