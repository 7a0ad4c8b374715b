pub mod constants;
mod errors;
mod types;
mod traits;
mod cancel;
mod progress;
mod orchestrator;
mod manager;
mod manager_worker;

pub use errors::{Result, UploadError};
pub use types::{
    percent_of,
    plan_parts,
    CompletedObject,
    CompletedPart,
    LocalFile,
    MultipartInit,
    MultipartSession,
    PartPlan,
    PartUrl,
    PresignedUpload,
    TransferProgress,
    UploadConfig,
    UploadMode,
    UploadOutcome,
    UploadState,
    UploadTask,
    VideoId,
    VideoRecord,
};
pub use traits::{ByteStream, ObjectStorage, PutResponse, UploadBackend};
pub use cancel::{CancelSignal, CancellationRegistry};
pub use progress::{ProgressCallback, ProgressReporter, ProgressStream, ProgressThrottle, Settlement};
pub use orchestrator::UploadOrchestrator;
pub use manager::{UploadEvent, UploadManager, UploadManagerHandle};
