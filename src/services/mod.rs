//! Services: process admission, process lifecycle and the collaborators the
//! schedulers call out to.

pub mod ffmpeg_command_builder;
pub mod inference_client;
pub mod media_processes;
pub mod preview_manager;
pub mod process_task;
pub mod record_manager;
pub mod slot_pool;
pub mod workflow_engine;

pub use ffmpeg_command_builder::FFmpegCommandBuilder;
pub use inference_client::{HttpInferenceClient, InferenceClient, RetryPolicy};
pub use media_processes::MediaProcessManager;
pub use preview_manager::{PreviewHandle, PreviewManager, PreviewStrategy};
pub use process_task::{ProcessCommand, ProcessExit, ProcessTask};
pub use record_manager::{RecordManager, RecordingHandle};
pub use slot_pool::{SlotClass, SlotPermit, SlotPool, SlotPools};
pub use workflow_engine::{LoggingWorkflowEngine, WorkflowEngine};
