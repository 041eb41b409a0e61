//! Generation pipeline: one worker driving one ComfyUI backend, and the
//! submit/poll facade in front of it.
//!
//! A job flows through [`runner::GenerationRunner`]:
//!
//! 1. wait for the backend readiness check
//! 2. stage the session's input image where the backend can load it
//! 3. apply the per-job parameters to the workflow template
//! 4. open the event socket, then submit the workflow
//! 5. drive the [`ExecutionMonitor`](booth_comfyui::monitor::ExecutionMonitor)
//!    until the run completes
//! 6. store the image and record completion
//!
//! [`facade::JobFacade`] hands each submission to a background task and
//! answers polls with a bounded wait.

pub mod config;
pub mod error;
pub mod facade;
pub mod launcher;
pub mod runner;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineErrorKind};
pub use facade::{JobFacade, JobInput, JobPoll, JobResult};
pub use runner::{GenerationExecutor, GenerationOutput, GenerationRunner};
