//! Domain types shared by every booth crate.
//!
//! - [`workflow`]: the parametrizable workflow template and its node roles.
//! - [`job`]: the generation job entity and its lifecycle status.
//! - [`tracker`]: the job status tracker and its persistence seam.

pub mod error;
pub mod job;
pub mod tracker;
pub mod types;
pub mod workflow;
