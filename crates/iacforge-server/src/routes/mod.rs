//! HTTP route modules, one per resource.

pub mod artifacts;
pub mod credentials;
pub mod jobs;
pub mod standards;
pub mod sys;
