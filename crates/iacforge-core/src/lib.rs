//! Core library for iacforge.
//!
//! Contains the job executor and job table, the content-addressed artifact
//! store, the Terraform generation and compliance engines with their HCL
//! parser, the cloud cost analyzer, and the credential manager with its
//! encryption barrier. This crate depends on `iacforge-storage` for the
//! storage backend trait and knows nothing about HTTP.

pub mod artifact;
pub mod barrier;
pub mod compliance;
pub mod cost;
pub mod credential;
pub mod crypto;
pub mod engines;
pub mod error;
pub mod executor;
pub mod generate;
pub mod hcl;
pub mod job;
pub mod job_table;
pub mod locks;
pub mod retry;
