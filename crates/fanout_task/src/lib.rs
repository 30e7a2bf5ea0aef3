//! Container task run by both workflow branches.
//!
//! The task receives the work item location and its branch through the
//! environment injected by the workflow, inspects the object, and posts a
//! notification to a chat webhook. Any error exits non-zero so the workflow
//! sees a failed attempt and applies its retry policy.

pub mod adapters;
pub mod config;
pub mod handler;
