//! Shared fan-out domain primitives.
//!
//! This crate owns the message contract, the conditional-dispatch workflow
//! model, the queue redrive rules, and the transport wirings that connect the
//! queue to the workflow. It intentionally excludes AWS SDK and Lambda runtime
//! concerns; those live in `fanout_lambda` and `fanout_task`.

pub mod contract;
pub mod definition;
pub mod queue;
pub mod telemetry;
pub mod transport;
pub mod workflow;
