//! Queue-triggered dispatcher that turns each SQS record into one workflow
//! execution.
//!
//! [`handlers::dispatcher`] decodes a batch, merges the `taskType` message
//! attribute into the JSON body and starts one execution per record through
//! the [`adapters::execution::ExecutionStarter`] seam. Records that cannot be
//! parsed or started are returned as `batchItemFailures`, so only those
//! messages are redelivered and eventually dead-lettered. The
//! `dispatcher_lambda` binary supplies the Step Functions client; [`runtime`]
//! re-exports the `fanout_core` pieces the handler is written against.

pub mod adapters;
pub mod handlers;
pub mod runtime;
