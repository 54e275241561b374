//! gRPC plumbing between the dispatcher and its workers.
//!
//! - [`WorkerEventService`]: inbound `FromWorker` calls (heartbeats, stream
//!   lifecycle events, self-stream requests)
//! - [`GrpcWorkerDispatcher`]: outbound `ToWorker` assignment calls
//! - [`GrpcServer`]: hosts the inbound service

pub mod server;
pub mod worker_client;
pub mod worker_service;

pub use server::GrpcServer;
pub use worker_client::{GrpcWorkerDispatcher, WorkerDispatcher};
pub use worker_service::WorkerEventService;
