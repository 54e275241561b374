pub mod config;
pub mod dashboard;
pub mod directory;
pub mod error;
pub mod grpc;
pub mod lights;
pub mod node;
pub mod notify;
pub mod scheduler;
pub mod shutdown;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("api");
}
