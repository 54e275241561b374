use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("authentication failed: invalid worker id {0}")]
    Unauthenticated(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    #[error("No stream with key {0}")]
    StreamKeyNotFound(String),

    #[error("Course not found: {0}")]
    CourseNotFound(u32),

    #[error("Lecture hall not found: {0}")]
    LectureHallNotFound(u32),

    #[error("No alive workers to handle {0}")]
    NoWorkersAvailable(&'static str),

    #[error("Worker {worker_id} rejected stream {stream_id}")]
    Rejected { worker_id: String, stream_id: u32 },

    #[error("Stream {0} rejected, time out of bounds")]
    OutsideWindow(u32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Light control failed: {0}")]
    Actuator(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
}

impl From<DispatchError> for tonic::Status {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::Unauthenticated(_) => tonic::Status::unauthenticated(message),
            DispatchError::StreamNotFound(_)
            | DispatchError::StreamKeyNotFound(_)
            | DispatchError::CourseNotFound(_)
            | DispatchError::LectureHallNotFound(_) => tonic::Status::not_found(message),
            DispatchError::OutsideWindow(_) | DispatchError::PermissionDenied(_) => {
                tonic::Status::permission_denied(message)
            }
            DispatchError::InvalidArgument(_) => tonic::Status::invalid_argument(message),
            DispatchError::NoWorkersAvailable(_)
            | DispatchError::Rejected { .. }
            | DispatchError::Transport(_) => tonic::Status::unavailable(message),
            DispatchError::Grpc(status) => status,
            DispatchError::Storage(_) | DispatchError::Actuator(_) => {
                tonic::Status::internal(message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
