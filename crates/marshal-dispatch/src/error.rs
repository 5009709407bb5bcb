use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
  #[error("no available worker for capability '{capability}'")]
  NoAvailableWorker { capability: String },

  #[error("worker not found: {worker_id}")]
  WorkerNotFound { worker_id: String },

  #[error("worker '{worker_id}' cannot take '{capability}': {reason}")]
  WorkerUnavailable {
    worker_id: String,
    capability: String,
    reason: String,
  },

  #[error("invalid worker: {0}")]
  InvalidWorker(String),
}
