//! The worker registry and dispatcher.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use marshal_config::FleetConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::worker::{AssignmentStatus, TaskAssignment, Worker, WorkerStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
  pub total: usize,
  pub ready: usize,
  pub busy: usize,
  pub offline: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
  pub total: usize,
  pub pending: usize,
  pub completed: usize,
  pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
  pub workers: WorkerStats,
  pub tasks: TaskStats,
}

#[derive(Debug, Default)]
struct Registry {
  /// Registration order. Selection ties resolve to the earliest entry.
  workers: Vec<Worker>,
  tasks: HashMap<String, TaskAssignment>,
  task_order: Vec<String>,
}

impl Registry {
  fn position(&self, worker_id: &str) -> Option<usize> {
    self.workers.iter().position(|w| w.worker_id == worker_id)
  }

  fn candidates<'a>(
    &'a self,
    capability: &'a str,
    worker_type: Option<&'a str>,
  ) -> impl Iterator<Item = (usize, &'a Worker)> + 'a {
    self.workers.iter().enumerate().filter(move |(_, w)| {
      w.status == WorkerStatus::Ready
        && w.has_capacity()
        && worker_type.is_none_or(|t| w.worker_type == t)
        && w.can_handle(capability)
    })
  }

  fn select(
    &self,
    capability: &str,
    worker_type: Option<&str>,
    preferred: Option<&str>,
  ) -> Result<usize, DispatchError> {
    let mut best: Option<(usize, &Worker)> = None;
    for (idx, worker) in self.candidates(capability, worker_type) {
      if preferred == Some(worker.worker_id.as_str()) {
        return Ok(idx);
      }
      // strict less-than keeps the earliest registered on ties
      if best.is_none_or(|(_, b)| worker.current_load < b.current_load) {
        best = Some((idx, worker));
      }
    }

    best
      .map(|(idx, _)| idx)
      .ok_or_else(|| DispatchError::NoAvailableWorker {
        capability: capability.to_string(),
      })
  }

  fn assign(&mut self, idx: usize, capability: &str, params: serde_json::Value) -> TaskAssignment {
    let worker = &mut self.workers[idx];
    worker.current_load += 1;

    let assignment = TaskAssignment {
      task_id: new_task_id(),
      worker_id: worker.worker_id.clone(),
      worker_type: worker.worker_type.clone(),
      capability: capability.to_string(),
      params,
      assigned_at: Utc::now(),
      status: AssignmentStatus::Assigned,
      completed_at: None,
    };

    self.task_order.push(assignment.task_id.clone());
    self
      .tasks
      .insert(assignment.task_id.clone(), assignment.clone());
    assignment
  }
}

fn new_task_id() -> String {
  let id = uuid::Uuid::new_v4().simple().to_string();
  format!("task-{}", &id[..8])
}

fn validate(worker: &Worker) -> Result<(), DispatchError> {
  if worker.worker_id.trim().is_empty() {
    return Err(DispatchError::InvalidWorker(
      "worker_id must not be empty".to_string(),
    ));
  }
  if worker.max_load == 0 {
    return Err(DispatchError::InvalidWorker(format!(
      "worker '{}' must have max_load > 0",
      worker.worker_id
    )));
  }
  if worker.current_load > worker.max_load {
    return Err(DispatchError::InvalidWorker(format!(
      "worker '{}' has current_load {} above max_load {}",
      worker.worker_id, worker.current_load, worker.max_load
    )));
  }
  Ok(())
}

/// Capability-matching task dispatcher.
///
/// Construct one per process and share it behind an `Arc`; there is no global
/// instance. All methods are synchronous and take the internal lock for the
/// duration of the call, so select, increment and record happen as one step.
#[derive(Debug, Default)]
pub struct Dispatcher {
  state: Mutex<Registry>,
}

impl Dispatcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a dispatcher pre-populated with the configured fleet.
  pub fn from_config(fleet: &FleetConfig) -> Result<Self, DispatchError> {
    let dispatcher = Self::new();
    for def in &fleet.workers {
      dispatcher.register(Worker::from(def.clone()))?;
    }
    Ok(dispatcher)
  }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    // registry updates never leave it half-written, so a poisoned lock is still usable
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Insert or replace a worker by id.
  pub fn register(&self, worker: Worker) -> Result<(), DispatchError> {
    validate(&worker)?;

    let mut state = self.lock();
    info!(
      worker_id = %worker.worker_id,
      worker_type = %worker.worker_type,
      capabilities = ?worker.capabilities,
      "worker_registered"
    );
    match state.position(&worker.worker_id) {
      Some(idx) => state.workers[idx] = worker,
      None => state.workers.push(worker),
    }
    Ok(())
  }

  /// Remove a worker. Unknown ids are ignored.
  pub fn unregister(&self, worker_id: &str) -> Option<Worker> {
    let mut state = self.lock();
    let idx = state.position(worker_id)?;
    info!(worker_id = %worker_id, "worker_unregistered");
    Some(state.workers.remove(idx))
  }

  /// Set a worker's status. Returns `false` if the worker is unknown.
  pub fn update_status(&self, worker_id: &str, status: WorkerStatus) -> bool {
    let mut state = self.lock();
    let Some(idx) = state.position(worker_id) else {
      return false;
    };
    debug!(worker_id = %worker_id, status = %status, "worker_status_updated");
    state.workers[idx].status = status;
    true
  }

  pub fn get_worker(&self, worker_id: &str) -> Option<Worker> {
    let state = self.lock();
    state.position(worker_id).map(|idx| state.workers[idx].clone())
  }

  /// All workers in registration order.
  pub fn list_workers(&self) -> Vec<Worker> {
    self.lock().workers.clone()
  }

  /// Ready workers with spare capacity whose capabilities cover `capability`.
  pub fn find_available(&self, capability: &str, worker_type: Option<&str>) -> Vec<Worker> {
    self
      .lock()
      .candidates(capability, worker_type)
      .map(|(_, w)| w.clone())
      .collect()
  }

  /// Pick one eligible worker: `preferred` if it is a candidate, otherwise the
  /// least loaded.
  pub fn select_best(
    &self,
    capability: &str,
    worker_type: Option<&str>,
    preferred: Option<&str>,
  ) -> Result<Worker, DispatchError> {
    let state = self.lock();
    let idx = state.select(capability, worker_type, preferred)?;
    Ok(state.workers[idx].clone())
  }

  /// Select a worker, reserve one unit of its capacity and record the assignment.
  pub fn dispatch(
    &self,
    capability: &str,
    params: serde_json::Value,
    worker_type: Option<&str>,
    preferred: Option<&str>,
  ) -> Result<TaskAssignment, DispatchError> {
    let mut state = self.lock();
    let idx = match state.select(capability, worker_type, preferred) {
      Ok(idx) => idx,
      Err(e) => {
        warn!(capability = %capability, "no_available_worker");
        return Err(e);
      }
    };

    let assignment = state.assign(idx, capability, params);
    info!(
      task_id = %assignment.task_id,
      worker_id = %assignment.worker_id,
      capability = %capability,
      "task_dispatched"
    );
    Ok(assignment)
  }

  /// Dispatch to one named worker, failing rather than falling back to another.
  pub fn dispatch_to(
    &self,
    worker_id: &str,
    capability: &str,
    params: serde_json::Value,
  ) -> Result<TaskAssignment, DispatchError> {
    let mut state = self.lock();
    let idx = state
      .position(worker_id)
      .ok_or_else(|| DispatchError::WorkerNotFound {
        worker_id: worker_id.to_string(),
      })?;

    let worker = &state.workers[idx];
    let unavailable = |reason: String| DispatchError::WorkerUnavailable {
      worker_id: worker_id.to_string(),
      capability: capability.to_string(),
      reason,
    };
    if worker.status != WorkerStatus::Ready {
      return Err(unavailable(format!("status is {}", worker.status)));
    }
    if !worker.has_capacity() {
      return Err(unavailable(format!(
        "at capacity ({}/{})",
        worker.current_load, worker.max_load
      )));
    }
    if !worker.can_handle(capability) {
      return Err(unavailable("capability not supported".to_string()));
    }

    let assignment = state.assign(idx, capability, params);
    info!(
      task_id = %assignment.task_id,
      worker_id = %assignment.worker_id,
      capability = %capability,
      "task_dispatched"
    );
    Ok(assignment)
  }

  /// Close an assignment and release its capacity.
  ///
  /// Unknown or already-closed tasks are ignored and return `None`.
  pub fn complete(&self, task_id: &str, success: bool) -> Option<TaskAssignment> {
    let mut state = self.lock();
    let assignment = state.tasks.get_mut(task_id)?;
    if assignment.status.is_terminal() {
      debug!(task_id = %task_id, "task_already_closed");
      return None;
    }

    assignment.status = if success {
      AssignmentStatus::Completed
    } else {
      AssignmentStatus::Failed
    };
    assignment.completed_at = Some(Utc::now());
    let assignment = assignment.clone();

    if let Some(idx) = state.position(&assignment.worker_id) {
      let worker = &mut state.workers[idx];
      worker.current_load = worker.current_load.saturating_sub(1);
    }

    info!(
      task_id = %task_id,
      worker_id = %assignment.worker_id,
      success,
      "task_completed"
    );
    Some(assignment)
  }

  pub fn get_assignment(&self, task_id: &str) -> Option<TaskAssignment> {
    self.lock().tasks.get(task_id).cloned()
  }

  /// Open assignments for a worker, oldest first.
  pub fn worker_tasks(&self, worker_id: &str) -> Vec<TaskAssignment> {
    let state = self.lock();
    state
      .task_order
      .iter()
      .filter_map(|id| state.tasks.get(id))
      .filter(|t| t.worker_id == worker_id && !t.status.is_terminal())
      .cloned()
      .collect()
  }

  pub fn stats(&self) -> DispatcherStats {
    let state = self.lock();
    let mut stats = DispatcherStats::default();

    for worker in &state.workers {
      stats.workers.total += 1;
      match worker.status {
        WorkerStatus::Ready => stats.workers.ready += 1,
        WorkerStatus::Busy => stats.workers.busy += 1,
        WorkerStatus::Offline => stats.workers.offline += 1,
      }
    }
    for task in state.tasks.values() {
      stats.tasks.total += 1;
      match task.status {
        AssignmentStatus::Assigned => stats.tasks.pending += 1,
        AssignmentStatus::Completed => stats.tasks.completed += 1,
        AssignmentStatus::Failed => stats.tasks.failed += 1,
      }
    }
    stats
  }
}
