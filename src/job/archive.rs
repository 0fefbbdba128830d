use std::collections::{HashMap, VecDeque};

use crate::job::run::{JobId, JobRun};

/// Terminal jobs in insertion order, bounded to `max_size` entries.
///
/// Inserting past the bound evicts the oldest entries in the same call, so
/// `len() <= max_size` holds between any two operations.
#[derive(Debug)]
pub struct JobArchive {
    max_size: usize,
    order: VecDeque<JobId>,
    runs: HashMap<JobId, JobRun>,
}

impl JobArchive {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            order: VecDeque::new(),
            runs: HashMap::new(),
        }
    }

    /// Insert a run, returning whatever was evicted to stay within bounds.
    pub fn insert(&mut self, run: JobRun) -> Vec<JobRun> {
        let job_id = run.job_id;
        if self.runs.insert(job_id, run).is_some() {
            self.order.retain(|id| *id != job_id);
        }
        self.order.push_back(job_id);

        let mut evicted = Vec::new();
        while self.order.len() > self.max_size {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(run) = self.runs.remove(&oldest) {
                tracing::debug!(job_id = %oldest, "Evicted job from history");
                evicted.push(run);
            }
        }
        evicted
    }

    pub fn get(&self, job_id: &JobId) -> Option<&JobRun> {
        self.runs.get(job_id)
    }

    pub fn get_mut(&mut self, job_id: &JobId) -> Option<&mut JobRun> {
        self.runs.get_mut(job_id)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.runs.contains_key(job_id)
    }

    /// Runs from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &JobRun> {
        self.order.iter().filter_map(|id| self.runs.get(id))
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.order.iter().copied().collect()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
