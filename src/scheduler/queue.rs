//! Priority-ordered waiting list.
//!
//! Jobs are ordered by priority class, then by arrival. A task id appears
//! at most once.

use crate::models::AnalysisJob;

/// Waiting jobs, front is dispatched next.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    jobs: Vec<AnalysisJob>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Insert behind every job of the same or higher priority.
    /// Returns the 1-based position.
    pub fn insert(&mut self, job: AnalysisJob) -> usize {
        let rank = job.priority.rank();
        let idx = self
            .jobs
            .iter()
            .position(|queued| queued.priority.rank() > rank)
            .unwrap_or(self.jobs.len());
        self.jobs.insert(idx, job);
        idx + 1
    }

    /// 1-based position and job of a waiting task.
    pub fn find_task(&self, task_id: &str) -> Option<(usize, &AnalysisJob)> {
        self.jobs
            .iter()
            .enumerate()
            .find(|(_, job)| job.task_id == task_id)
            .map(|(idx, job)| (idx + 1, job))
    }

    pub fn remove_job(&mut self, job_id: &str) -> Option<AnalysisJob> {
        let idx = self.jobs.iter().position(|job| job.job_id == job_id)?;
        Some(self.jobs.remove(idx))
    }

    pub fn pop_front(&mut self) -> Option<AnalysisJob> {
        if self.jobs.is_empty() {
            None
        } else {
            Some(self.jobs.remove(0))
        }
    }

    /// Remove everything, returning how many jobs were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.jobs.len();
        self.jobs.clear();
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalysisJob> {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn drain(queue: &mut WaitingQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop_front())
            .map(|job| job.task_id)
            .collect()
    }

    #[test]
    fn test_priority_then_arrival() {
        let mut queue = WaitingQueue::new();
        assert_eq!(queue.insert(AnalysisJob::new("A", Priority::Low)), 1);
        assert_eq!(queue.insert(AnalysisJob::new("B", Priority::High)), 1);
        assert_eq!(queue.insert(AnalysisJob::new("C", Priority::Medium)), 2);
        assert_eq!(queue.insert(AnalysisJob::new("D", Priority::High)), 2);
        assert_eq!(queue.insert(AnalysisJob::new("E", Priority::Low)), 5);

        assert_eq!(drain(&mut queue), vec!["B", "D", "C", "A", "E"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_find_and_remove() {
        let mut queue = WaitingQueue::new();
        queue.insert(AnalysisJob::new("A", Priority::Medium));
        let b = AnalysisJob::new("B", Priority::Medium);
        let b_id = b.job_id.clone();
        queue.insert(b);

        let (position, job) = queue.find_task("B").unwrap();
        assert_eq!(position, 2);
        assert_eq!(job.job_id, b_id);

        assert!(queue.remove_job(&b_id).is_some());
        assert!(queue.remove_job(&b_id).is_none());
        assert!(queue.find_task("B").is_none());
        assert_eq!(queue.clear(), 1);
    }
}
