use std::sync::Arc;

use tokio::sync::{
    Mutex,
    mpsc::{self, Receiver, Sender, error::TrySendError},
};

use crate::{metrics::MetricsRegistry, models::Problem, room::ParticipantId};

#[derive(Debug, Clone)]
pub struct JudgeJob {
    pub participant: ParticipantId,
    pub problem: Arc<Problem>,
    pub code: String,
}

/// Bounded hand-off between the room and the judge workers. Enqueueing never waits, so
/// it is safe to call while holding the room lock.
#[derive(Clone)]
pub struct JudgeQueue {
    sender: Sender<JudgeJob>,
    receiver: Arc<Mutex<Receiver<JudgeJob>>>,
    metrics: Arc<MetricsRegistry>,
}

impl JudgeQueue {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            metrics,
        }
    }

    /// Hands the job back when the queue is full or no worker is left to take it.
    pub fn try_submit(&self, job: JudgeJob) -> Result<(), JudgeJob> {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.submitted();
                Ok(())
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => Err(job),
        }
    }

    pub fn receiver(&self) -> Arc<Mutex<Receiver<JudgeJob>>> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{JudgeJob, JudgeQueue};
    use crate::{metrics::MetricsRegistry, store::seed_problems};

    fn job() -> JudgeJob {
        JudgeJob {
            participant: Uuid::new_v4(),
            problem: Arc::new(seed_problems().remove(0)),
            code: "int main() {}".to_string(),
        }
    }

    #[tokio::test]
    async fn rejects_without_waiting_once_full() {
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = JudgeQueue::new(1, metrics.clone());

        assert!(queue.try_submit(job()).is_ok());
        let rejected = queue.try_submit(job()).unwrap_err();
        assert_eq!(rejected.code, "int main() {}");
        assert!(metrics.render_prometheus().contains("arena_submissions_total 1\n"));

        let receiver = queue.receiver();
        assert!(receiver.lock().await.recv().await.is_some());
        assert!(queue.try_submit(job()).is_ok());
    }
}
