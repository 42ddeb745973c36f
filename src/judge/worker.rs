use std::{sync::Arc, time::Instant};

use tokio::sync::{Mutex, mpsc::Receiver};

use crate::{
    judge::{JudgeJob, SubmissionJudge},
    room::Room,
};

pub fn spawn_worker_pool(
    workers: usize,
    receiver: Arc<Mutex<Receiver<JudgeJob>>>,
    judge: Arc<dyn SubmissionJudge>,
    room: Arc<Room>,
) {
    for worker_id in 0..workers {
        let receiver = receiver.clone();
        let judge = judge.clone();
        let room = room.clone();
        tokio::spawn(async move {
            worker_loop(worker_id, receiver, judge, room).await;
        });
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<Receiver<JudgeJob>>>,
    judge: Arc<dyn SubmissionJudge>,
    room: Arc<Room>,
) {
    loop {
        let job = {
            let mut locked = receiver.lock().await;
            locked.recv().await
        };
        let Some(job) = job else {
            tracing::info!(worker_id, "judge queue closed, worker exiting");
            break;
        };

        let started = Instant::now();
        tracing::info!(
            worker_id,
            participant = %job.participant,
            problem_id = job.problem.id,
            "judging submission"
        );

        // The room lock is not held here; a disconnect during judging only makes the
        // completion a no-op.
        let result = judge
            .judge(job.problem.id, &job.code, &job.problem.test_cases)
            .await;

        match &result {
            Ok(verdict) => tracing::info!(
                worker_id,
                participant = %job.participant,
                passed = verdict.passed,
                total = verdict.total,
                duration_ms = started.elapsed().as_millis() as u64,
                "submission judged"
            ),
            Err(err) => tracing::info!(
                worker_id,
                participant = %job.participant,
                error = %err,
                duration_ms = started.elapsed().as_millis() as u64,
                "submission rejected by judge"
            ),
        }

        room.complete_submission(job.participant, result).await;
    }
}
