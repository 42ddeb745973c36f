mod participant;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    judge::{JudgeError, JudgeJob, JudgeQueue},
    metrics::MetricsRegistry,
    models::{ProblemView, Verdict},
    protocol::{Envelope, Inbound},
    store::ProblemStore,
};

use participant::Seat;
pub use participant::{Mailbox, Participant, ParticipantId};

const PAIRING_FAILED: &str = "Failed to load problem";
const ALREADY_JUDGING: &str = "Your previous submission is still being judged.";
const JUDGE_BUSY: &str = "Judging is unavailable right now, please try again later.";
const PROBLEM_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct RoomState {
    waiting: VecDeque<ParticipantId>,
    seats: HashMap<ParticipantId, Seat>,
}

impl RoomState {
    fn pop_waiting(&mut self) -> Option<ParticipantId> {
        while let Some(id) = self.waiting.pop_front() {
            if self.seats.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}

/// Matchmaking and match lifecycle. All cross-participant state lives behind one lock;
/// judging happens on the worker pool with the lock released.
pub struct Room {
    state: Mutex<RoomState>,
    store: Arc<dyn ProblemStore>,
    queue: JudgeQueue,
    metrics: Arc<MetricsRegistry>,
}

impl Room {
    pub fn new(
        store: Arc<dyn ProblemStore>,
        queue: JudgeQueue,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            state: Mutex::new(RoomState::default()),
            store,
            queue,
            metrics,
        }
    }

    /// Pairs the participant with the longest waiter, or queues it when nobody waits.
    /// The problem is fetched with the room unlocked; the pair is linked only once it
    /// arrives, so a departure during the fetch is a pairing failure, not a forfeit.
    pub async fn register(&self, participant: Participant) {
        let id = participant.id;
        let partner = {
            let mut state = self.state.lock().await;
            self.metrics.connected();
            let seat = Seat::new(participant);

            let Some(partner) = state.pop_waiting() else {
                self.send(id, &seat, Envelope::waiting());
                state.seats.insert(id, seat);
                state.waiting.push_back(id);
                self.metrics.set_waiting(state.waiting.len());
                tracing::info!(participant = %id, "participant waiting for an opponent");
                return;
            };
            state.seats.insert(id, seat);
            self.metrics.set_waiting(state.waiting.len());
            partner
        };

        let fetched =
            match tokio::time::timeout(PROBLEM_FETCH_TIMEOUT, self.store.random_problem()).await {
                Ok(result) => result.map_err(|err| err.to_string()),
                Err(_) => Err(format!(
                    "problem fetch timed out after {PROBLEM_FETCH_TIMEOUT:?}"
                )),
            };

        let mut state = self.state.lock().await;
        let problem = match fetched {
            Ok(problem) => Arc::new(problem),
            Err(reason) => {
                self.abort_pairing_locked(&mut state, [partner, id], &reason);
                return;
            }
        };
        if !(state.seats.contains_key(&partner) && state.seats.contains_key(&id)) {
            self.abort_pairing_locked(
                &mut state,
                [partner, id],
                "participant left before the match started",
            );
            return;
        }

        let view = ProblemView::from(problem.as_ref());
        for (me, other) in [(partner, id), (id, partner)] {
            if let Some(seat) = state.seats.get_mut(&me) {
                seat.partner = Some(other);
                seat.problem = Some(problem.clone());
                self.send(me, seat, Envelope::problem_ready(view.clone()));
                seat.activate();
            }
        }
        self.metrics.match_started();
        tracing::info!(
            first = %partner,
            second = %id,
            problem_id = problem.id,
            "match started"
        );
    }

    pub async fn dispatch(&self, id: ParticipantId, message: Inbound) {
        match message {
            Inbound::Submit { code } => self.handle_submission(id, code).await,
            Inbound::Chat { text } => self.handle_chat(id, text).await,
            Inbound::Unknown { kind } => {
                tracing::warn!(participant = %id, kind = %kind, "ignoring unknown message type");
            }
        }
    }

    /// Queues the code for judging. Solved, unpaired, and departed participants are
    /// ignored; a participant has at most one submission in flight.
    pub async fn handle_submission(&self, id: ParticipantId, code: String) {
        let mut state = self.state.lock().await;
        let Some(seat) = state.seats.get_mut(&id) else {
            return;
        };
        if seat.solved {
            tracing::debug!(participant = %id, "ignoring submission after solve");
            return;
        }
        let Some(problem) = seat.problem.clone() else {
            return;
        };
        if seat.judging {
            self.metrics.submission_rejected();
            self.send(id, seat, Envelope::error(ALREADY_JUDGING));
            return;
        }

        let job = JudgeJob {
            participant: id,
            problem,
            code,
        };
        match self.queue.try_submit(job) {
            Ok(()) => seat.judging = true,
            Err(_) => {
                self.metrics.judge_unavailable();
                tracing::warn!(participant = %id, "judge queue full, rejecting submission");
                self.send(id, seat, Envelope::error(JUDGE_BUSY));
            }
        }
    }

    /// Delivers a judge outcome. The participant may have left while judging; then the
    /// result is dropped.
    pub async fn complete_submission(
        &self,
        id: ParticipantId,
        result: Result<Verdict, JudgeError>,
    ) {
        let mut state = self.state.lock().await;
        let Some(seat) = state.seats.get_mut(&id) else {
            tracing::debug!(participant = %id, "dropping verdict for departed participant");
            return;
        };
        seat.judging = false;
        if seat.solved {
            return;
        }

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(err) => {
                if err.is_code_defect() {
                    self.metrics.compile_failed();
                } else {
                    self.metrics.judge_unavailable();
                }
                self.send(id, seat, Envelope::error(err.user_message()));
                return;
            }
        };

        let won = verdict.all_passed();
        self.send(id, seat, Envelope::judged(verdict));
        if !won {
            return;
        }

        seat.solved = true;
        let identity = seat.identity.clone();
        let problem_id = seat.problem.as_ref().map(|p| p.id);
        self.declare_win_locked(&mut state, id);

        if let Some(problem_id) = problem_id {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(err) = store.record_solve(&identity, problem_id).await {
                    tracing::warn!(identity = %identity, problem_id, error = %err, "failed to record solve");
                }
            });
        }
    }

    pub async fn handle_chat(&self, id: ParticipantId, text: String) {
        let state = self.state.lock().await;
        let Some(seat) = state.seats.get(&id) else {
            return;
        };
        if seat.solved {
            return;
        }
        let Some((partner_id, partner)) = seat
            .partner
            .and_then(|p| state.seats.get(&p).map(|seat| (p, seat)))
        else {
            return;
        };
        self.send(partner_id, partner, Envelope::chat_from_opponent(text));
    }

    /// Awards an unsolved partner the match by forfeit, then removes the participant.
    /// The match is over for the partner too, so both sides are released.
    pub async fn handle_disconnect(&self, id: ParticipantId) {
        let mut state = self.state.lock().await;
        let partner = state.seats.get(&id).and_then(|seat| seat.partner);
        if let Some(partner_id) = partner
            && let Some(seat) = state.seats.get(&partner_id)
            && !seat.solved
        {
            self.send(partner_id, seat, Envelope::win_by_forfeit());
            self.metrics.forfeit();
            tracing::info!(winner = %partner_id, loser = %id, "match won by forfeit");
            Self::cleanup_locked(&mut state, partner_id);
        }
        if Self::cleanup_locked(&mut state, id) {
            tracing::info!(participant = %id, "participant left");
        }
        self.metrics.set_waiting(state.waiting.len());
    }

    pub async fn waiting_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    pub async fn active_matches(&self) -> usize {
        let state = self.state.lock().await;
        state
            .seats
            .values()
            .filter(|seat| seat.partner.is_some())
            .count()
            / 2
    }

    fn declare_win_locked(&self, state: &mut RoomState, winner: ParticipantId) {
        let Some(loser) = state.seats.get(&winner).and_then(|seat| seat.partner) else {
            return;
        };
        if let Some(seat) = state.seats.get(&winner) {
            self.send(winner, seat, Envelope::win());
        }
        if let Some(seat) = state.seats.get(&loser) {
            self.send(loser, seat, Envelope::lose());
        }
        self.metrics.match_won();
        tracing::info!(winner = %winner, loser = %loser, "match won");

        // Dropping a seat closes its outbound queue; writers flush what is queued first.
        Self::cleanup_locked(state, winner);
        Self::cleanup_locked(state, loser);
    }

    fn abort_pairing_locked(
        &self,
        state: &mut RoomState,
        pair: [ParticipantId; 2],
        reason: &str,
    ) {
        self.metrics.pairing_failed();
        tracing::error!(first = %pair[0], second = %pair[1], reason, "failed to start match");
        for pid in pair {
            if let Some(seat) = state.seats.get(&pid) {
                self.send(pid, seat, Envelope::error(PAIRING_FAILED));
            }
            Self::cleanup_locked(state, pid);
        }
        self.metrics.set_waiting(state.waiting.len());
    }

    /// Returns false when the participant was already gone.
    fn cleanup_locked(state: &mut RoomState, id: ParticipantId) -> bool {
        let Some(seat) = state.seats.remove(&id) else {
            return false;
        };
        state.waiting.retain(|waiting| *waiting != id);
        if let Some(partner) = seat.partner
            && let Some(other) = state.seats.get_mut(&partner)
            && other.partner == Some(id)
        {
            other.partner = None;
        }
        true
    }

    fn send(&self, id: ParticipantId, seat: &Seat, envelope: Envelope) {
        let kind = envelope.kind.clone();
        if !seat.deliver(envelope) {
            self.metrics.message_dropped();
            tracing::warn!(participant = %id, kind = %kind, "outbound queue full, message dropped");
        }
    }
}

#[cfg(test)]
impl Room {
    /// Removes the participant from the room. Safe to call any number of times.
    pub async fn cleanup(&self, id: ParticipantId) {
        let mut state = self.state.lock().await;
        Self::cleanup_locked(&mut state, id);
        self.metrics.set_waiting(state.waiting.len());
    }

    pub async fn partner_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        self.state
            .lock()
            .await
            .seats
            .get(&id)
            .and_then(|seat| seat.partner)
    }

    pub async fn is_registered(&self, id: ParticipantId) -> bool {
        self.state.lock().await.seats.contains_key(&id)
    }
}
