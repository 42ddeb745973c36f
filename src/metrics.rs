use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    connections_total: AtomicU64,
    matches_started_total: AtomicU64,
    matches_won_total: AtomicU64,
    forfeits_total: AtomicU64,
    pairing_failures_total: AtomicU64,
    submissions_total: AtomicU64,
    submissions_rejected_total: AtomicU64,
    compile_failures_total: AtomicU64,
    judge_unavailable_total: AtomicU64,
    messages_dropped_total: AtomicU64,
    waiting_participants: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_started(&self) {
        self.matches_started_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_won(&self) {
        self.matches_won_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forfeit(&self) {
        self.forfeits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_failed(&self) {
        self.pairing_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_rejected(&self) {
        self.submissions_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compile_failed(&self) {
        self.compile_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn judge_unavailable(&self) {
        self.judge_unavailable_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_waiting(&self, waiting: usize) {
        self.waiting_participants
            .store(waiting as u64, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE arena_connections_total counter\n",
                "arena_connections_total {}\n",
                "# TYPE arena_matches_started_total counter\n",
                "arena_matches_started_total {}\n",
                "# TYPE arena_matches_won_total counter\n",
                "arena_matches_won_total {}\n",
                "# TYPE arena_forfeits_total counter\n",
                "arena_forfeits_total {}\n",
                "# TYPE arena_pairing_failures_total counter\n",
                "arena_pairing_failures_total {}\n",
                "# TYPE arena_submissions_total counter\n",
                "arena_submissions_total {}\n",
                "# TYPE arena_submissions_rejected_total counter\n",
                "arena_submissions_rejected_total {}\n",
                "# TYPE arena_compile_failures_total counter\n",
                "arena_compile_failures_total {}\n",
                "# TYPE arena_judge_unavailable_total counter\n",
                "arena_judge_unavailable_total {}\n",
                "# TYPE arena_messages_dropped_total counter\n",
                "arena_messages_dropped_total {}\n",
                "# TYPE arena_waiting_participants gauge\n",
                "arena_waiting_participants {}\n"
            ),
            self.connections_total.load(Ordering::Relaxed),
            self.matches_started_total.load(Ordering::Relaxed),
            self.matches_won_total.load(Ordering::Relaxed),
            self.forfeits_total.load(Ordering::Relaxed),
            self.pairing_failures_total.load(Ordering::Relaxed),
            self.submissions_total.load(Ordering::Relaxed),
            self.submissions_rejected_total.load(Ordering::Relaxed),
            self.compile_failures_total.load(Ordering::Relaxed),
            self.judge_unavailable_total.load(Ordering::Relaxed),
            self.messages_dropped_total.load(Ordering::Relaxed),
            self.waiting_participants.load(Ordering::Relaxed),
        )
    }
}
