use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{models::Problem, protocol::Envelope};

pub type ParticipantId = Uuid;

/// A freshly connected endpoint, not yet known to the room.
#[derive(Debug)]
pub struct Participant {
    pub(crate) id: ParticipantId,
    pub(crate) identity: String,
    pub(crate) outbound: mpsc::Sender<Envelope>,
    pub(crate) activation: oneshot::Sender<()>,
}

/// The transport's side of a participant. `outbound` closes once the room is done with
/// the participant; `activation` fires when a match starts.
#[derive(Debug)]
pub struct Mailbox {
    pub outbound: mpsc::Receiver<Envelope>,
    pub activation: oneshot::Receiver<()>,
}

impl Participant {
    pub fn connect(identity: impl Into<String>, capacity: usize) -> (Self, Mailbox) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (activation_tx, activation_rx) = oneshot::channel();
        (
            Self {
                id: Uuid::new_v4(),
                identity: identity.into(),
                outbound: outbound_tx,
                activation: activation_tx,
            },
            Mailbox {
                outbound: outbound_rx,
                activation: activation_rx,
            },
        )
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }
}

/// Room-owned state for one registered participant.
#[derive(Debug)]
pub(crate) struct Seat {
    pub identity: String,
    pub outbound: mpsc::Sender<Envelope>,
    pub activation: Option<oneshot::Sender<()>>,
    pub partner: Option<ParticipantId>,
    pub problem: Option<Arc<Problem>>,
    pub solved: bool,
    pub judging: bool,
}

impl Seat {
    pub fn new(participant: Participant) -> Self {
        Self {
            identity: participant.identity,
            outbound: participant.outbound,
            activation: Some(participant.activation),
            partner: None,
            problem: None,
            solved: false,
            judging: false,
        }
    }

    /// Never waits. Returns false when the message was dropped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.outbound.try_send(envelope).is_ok()
    }

    pub fn activate(&mut self) {
        if let Some(activation) = self.activation.take() {
            let _ = activation.send(());
        }
    }
}
