use chrono::Local;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ReminderEvaluator, ReminderReport};
use crate::error::PilotError;

#[derive(Debug)]
pub enum ReminderMessage {
    /// Run both checks in the background.
    Evaluate,

    /// Run both checks and reply with what was created.
    EvaluateNow(RpcReplyPort<ReminderReport>),
}

/// Handle to the per-session reminder actor.
#[derive(Clone)]
pub struct ReminderHandle {
    actor: ActorRef<ReminderMessage>,
}

impl ReminderHandle {
    /// Spawns the actor; it evaluates once right away and then every `interval` if set.
    pub async fn spawn(
        evaluator: ReminderEvaluator,
        interval: Option<Duration>,
    ) -> Result<Self, PilotError> {
        let (actor, _jh) = Actor::spawn(None, ReminderActor, (evaluator, interval))
            .await
            .map_err(|e| PilotError::Ractor(format!("ReminderActor spawn failed: {e}")))?;
        Ok(Self { actor })
    }

    pub fn evaluate(&self) -> Result<(), PilotError> {
        ractor::cast!(self.actor, ReminderMessage::Evaluate)
            .map_err(|e| PilotError::Ractor(format!("ReminderActor cast failed: {e}")))
    }

    pub async fn evaluate_now(&self) -> Result<ReminderReport, PilotError> {
        ractor::call!(self.actor, ReminderMessage::EvaluateNow)
            .map_err(|e| PilotError::Ractor(format!("ReminderActor EvaluateNow RPC failed: {e}")))
    }

    /// Stops the actor and its ticker.
    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

struct ReminderState {
    evaluator: ReminderEvaluator,
    ticker: Option<JoinHandle<()>>,
}

struct ReminderActor;

#[ractor::async_trait]
impl Actor for ReminderActor {
    type Msg = ReminderMessage;
    type State = ReminderState;
    type Arguments = (ReminderEvaluator, Option<Duration>);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (evaluator, interval): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ticker = interval.filter(|d| !d.is_zero()).map(|period| {
            let myself = myself.clone();
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    if myself.cast(ReminderMessage::Evaluate).is_err() {
                        break;
                    }
                }
            })
        });
        info!(interval_secs = interval.map(|d| d.as_secs()), "ReminderActor initialized");
        Ok(ReminderState { evaluator, ticker })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = myself.cast(ReminderMessage::Evaluate);
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let now = Local::now().fixed_offset();
        match message {
            ReminderMessage::Evaluate => {
                let report = state.evaluator.run(now).await;
                debug!(?report, "scheduled reminder evaluation finished");
            }
            ReminderMessage::EvaluateNow(reply) => {
                let report = state.evaluator.run(now).await;
                let _ = reply.send(report);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        debug!("ReminderActor stopped");
        Ok(())
    }
}
