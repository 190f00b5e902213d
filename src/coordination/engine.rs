//! Coordinator: single owner of swap state
//!
//! Pollers, submission tasks and the API talk to the coordinator through one
//! input channel. The coordinator appends events to the store, steps the state
//! machine, dispatches actions on spawned tasks and re-arms deadlines and retries.

use super::machine::{
    outstanding_actions, replay, step, ActionKey, Outcome, SwapAction, SwapState, Trigger,
};
use super::scheduler::{Backoff, Deadline, DeadlineKind, Scheduler};
use super::unix_now;
use crate::chain::{ChainPair, TxRef};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult, SubmitError};
use crate::events::{EscrowEvent, EventBatch};
use crate::metrics;
use crate::notify::{Notifier, PhaseTransition};
use crate::store::{EventStore, OrderUpdate, SubmissionRecord, SubmissionStatus};
use crate::swap::{ChainSide, SwapId, SwapOrder, SwapPhase};

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const INPUT_CHANNEL_CAPACITY: usize = 1024;

/// Messages processed by the coordinator
#[derive(Debug)]
pub enum Input {
    /// Events polled from one chain
    Observed { side: ChainSide, batch: EventBatch },
    /// Outcome of a submission task
    Submitted {
        swap_id: SwapId,
        key: ActionKey,
        attempt: u32,
        result: Result<TxRef, SubmitError>,
    },
    /// Start tracking a matched order
    Register {
        order: SwapOrder,
        reply: oneshot::Sender<RelayerResult<SwapPhase>>,
    },
}

/// Cloneable sender side of the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Input>,
}

impl CoordinatorHandle {
    /// Hand a polled batch to the coordinator
    pub async fn observed(&self, side: ChainSide, batch: EventBatch) -> RelayerResult<()> {
        self.tx
            .send(Input::Observed { side, batch })
            .await
            .map_err(|_| RelayerError::CoordinatorClosed)
    }

    /// Register an order and return its current phase
    pub async fn register(&self, order: SwapOrder) -> RelayerResult<SwapPhase> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Register { order, reply })
            .await
            .map_err(|_| RelayerError::CoordinatorClosed)?;
        rx.await.map_err(|_| RelayerError::CoordinatorClosed)?
    }
}

struct TrackedSwap {
    order: SwapOrder,
    state: SwapState,
    /// Last values written to the store
    persisted: OrderUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FlightStatus {
    Submitting,
    AwaitingConfirmation(TxRef),
    BackingOff,
}

/// A dispatched action not yet confirmed on-chain
#[derive(Debug)]
struct InFlight {
    action: SwapAction,
    attempts: u32,
    rejections: u32,
    status: FlightStatus,
}

/// Swap coordinator
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    chains: ChainPair,
    config: RelayerConfig,
    notifier: Notifier,
    swaps: HashMap<SwapId, TrackedSwap>,
    in_flight: HashMap<(SwapId, ActionKey), InFlight>,
    scheduler: Scheduler,
    backoff: Backoff,
    inputs: mpsc::Receiver<Input>,
    input_tx: mpsc::Sender<Input>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(
        store: Arc<dyn EventStore>,
        chains: ChainPair,
        config: RelayerConfig,
        notifier: Notifier,
    ) -> (Self, CoordinatorHandle) {
        let (input_tx, inputs) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let backoff = Backoff::new(
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        );
        let handle = CoordinatorHandle {
            tx: input_tx.clone(),
        };

        let coordinator = Self {
            store,
            chains,
            config,
            notifier,
            swaps: HashMap::new(),
            in_flight: HashMap::new(),
            scheduler: Scheduler::new(),
            backoff,
            inputs,
            input_tx,
        };
        (coordinator, handle)
    }

    /// Rebuild every open swap from durable history
    pub async fn recover(&mut self, now: u64) -> RelayerResult<usize> {
        let orders = self.store.open_orders().await?;
        let count = orders.len();
        for order in orders {
            self.track(order, now).await?;
        }

        info!(
            "Recovered {} open swaps, {} actions outstanding",
            count,
            self.in_flight.len()
        );
        Ok(count)
    }

    /// Main coordination loop
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RelayerResult<()> {
        let mut tick_interval = interval(self.config.tick_interval());

        info!("Coordinator started with {} tracked swaps", self.swaps.len());

        loop {
            tokio::select! {
                Some(input) = self.inputs.recv() => {
                    self.handle_input(input, unix_now()).await?;
                }

                _ = tick_interval.tick() => {
                    self.on_tick(unix_now()).await?;
                }

                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Coordinator stopped");
        Ok(())
    }

    /// Run until `signal` resolves or the loop fails
    ///
    /// Shutdown is broadcast on `shutdown_tx` either way, so pollers and other
    /// tasks stop with the coordinator. A failed loop is returned as the error.
    pub async fn run_until<F>(
        self,
        signal: F,
        shutdown_tx: &watch::Sender<bool>,
    ) -> RelayerResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut task = tokio::spawn(self.run(shutdown_tx.subscribe()));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = signal => {
                info!("Shutdown signal received, stopping...");
                let _ = shutdown_tx.send(true);
                task.await
            }
        };
        let _ = shutdown_tx.send(true);

        match joined {
            Ok(result) => result,
            Err(e) => Err(RelayerError::Internal(format!("Coordinator task failed: {}", e))),
        }
    }

    /// Process one input; only store failures are returned
    pub async fn handle_input(&mut self, input: Input, now: u64) -> RelayerResult<()> {
        match input {
            Input::Observed { side, batch } => self.handle_observed(side, batch, now).await,
            Input::Submitted {
                swap_id,
                key,
                attempt,
                result,
            } => self.handle_submitted(swap_id, key, attempt, result, now).await,
            Input::Register { order, reply } => {
                let result = self.handle_register(order, now).await;
                if reply.send(result).is_err() {
                    debug!("Registration caller went away");
                }
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn recv_input(&mut self) -> Option<Input> {
        self.inputs.recv().await
    }

    /// Fire every deadline that has passed
    pub async fn on_tick(&mut self, now: u64) -> RelayerResult<()> {
        for deadline in self.scheduler.pop_due(now) {
            self.handle_deadline(deadline, now).await?;
        }
        Ok(())
    }

    async fn handle_observed(
        &mut self,
        side: ChainSide,
        batch: EventBatch,
        now: u64,
    ) -> RelayerResult<()> {
        for event in &batch.events {
            if !self.store.append(event).await? {
                debug!("Duplicate {} event at {} ignored", side, event.block_ref);
                metrics::record_duplicate_event(side);
                continue;
            }
            metrics::record_event(side, event.kind.name());
            self.apply_event(event, now).await?;
        }

        // Cursor moves only after the batch is durable
        if let Some(cursor) = batch.cursor {
            self.store.save_cursor(side, cursor).await?;
            metrics::record_cursor(side, cursor.height);
        }
        Ok(())
    }

    async fn apply_event(&mut self, event: &EscrowEvent, now: u64) -> RelayerResult<()> {
        if !self.swaps.contains_key(&event.swap_id) {
            debug!(
                "Stored {} event for untracked swap {}",
                event.kind.name(),
                event.swap_id
            );
            return Ok(());
        }

        self.apply(
            event.swap_id,
            Trigger::Tick {
                now: event.observed_at,
            },
            now,
        )
        .await?;
        self.apply(event.swap_id, Trigger::Event(event), now).await
    }

    async fn handle_register(&mut self, order: SwapOrder, now: u64) -> RelayerResult<SwapPhase> {
        order.validate()?;
        if let Some(tracked) = self.swaps.get(&order.swap_id) {
            return Ok(tracked.state.phase);
        }

        let mut order = order;
        order.status = SwapPhase::AwaitingSourceFund;
        order.revealed_secret = None;

        if !self.store.put_order(&order).await? {
            let existing = self.store.order(&order.swap_id).await?.ok_or_else(|| {
                RelayerError::SwapNotFound {
                    swap_id: order.swap_id.to_hex(),
                }
            })?;
            debug!("Swap {} already registered", order.swap_id);
            return Ok(existing.status);
        }

        info!(
            "Registered swap {} (dest timeout {}, source timeout {})",
            order.swap_id, order.dest_timeout, order.source_timeout
        );
        self.track(order, now).await
    }

    /// Replay an order's history, arm its deadlines and dispatch what it still needs
    async fn track(&mut self, order: SwapOrder, now: u64) -> RelayerResult<SwapPhase> {
        let swap_id = order.swap_id;
        let events = self.store.events_for(&swap_id).await?;
        let state = replay(&order, &events, now);
        let phase = state.phase;
        let from = order.status;

        self.scheduler.schedule_timeouts(&order);
        let outstanding = outstanding_actions(&order, &state, now);
        let persisted = OrderUpdate {
            swap_id,
            phase: order.status,
            revealed_secret: order.revealed_secret,
            open: true,
        };
        self.swaps.insert(
            swap_id,
            TrackedSwap {
                order,
                state,
                persisted,
            },
        );

        debug!(
            "Tracking swap {} in phase {} after {} events",
            swap_id,
            phase,
            events.len()
        );
        for action in outstanding {
            self.dispatch(swap_id, action);
        }
        self.after_change(swap_id, from, None, now).await?;
        Ok(phase)
    }

    /// Step one swap and act on the result
    async fn apply(&mut self, swap_id: SwapId, trigger: Trigger<'_>, now: u64) -> RelayerResult<()> {
        let Some(tracked) = self.swaps.get_mut(&swap_id) else {
            return Ok(());
        };

        let transition = step(&tracked.order, &tracked.state, trigger);
        if transition.outcome == Outcome::InvalidSecret {
            if let Trigger::Event(event) = trigger {
                warn!(
                    "Discarding {} event for swap {} at {}: secret does not match hashlock",
                    event.kind.name(),
                    swap_id,
                    event.block_ref
                );
                metrics::record_invalid_secret(event.side);
            }
            return Ok(());
        }

        let from = tracked.state.phase;
        tracked.state = transition.state;
        if let Some(action) = transition.action.clone() {
            self.dispatch(swap_id, action);
        }
        self.after_change(swap_id, from, transition.action, now).await
    }

    /// Drop settled in-flight actions, publish transitions, persist and close out
    async fn after_change(
        &mut self,
        swap_id: SwapId,
        from: SwapPhase,
        action: Option<SwapAction>,
        now: u64,
    ) -> RelayerResult<()> {
        self.settle_in_flight(swap_id, now);

        let Some(tracked) = self.swaps.get(&swap_id) else {
            return Ok(());
        };
        let to = tracked.state.phase;
        if to != from {
            info!("Swap {} moved {} -> {}", swap_id, from, to);
            metrics::record_phase_transition(to);
            self.notifier.publish(PhaseTransition {
                swap_id,
                from,
                to,
                action,
                at: Utc::now(),
            });
        }

        let has_in_flight = self.in_flight.keys().any(|(id, _)| *id == swap_id);
        let open = is_open(&tracked.order, &tracked.state, now, has_in_flight);
        let update = OrderUpdate {
            swap_id,
            phase: to,
            revealed_secret: tracked.state.secret,
            open,
        };
        if update != tracked.persisted {
            self.store.update_order(&update).await?;
            if let Some(tracked) = self.swaps.get_mut(&swap_id) {
                tracked.persisted = update;
            }
        }

        if !open {
            self.swaps.remove(&swap_id);
            info!("Swap {} closed in phase {}", swap_id, to);
        }
        metrics::set_tracked_swaps(self.swaps.len());
        Ok(())
    }

    /// Forget in-flight actions the swap no longer needs
    fn settle_in_flight(&mut self, swap_id: SwapId, now: u64) {
        let Some(tracked) = self.swaps.get(&swap_id) else {
            return;
        };
        let outstanding = outstanding_actions(&tracked.order, &tracked.state, now);

        self.in_flight.retain(|(id, key), flight| {
            if *id != swap_id || outstanding.contains(&flight.action) {
                return true;
            }
            info!("{} for swap {} no longer required", key, id);
            metrics::record_action_settled(*key);
            false
        });
    }

    /// Submit an action on a spawned task unless it is already being submitted
    fn dispatch(&mut self, swap_id: SwapId, action: SwapAction) {
        let Some(tracked) = self.swaps.get(&swap_id) else {
            return;
        };
        let key = action.key();
        let flight = self
            .in_flight
            .entry((swap_id, key))
            .or_insert_with(|| InFlight {
                action: action.clone(),
                attempts: 0,
                rejections: 0,
                status: FlightStatus::BackingOff,
            });
        if flight.status == FlightStatus::Submitting {
            debug!("{} for swap {} already being submitted", key, swap_id);
            return;
        }

        flight.action = action.clone();
        flight.attempts += 1;
        flight.status = FlightStatus::Submitting;
        let attempt = flight.attempts;

        let adapter = self.chains.get(action.side()).clone();
        let order = tracked.order.clone();
        let tx = self.input_tx.clone();

        info!("Submitting {} for swap {} (attempt {})", key, swap_id, attempt);
        metrics::record_action_submitted(key);

        tokio::spawn(async move {
            let result = adapter.submit_action(&order, &action).await;
            let report = Input::Submitted {
                swap_id,
                key,
                attempt,
                result,
            };
            if tx.send(report).await.is_err() {
                debug!("Coordinator gone before submission of {} completed", key);
            }
        });
    }

    async fn handle_submitted(
        &mut self,
        swap_id: SwapId,
        key: ActionKey,
        attempt: u32,
        result: Result<TxRef, SubmitError>,
        now: u64,
    ) -> RelayerResult<()> {
        self.store
            .record_submission(&submission_record(swap_id, key, attempt, &result))
            .await?;

        let Some(flight) = self.in_flight.get_mut(&(swap_id, key)) else {
            debug!("Ignoring report for settled {} of swap {}", key, swap_id);
            return Ok(());
        };
        if flight.attempts != attempt {
            debug!("Ignoring stale report for {} of swap {}", key, swap_id);
            return Ok(());
        }

        match result {
            Ok(tx_ref) => {
                info!("{} for swap {} submitted as {}", key, swap_id, tx_ref);
                flight.status = FlightStatus::AwaitingConfirmation(tx_ref);
                self.scheduler.schedule(
                    swap_id,
                    now + self.config.confirmation_timeout_secs,
                    DeadlineKind::Retry(key),
                );
            }
            Err(SubmitError::AlreadySettled) => {
                info!("{} for swap {} already settled on-chain", key, swap_id);
                self.in_flight.remove(&(swap_id, key));
                metrics::record_action_settled(key);
                self.refresh(swap_id, now).await?;
            }
            Err(e) if e.is_transient() => {
                warn!("{} for swap {} failed, will retry: {}", key, swap_id, e);
                metrics::record_action_failed(key, e.label());
                flight.status = FlightStatus::BackingOff;
                let delay = self.backoff.delay_secs(flight.attempts);
                self.scheduler
                    .schedule(swap_id, now + delay, DeadlineKind::Retry(key));
            }
            Err(e) => {
                metrics::record_action_failed(key, e.label());
                flight.rejections += 1;
                if flight.rejections >= self.config.max_rejections {
                    error!(
                        "{} for swap {} rejected {} times, giving up: {}",
                        key, swap_id, flight.rejections, e
                    );
                    self.in_flight.remove(&(swap_id, key));
                    self.apply(swap_id, Trigger::Abandoned { key, now }, now)
                        .await?;
                } else {
                    warn!(
                        "{} for swap {} rejected ({}/{}): {}",
                        key, swap_id, flight.rejections, self.config.max_rejections, e
                    );
                    flight.status = FlightStatus::BackingOff;
                    let delay = self.backoff.delay_secs(flight.attempts);
                    self.scheduler
                        .schedule(swap_id, now + delay, DeadlineKind::Retry(key));
                }
            }
        }
        Ok(())
    }

    async fn handle_deadline(&mut self, deadline: Deadline, now: u64) -> RelayerResult<()> {
        match deadline.kind {
            DeadlineKind::DestTimeout | DeadlineKind::SourceTimeout => {
                debug!("{:?} reached for swap {}", deadline.kind, deadline.swap_id);
                self.apply(deadline.swap_id, Trigger::Tick { now }, now).await
            }
            DeadlineKind::Retry(key) => self.retry(deadline.swap_id, key, now).await,
        }
    }

    /// Resubmit an action whose back-off or confirmation window elapsed
    async fn retry(&mut self, swap_id: SwapId, key: ActionKey, now: u64) -> RelayerResult<()> {
        let Some(flight) = self.in_flight.get(&(swap_id, key)) else {
            return Ok(());
        };
        if flight.status == FlightStatus::Submitting {
            return Ok(());
        }

        let still_required = self
            .swaps
            .get(&swap_id)
            .map(|t| outstanding_actions(&t.order, &t.state, now).contains(&flight.action))
            .unwrap_or(false);
        if !still_required {
            self.in_flight.remove(&(swap_id, key));
            return self.refresh(swap_id, now).await;
        }

        if let FlightStatus::AwaitingConfirmation(tx_ref) = &flight.status {
            warn!(
                "{} for swap {} unconfirmed after {}s ({}), resubmitting",
                key, swap_id, self.config.confirmation_timeout_secs, tx_ref
            );
        }
        let action = flight.action.clone();
        metrics::record_submission_retry(key);
        self.dispatch(swap_id, action);
        Ok(())
    }

    /// Re-evaluate a swap without a trigger
    async fn refresh(&mut self, swap_id: SwapId, now: u64) -> RelayerResult<()> {
        let Some(phase) = self.swaps.get(&swap_id).map(|t| t.state.phase) else {
            return Ok(());
        };
        self.after_change(swap_id, phase, None, now).await
    }
}

/// Whether a swap still needs the coordinator
fn is_open(order: &SwapOrder, state: &SwapState, now: u64, has_in_flight: bool) -> bool {
    if has_in_flight {
        return true;
    }
    match state.phase {
        SwapPhase::Completed => false,
        // A source refund may still be due
        SwapPhase::Refunded | SwapPhase::Expired => {
            now < order.source_timeout || !outstanding_actions(order, state, now).is_empty()
        }
        _ => true,
    }
}

fn submission_record(
    swap_id: SwapId,
    key: ActionKey,
    attempt: u32,
    result: &Result<TxRef, SubmitError>,
) -> SubmissionRecord {
    let (status, tx_ref, detail) = match result {
        Ok(tx_ref) => (SubmissionStatus::Submitted, Some(tx_ref.0.clone()), None),
        Err(SubmitError::AlreadySettled) => (SubmissionStatus::AlreadySettled, None, None),
        Err(e) => (SubmissionStatus::Failed, None, Some(e.to_string())),
    };

    SubmissionRecord {
        id: Uuid::new_v4(),
        swap_id,
        side: key.side,
        kind: key.kind,
        attempt,
        status,
        tx_ref,
        detail,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAdapter, MockChainAdapter};
    use crate::coordination::machine::ActionKind;
    use crate::events::{BlockRef, EventKind};
    use crate::notify::PhaseTransition;
    use crate::store::{MemoryEventStore, MockEventStore};
    use crate::swap::fixtures::{self, T};
    use crate::swap::Secret;

    fn config() -> RelayerConfig {
        RelayerConfig {
            instance_id: "test".to_string(),
            poll_interval_ms: 100,
            tick_interval_ms: 100,
            max_rejections: 2,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            confirmation_timeout_secs: 120,
            health_check_interval_secs: 30,
        }
    }

    struct Harness {
        coordinator: Coordinator,
        store: Arc<MemoryEventStore>,
        transitions: mpsc::UnboundedReceiver<PhaseTransition>,
    }

    fn harness_with_store(
        source: MockChainAdapter,
        dest: MockChainAdapter,
        store: Arc<MemoryEventStore>,
    ) -> Harness {
        let (notifier, transitions) = Notifier::channel();
        let source: Arc<dyn ChainAdapter> = Arc::new(source);
        let dest: Arc<dyn ChainAdapter> = Arc::new(dest);
        let (coordinator, _handle) = Coordinator::new(
            store.clone(),
            ChainPair::new(source, dest),
            config(),
            notifier,
        );
        Harness {
            coordinator,
            store,
            transitions,
        }
    }

    fn harness(source: MockChainAdapter, dest: MockChainAdapter) -> Harness {
        harness_with_store(source, dest, Arc::new(MemoryEventStore::new()))
    }

    fn event(side: ChainSide, kind: EventKind, at: u64, height: u64) -> EscrowEvent {
        EscrowEvent {
            side,
            swap_id: fixtures::order().swap_id,
            kind,
            observed_at: at,
            block_ref: BlockRef::new(height, 0),
        }
    }

    fn batch(events: Vec<EscrowEvent>) -> EventBatch {
        let cursor = events.last().map(|e| BlockRef::end_of(e.block_ref.height));
        EventBatch { events, cursor }
    }

    impl Harness {
        async fn register(&mut self, now: u64) -> SwapPhase {
            self.coordinator
                .handle_register(fixtures::order(), now)
                .await
                .unwrap()
        }

        async fn observe(&mut self, side: ChainSide, events: Vec<EscrowEvent>, now: u64) {
            self.coordinator
                .handle_observed(side, batch(events), now)
                .await
                .unwrap();
        }

        /// Wait for `n` submission reports and process them
        async fn settle_submissions(&mut self, n: usize, now: u64) {
            for _ in 0..n {
                let input = self.coordinator.inputs.recv().await.unwrap();
                assert!(matches!(input, Input::Submitted { .. }));
                self.coordinator.handle_input(input, now).await.unwrap();
            }
        }

        fn phase(&self) -> Option<SwapPhase> {
            self.coordinator
                .swaps
                .get(&fixtures::order().swap_id)
                .map(|t| t.state.phase)
        }

        fn flight(&self, side: ChainSide, kind: ActionKind) -> Option<&InFlight> {
            self.coordinator
                .in_flight
                .get(&(fixtures::order().swap_id, ActionKey { side, kind }))
        }

        fn drain_transitions(&mut self) -> Vec<SwapPhase> {
            let mut phases = Vec::new();
            while let Ok(t) = self.transitions.try_recv() {
                phases.push(t.to);
            }
            phases
        }
    }

    fn reveal_on_source(secret: Secret) -> impl Fn(&SwapOrder, &SwapAction) -> bool {
        move |_, action| {
            *action
                == SwapAction::Reveal {
                    side: ChainSide::Source,
                    secret,
                }
        }
    }

    fn revealed(side: ChainSide, at: u64, height: u64) -> EscrowEvent {
        event(
            side,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            at,
            height,
        )
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .withf(reveal_on_source(fixtures::secret()))
            .times(1)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let dest = MockChainAdapter::new();
        let mut h = harness(source, dest);

        assert_eq!(h.register(T).await, SwapPhase::AwaitingSourceFund);
        h.observe(ChainSide::Dest, vec![event(ChainSide::Dest, EventKind::Funded, T + 10, 1)], T + 10)
            .await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 20, 100)],
            T + 20,
        )
        .await;
        assert_eq!(h.phase(), Some(SwapPhase::Active));

        h.observe(ChainSide::Dest, vec![revealed(ChainSide::Dest, T + 30, 2)], T + 30)
            .await;
        assert_eq!(h.phase(), Some(SwapPhase::SecretRevealed));
        h.settle_submissions(1, T + 31).await;
        assert!(matches!(
            h.flight(ChainSide::Source, ActionKind::Reveal).map(|f| &f.status),
            Some(FlightStatus::AwaitingConfirmation(_))
        ));

        // Withdrawal on the source chain confirms the reveal
        h.observe(
            ChainSide::Source,
            vec![event(
                ChainSide::Source,
                EventKind::Claimed {
                    secret: Some(fixtures::secret()),
                },
                T + 40,
                101,
            )],
            T + 40,
        )
        .await;
        assert!(h.flight(ChainSide::Source, ActionKind::Reveal).is_none());

        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Claimed { secret: None }, T + 50, 3)],
            T + 50,
        )
        .await;
        assert_eq!(h.phase(), None, "completed swaps are closed");

        let stored = h.store.order(&fixtures::order().swap_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SwapPhase::Completed);
        assert_eq!(stored.revealed_secret, Some(fixtures::secret()));
        assert!(h.store.open_orders().await.unwrap().is_empty());
        assert_eq!(
            h.store.cursor(ChainSide::Dest).await.unwrap(),
            Some(BlockRef::end_of(3))
        );
        assert_eq!(
            h.drain_transitions(),
            vec![
                SwapPhase::Active,
                SwapPhase::SecretRevealed,
                SwapPhase::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_dest_timeout_refunds_once() {
        let source = MockChainAdapter::new();
        let mut dest = MockChainAdapter::new();
        dest.expect_submit_action()
            .withf(|_, action| {
                *action
                    == SwapAction::Refund {
                        side: ChainSide::Dest,
                    }
            })
            .times(1)
            .returning(|_, _| Ok(TxRef("refund-dest".to_string())));
        let mut h = harness(source, dest);

        h.register(T).await;
        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Funded, T + 10, 1)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 20, 100)],
            T + 20,
        )
        .await;

        h.coordinator.on_tick(T + 1800).await.unwrap();
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));
        h.settle_submissions(1, T + 1800).await;

        // Ticks before the confirmation window lapses submit nothing new
        h.coordinator.on_tick(T + 1801).await.unwrap();
        h.coordinator.on_tick(T + 1850).await.unwrap();
        assert!(h.coordinator.inputs.try_recv().is_err());

        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Refunded, T + 1900, 9)],
            T + 1900,
        )
        .await;
        assert!(h.flight(ChainSide::Dest, ActionKind::Refund).is_none());
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));

        // Late reveal cannot complete the swap
        h.observe(ChainSide::Dest, vec![revealed(ChainSide::Dest, T + 1950, 10)], T + 1950)
            .await;
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));
    }

    #[tokio::test]
    async fn test_late_reveal_keeps_dest_refund_in_flight() {
        let source = MockChainAdapter::new();
        let mut dest = MockChainAdapter::new();
        dest.expect_submit_action()
            .times(1)
            .returning(|_, _| Ok(TxRef("refund-dest".to_string())));
        let mut h = harness(source, dest);

        h.register(T).await;
        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Funded, T + 10, 1)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 20, 100)],
            T + 20,
        )
        .await;
        h.coordinator.on_tick(T + 1800).await.unwrap();
        h.settle_submissions(1, T + 1800).await;

        h.observe(ChainSide::Dest, vec![revealed(ChainSide::Dest, T + 1850, 2)], T + 1850)
            .await;
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));
        assert!(matches!(
            h.flight(ChainSide::Dest, ActionKind::Refund).map(|f| &f.status),
            Some(FlightStatus::AwaitingConfirmation(_))
        ));
    }

    #[tokio::test]
    async fn test_settled_legs_close_swap_after_source_timeout() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .withf(reveal_on_source(fixtures::secret()))
            .times(1)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.register(T).await;
        h.observe(
            ChainSide::Dest,
            vec![
                event(ChainSide::Dest, EventKind::Funded, T + 10, 1),
                revealed(ChainSide::Dest, T + 30, 2),
            ],
            T + 30,
        )
        .await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 20, 100)],
            T + 30,
        )
        .await;
        h.settle_submissions(1, T + 31).await;

        h.observe(
            ChainSide::Source,
            vec![event(
                ChainSide::Source,
                EventKind::Claimed {
                    secret: Some(fixtures::secret()),
                },
                T + 50,
                101,
            )],
            T + 50,
        )
        .await;
        // The maker never withdrew and the resolver took the dest escrow back
        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Refunded, T + 1900, 3)],
            T + 1900,
        )
        .await;
        assert_eq!(h.phase(), Some(SwapPhase::Expired));

        h.coordinator.on_tick(T + 3600).await.unwrap();
        assert_eq!(h.phase(), None);
        assert!(h.coordinator.in_flight.is_empty());
        assert!(h.store.open_orders().await.unwrap().is_empty());
        let stored = h.store.order(&fixtures::order().swap_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SwapPhase::Expired);
    }

    #[tokio::test]
    async fn test_unconfirmed_action_is_resubmitted() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .times(2)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.register(T).await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Dest,
            vec![
                event(ChainSide::Dest, EventKind::Funded, T + 20, 1),
                revealed(ChainSide::Dest, T + 30, 2),
            ],
            T + 30,
        )
        .await;
        h.settle_submissions(1, T + 30).await;

        h.coordinator.on_tick(T + 149).await.unwrap();
        assert!(h.coordinator.inputs.try_recv().is_err());

        h.coordinator.on_tick(T + 150).await.unwrap();
        h.settle_submissions(1, T + 150).await;
        assert_eq!(
            h.flight(ChainSide::Source, ActionKind::Reveal).map(|f| f.attempts),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_network_errors_back_off_then_succeed() {
        let mut source = MockChainAdapter::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_submit_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(SubmitError::Network("connection reset".to_string())));
        source
            .expect_submit_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.register(T).await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Dest,
            vec![
                event(ChainSide::Dest, EventKind::Funded, T + 20, 1),
                revealed(ChainSide::Dest, T + 30, 2),
            ],
            T + 30,
        )
        .await;
        h.settle_submissions(1, T + 30).await;
        assert_eq!(
            h.flight(ChainSide::Source, ActionKind::Reveal).map(|f| &f.status),
            Some(&FlightStatus::BackingOff)
        );

        // First back-off is one second
        h.coordinator.on_tick(T + 31).await.unwrap();
        h.settle_submissions(1, T + 31).await;
        assert!(matches!(
            h.flight(ChainSide::Source, ActionKind::Reveal).map(|f| &f.status),
            Some(FlightStatus::AwaitingConfirmation(_))
        ));
        assert_eq!(h.phase(), Some(SwapPhase::SecretRevealed));

        let records = h
            .store
            .submissions_for(&fixtures::order().swap_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn test_repeated_rejection_falls_back() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .times(2)
            .returning(|_, _| Err(SubmitError::NotAuthorized("invalid caller".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.register(T).await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Dest,
            vec![
                event(ChainSide::Dest, EventKind::Funded, T + 20, 1),
                revealed(ChainSide::Dest, T + 30, 2),
            ],
            T + 30,
        )
        .await;
        h.settle_submissions(1, T + 30).await;
        assert_eq!(h.phase(), Some(SwapPhase::SecretRevealed));

        h.coordinator.on_tick(T + 40).await.unwrap();
        h.settle_submissions(1, T + 40).await;

        assert!(h.flight(ChainSide::Source, ActionKind::Reveal).is_none());
        assert_eq!(h.phase(), Some(SwapPhase::Expired));
    }

    #[tokio::test]
    async fn test_already_settled_clears_submission() {
        let source = MockChainAdapter::new();
        let mut dest = MockChainAdapter::new();
        dest.expect_submit_action()
            .times(1)
            .returning(|_, _| Err(SubmitError::AlreadySettled));
        let mut h = harness(source, dest);

        h.register(T).await;
        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Funded, T + 10, 1)],
            T + 10,
        )
        .await;
        h.coordinator.on_tick(T + 1800).await.unwrap();
        h.settle_submissions(1, T + 1800).await;

        assert!(h.flight(ChainSide::Dest, ActionKind::Refund).is_none());
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));
    }

    #[tokio::test]
    async fn test_invalid_secret_changes_nothing() {
        let mut h = harness(MockChainAdapter::new(), MockChainAdapter::new());

        h.register(T).await;
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Dest,
            vec![event(ChainSide::Dest, EventKind::Funded, T + 20, 1)],
            T + 20,
        )
        .await;
        h.drain_transitions();

        h.observe(
            ChainSide::Dest,
            vec![event(
                ChainSide::Dest,
                EventKind::SecretRevealed {
                    secret: Secret::from_bytes([9u8; 32]),
                },
                T + 30,
                2,
            )],
            T + 30,
        )
        .await;

        assert_eq!(h.phase(), Some(SwapPhase::Active));
        assert!(h.coordinator.in_flight.is_empty());
        assert!(h.drain_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_batches_are_ignored() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .times(1)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.register(T).await;
        let events = vec![
            event(ChainSide::Dest, EventKind::Funded, T + 10, 1),
            revealed(ChainSide::Dest, T + 30, 2),
        ];
        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 5, 100)],
            T + 5,
        )
        .await;
        h.observe(ChainSide::Dest, events.clone(), T + 30).await;
        let before = h.coordinator.swaps[&fixtures::order().swap_id].state.clone();

        h.observe(ChainSide::Dest, events, T + 35).await;
        assert_eq!(h.coordinator.swaps[&fixtures::order().swap_id].state, before);
        assert_eq!(
            h.store
                .events_for(&fixtures::order().swap_id)
                .await
                .unwrap()
                .len(),
            3
        );
        h.settle_submissions(1, T + 35).await;
    }

    #[tokio::test]
    async fn test_events_before_registration_are_replayed() {
        let mut source = MockChainAdapter::new();
        source
            .expect_submit_action()
            .withf(reveal_on_source(fixtures::secret()))
            .times(1)
            .returning(|_, _| Ok(TxRef("0xreveal".to_string())));
        let mut h = harness(source, MockChainAdapter::new());

        h.observe(
            ChainSide::Source,
            vec![event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
            T + 10,
        )
        .await;
        h.observe(
            ChainSide::Dest,
            vec![
                event(ChainSide::Dest, EventKind::Funded, T + 20, 1),
                revealed(ChainSide::Dest, T + 30, 2),
            ],
            T + 30,
        )
        .await;

        assert_eq!(h.register(T + 40).await, SwapPhase::SecretRevealed);
        h.settle_submissions(1, T + 40).await;
    }

    #[tokio::test]
    async fn test_recovery_resumes_outstanding_refund() {
        let store = Arc::new(MemoryEventStore::new());
        let order = fixtures::order();
        store.put_order(&order).await.unwrap();
        for ev in [
            event(ChainSide::Dest, EventKind::Funded, T + 10, 1),
            event(ChainSide::Source, EventKind::Funded, T + 20, 100),
        ] {
            store.append(&ev).await.unwrap();
        }

        let mut dest = MockChainAdapter::new();
        dest.expect_submit_action()
            .times(1)
            .returning(|_, _| Ok(TxRef("refund-dest".to_string())));
        let mut h = harness_with_store(MockChainAdapter::new(), dest, store);

        assert_eq!(h.coordinator.recover(T + 2000).await.unwrap(), 1);
        assert_eq!(h.phase(), Some(SwapPhase::Refunding));
        h.settle_submissions(1, T + 2000).await;

        let stored = h.store.order(&order.swap_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SwapPhase::Refunding);
        assert_eq!(h.drain_transitions(), vec![SwapPhase::Refunding]);
    }

    #[tokio::test]
    async fn test_register_rejects_inverted_timeouts() {
        let mut h = harness(MockChainAdapter::new(), MockChainAdapter::new());
        let mut order = fixtures::order();
        order.dest_timeout = order.source_timeout;

        let err = h.coordinator.handle_register(order, T).await.unwrap_err();
        assert!(matches!(err, RelayerError::InvalidOrder { .. }));
        assert!(h.store.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_stops_coordinator_and_broadcasts_shutdown() {
        let mut store = MockEventStore::new();
        store
            .expect_append()
            .returning(|_| Err(RelayerError::Store("disk full".to_string())));
        let (notifier, _rx) = Notifier::channel();
        let chains = ChainPair::new(
            Arc::new(MockChainAdapter::new()),
            Arc::new(MockChainAdapter::new()),
        );
        let (coordinator, handle) = Coordinator::new(Arc::new(store), chains, config(), notifier);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        handle
            .observed(
                ChainSide::Dest,
                batch(vec![event(ChainSide::Dest, EventKind::Funded, T + 10, 1)]),
            )
            .await
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.run_until(std::future::pending::<()>(), &shutdown_tx),
        )
        .await
        .expect("coordinator failure must end the run");
        assert!(matches!(result, Err(RelayerError::Store(_))));
        assert!(*shutdown_rx.borrow());
        assert!(matches!(
            handle.register(fixtures::live_order()).await,
            Err(RelayerError::CoordinatorClosed)
        ));
    }

    #[tokio::test]
    async fn test_signal_stops_coordinator_cleanly() {
        let (notifier, _rx) = Notifier::channel();
        let chains = ChainPair::new(
            Arc::new(MockChainAdapter::new()),
            Arc::new(MockChainAdapter::new()),
        );
        let (coordinator, _handle) = Coordinator::new(
            Arc::new(MemoryEventStore::new()),
            chains,
            config(),
            notifier,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio_test::assert_ok!(coordinator.run_until(async {}, &shutdown_tx).await);
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_handle_register_roundtrip() {
        let (notifier, _rx) = Notifier::channel();
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let chains = ChainPair::new(
            Arc::new(MockChainAdapter::new()),
            Arc::new(MockChainAdapter::new()),
        );
        let (coordinator, handle) = Coordinator::new(store, chains, config(), notifier);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(coordinator.run(shutdown_rx));

        let phase = handle.register(fixtures::live_order()).await.unwrap();
        assert_eq!(phase, SwapPhase::AwaitingSourceFund);

        shutdown_tx.send(true).unwrap();
        tokio_test::assert_ok!(task.await.unwrap());
        assert!(matches!(
            handle.register(fixtures::live_order()).await,
            Err(RelayerError::CoordinatorClosed)
        ));
    }
}
