//! Per-swap state machine
//!
//! `step` is a pure function of the order, the current state and one trigger. It
//! never performs I/O; the coordinator feeds it events and deadline ticks and
//! dispatches whatever action it returns.
//!
//! Every action is requested at most once per swap. The state remembers which
//! reveals and refunds were already requested, so a recurring tick or a replayed
//! history cannot emit the same action twice. Retrying an action whose submission
//! failed is the coordinator's job, guided by `outstanding_actions`.

use crate::events::{EscrowEvent, EventKind};
use crate::swap::{ChainSide, Secret, SwapOrder, SwapPhase};

use serde::Serialize;
use std::fmt;

/// Observed facts about one escrow of the pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegState {
    pub created: bool,
    pub funded: bool,
    pub revealed: bool,
    pub claimed: bool,
    pub refunded: bool,
    pub expired: bool,
    pub reveal_requested: bool,
    pub refund_requested: bool,
}

impl LegState {
    /// Funds have left the escrow
    pub fn settled(&self) -> bool {
        self.claimed || self.refunded
    }
}

/// Derived per-swap aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapState {
    pub phase: SwapPhase,
    pub source: LegState,
    pub dest: LegState,
    /// First valid secret observed
    pub secret: Option<Secret>,
    /// Chain the accepted secret was first observed on
    pub revealed_first_on: Option<ChainSide>,
    /// The swap fell back to refunding; the dest escrow is owed a refund
    /// even if a secret shows up later
    pub dest_refund_committed: bool,
}

impl Default for SwapState {
    fn default() -> Self {
        Self {
            phase: SwapPhase::AwaitingSourceFund,
            source: LegState::default(),
            dest: LegState::default(),
            secret: None,
            revealed_first_on: None,
            dest_refund_committed: false,
        }
    }
}

impl SwapState {
    pub fn leg(&self, side: ChainSide) -> &LegState {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Dest => &self.dest,
        }
    }

    pub fn leg_mut(&mut self, side: ChainSide) -> &mut LegState {
        match side {
            ChainSide::Source => &mut self.source,
            ChainSide::Dest => &mut self.dest,
        }
    }
}

/// Kind of on-chain action the relayer submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Reveal,
    Refund,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Reveal => "reveal",
            ActionKind::Refund => "refund",
        }
    }
}

/// Identifies an action within one swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ActionKey {
    pub side: ChainSide,
    pub kind: ActionKind,
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind.as_str(), self.side)
    }
}

/// Action to submit through a chain adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SwapAction {
    /// Withdraw the escrow on `side` with the secret, publishing it there
    Reveal { side: ChainSide, secret: Secret },
    /// Cancel the escrow on `side`, returning funds to its maker
    Refund { side: ChainSide },
}

impl SwapAction {
    pub fn side(&self) -> ChainSide {
        match self {
            SwapAction::Reveal { side, .. } | SwapAction::Refund { side } => *side,
        }
    }

    pub fn key(&self) -> ActionKey {
        match self {
            SwapAction::Reveal { side, .. } => ActionKey {
                side: *side,
                kind: ActionKind::Reveal,
            },
            SwapAction::Refund { side } => ActionKey {
                side: *side,
                kind: ActionKind::Refund,
            },
        }
    }
}

/// Input to the state machine
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    Event(&'a EscrowEvent),
    /// Wall-clock tick used to evaluate deadlines
    Tick { now: u64 },
    /// A submission exhausted its retry budget
    Abandoned { key: ActionKey, now: u64 },
}

/// How a trigger affected the swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The phase changed
    Transitioned,
    /// Facts were recorded without a phase change
    Recorded,
    /// Nothing to do
    Unchanged,
    /// A secret did not match the hashlock; state left untouched
    InvalidSecret,
}

/// Result of one state machine step
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SwapState,
    pub action: Option<SwapAction>,
    pub outcome: Outcome,
}

/// Advance `current` by one trigger
pub fn step(order: &SwapOrder, current: &SwapState, trigger: Trigger<'_>) -> Transition {
    let mut next = current.clone();

    let (outcome, now) = match trigger {
        Trigger::Event(event) => {
            let outcome = apply_event(order, &mut next, event);
            if outcome == Outcome::InvalidSecret {
                return Transition {
                    state: current.clone(),
                    action: None,
                    outcome,
                };
            }
            (outcome, event.observed_at)
        }
        Trigger::Tick { now } => (apply_deadlines(order, &mut next, now), now),
        Trigger::Abandoned { key, now } => (apply_abandoned(&mut next, key), now),
    };
    close_settled(order, &mut next, now);

    let action = next_action(order, &mut next, now);
    let outcome = if next.phase != current.phase {
        Outcome::Transitioned
    } else if outcome == Outcome::Unchanged && next != *current {
        Outcome::Recorded
    } else {
        outcome
    };

    Transition {
        state: next,
        action,
        outcome,
    }
}

/// Rebuild a swap's state from its event history
///
/// Each event is preceded by a tick at its arrival time, matching how the
/// coordinator applies events live.
pub fn replay(order: &SwapOrder, events: &[EscrowEvent], now: u64) -> SwapState {
    let mut state = SwapState::default();
    for event in events {
        state = step(order, &state, Trigger::Tick { now: event.observed_at }).state;
        state = step(order, &state, Trigger::Event(event)).state;
    }
    step(order, &state, Trigger::Tick { now }).state
}

/// Actions the swap still needs, regardless of whether they were requested
pub fn outstanding_actions(order: &SwapOrder, state: &SwapState, now: u64) -> Vec<SwapAction> {
    let mut actions = Vec::new();

    if state.phase == SwapPhase::SecretRevealed {
        if let Some(secret) = state.secret {
            for side in [ChainSide::Source, ChainSide::Dest] {
                let leg = state.leg(side);
                if leg.funded && !leg.revealed && !leg.settled() {
                    actions.push(SwapAction::Reveal { side, secret });
                }
            }
        }
    }

    let dest_owed =
        state.dest_refund_committed || (state.secret.is_none() && !state.dest.revealed);
    let dest_refundable = matches!(
        state.phase,
        SwapPhase::Refunding | SwapPhase::Refunded | SwapPhase::Expired
    ) && dest_owed
        && now >= order.dest_timeout
        && state.dest.funded
        && !state.dest.settled();
    if dest_refundable {
        actions.push(SwapAction::Refund {
            side: ChainSide::Dest,
        });
    }

    let source_refundable = matches!(state.phase, SwapPhase::Refunded | SwapPhase::Expired)
        && now >= order.source_timeout
        && state.source.funded
        && !state.source.revealed
        && !state.source.settled();
    if source_refundable {
        actions.push(SwapAction::Refund {
            side: ChainSide::Source,
        });
    }

    actions
}

fn apply_event(order: &SwapOrder, state: &mut SwapState, event: &EscrowEvent) -> Outcome {
    let side = event.side;
    match &event.kind {
        EventKind::Created => {
            state.leg_mut(side).created = true;
            Outcome::Unchanged
        }
        EventKind::Funded => {
            let leg = state.leg_mut(side);
            leg.created = true;
            leg.funded = true;
            advance_funding(state);
            Outcome::Unchanged
        }
        EventKind::SecretRevealed { secret } => accept_secret(order, state, side, secret),
        EventKind::Claimed { secret } => {
            if let Some(secret) = secret {
                if accept_secret(order, state, side, secret) == Outcome::InvalidSecret {
                    return Outcome::InvalidSecret;
                }
            }
            let leg = state.leg_mut(side);
            leg.claimed = true;
            // A withdrawal publishes the secret on that chain
            leg.revealed = true;
            if state.phase == SwapPhase::SecretRevealed && state.source.claimed && state.dest.claimed
            {
                state.phase = SwapPhase::Completed;
            }
            Outcome::Unchanged
        }
        EventKind::Refunded => {
            state.leg_mut(side).refunded = true;
            if state.phase == SwapPhase::Refunding {
                match side {
                    ChainSide::Source => state.phase = SwapPhase::Refunded,
                    ChainSide::Dest => {
                        apply_deadlines(order, state, event.observed_at);
                    }
                }
            }
            Outcome::Unchanged
        }
        EventKind::Expired => {
            state.leg_mut(side).expired = true;
            Outcome::Unchanged
        }
    }
}

fn accept_secret(
    order: &SwapOrder,
    state: &mut SwapState,
    side: ChainSide,
    secret: &Secret,
) -> Outcome {
    if !order.hashlock.matches(secret) {
        return Outcome::InvalidSecret;
    }

    state.leg_mut(side).revealed = true;
    if state.secret.is_some() {
        // Later reveals confirm the first one
        return Outcome::Unchanged;
    }

    state.secret = Some(*secret);
    state.revealed_first_on = Some(side);
    if state.phase == SwapPhase::Active {
        state.phase = SwapPhase::SecretRevealed;
    }
    Outcome::Unchanged
}

fn advance_funding(state: &mut SwapState) {
    if !matches!(
        state.phase,
        SwapPhase::AwaitingSourceFund | SwapPhase::AwaitingDestFund
    ) {
        return;
    }

    state.phase = match (state.source.funded, state.dest.funded) {
        (true, true) if state.secret.is_some() => SwapPhase::SecretRevealed,
        (true, true) => SwapPhase::Active,
        (true, false) => SwapPhase::AwaitingDestFund,
        (false, _) => SwapPhase::AwaitingSourceFund,
    };
}

fn apply_deadlines(order: &SwapOrder, state: &mut SwapState, now: u64) -> Outcome {
    if state.phase.is_terminal() {
        return Outcome::Unchanged;
    }

    let before = state.phase;
    if state.phase.is_pre_settlement() && state.secret.is_none() && now >= order.dest_timeout {
        state.phase = SwapPhase::Refunding;
        state.dest_refund_committed = true;
    }

    if now >= order.source_timeout && !state.source.settled() && !state.source.revealed {
        let dest_done = state.dest.refunded || !state.dest.funded;
        state.phase = if state.phase == SwapPhase::Refunding && dest_done {
            SwapPhase::Refunded
        } else {
            SwapPhase::Expired
        };
    }

    if state.phase == before {
        Outcome::Unchanged
    } else {
        Outcome::Transitioned
    }
}

fn apply_abandoned(state: &mut SwapState, key: ActionKey) -> Outcome {
    if state.phase.is_terminal() {
        return Outcome::Unchanged;
    }

    state.phase = if state.secret.is_none() && state.phase.is_pre_settlement() {
        state.dest_refund_committed = true;
        SwapPhase::Refunding
    } else {
        SwapPhase::Expired
    };
    tracing::debug!("Falling back to {} after abandoning {}", state.phase, key);
    Outcome::Transitioned
}

/// Close a swap whose escrows have nothing left to move
///
/// Applies once both funded legs are settled, or once the source timeout has
/// passed and every funded leg is settled. Only a swap that revealed and saw
/// both legs claimed counts as completed.
fn close_settled(order: &SwapOrder, state: &mut SwapState, now: u64) {
    if state.phase.is_terminal() {
        return;
    }

    let done = |leg: &LegState| leg.settled() || !leg.funded;
    let both_settled = state.source.settled() && state.dest.settled();
    let past_source_timeout =
        now >= order.source_timeout && done(&state.source) && done(&state.dest);
    if !both_settled && !past_source_timeout {
        return;
    }

    state.phase = match state.phase {
        SwapPhase::SecretRevealed if state.source.claimed && state.dest.claimed => {
            SwapPhase::Completed
        }
        SwapPhase::Refunding if !state.source.claimed => SwapPhase::Refunded,
        _ => SwapPhase::Expired,
    };
}

/// Pick the first outstanding action not yet requested and mark it requested
fn next_action(order: &SwapOrder, state: &mut SwapState, now: u64) -> Option<SwapAction> {
    let action = outstanding_actions(order, state, now)
        .into_iter()
        .find(|action| {
            let leg = state.leg(action.side());
            match action.key().kind {
                ActionKind::Reveal => !leg.reveal_requested,
                ActionKind::Refund => !leg.refund_requested,
            }
        })?;

    let leg = state.leg_mut(action.side());
    match action.key().kind {
        ActionKind::Reveal => leg.reveal_requested = true,
        ActionKind::Refund => leg.refund_requested = true,
    }
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BlockRef;
    use crate::swap::fixtures::{self, T};
    use crate::swap::{Secret, SwapId};

    fn event(side: ChainSide, kind: EventKind, at: u64, height: u64) -> EscrowEvent {
        EscrowEvent {
            side,
            swap_id: fixtures::order().swap_id,
            kind,
            observed_at: at,
            block_ref: BlockRef::new(height, 0),
        }
    }

    /// Feed triggers the way the coordinator does and collect emitted actions
    fn drive(order: &SwapOrder, events: &[EscrowEvent]) -> (SwapState, Vec<SwapAction>) {
        let mut state = SwapState::default();
        let mut actions = Vec::new();
        for ev in events {
            for trigger in [Trigger::Tick { now: ev.observed_at }, Trigger::Event(ev)] {
                let t = step(order, &state, trigger);
                actions.extend(t.action);
                state = t.state;
            }
        }
        (state, actions)
    }

    fn tick(order: &SwapOrder, state: &SwapState, now: u64) -> Transition {
        step(order, state, Trigger::Tick { now })
    }

    fn funded_both() -> Vec<EscrowEvent> {
        vec![
            event(ChainSide::Dest, EventKind::Funded, T + 10, 1),
            event(ChainSide::Source, EventKind::Funded, T + 20, 100),
        ]
    }

    #[test]
    fn test_funding_order_does_not_matter() {
        let order = fixtures::order();

        let (state, actions) = drive(&order, &funded_both());
        assert_eq!(state.phase, SwapPhase::Active);
        assert!(actions.is_empty());

        let (state, _) = drive(
            &order,
            &[event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
        );
        assert_eq!(state.phase, SwapPhase::AwaitingDestFund);
    }

    #[test]
    fn test_happy_path_reveals_on_source_once() {
        let order = fixtures::order();
        let mut events = funded_both();
        events.push(event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 30,
            2,
        ));

        let (state, actions) = drive(&order, &events);
        assert_eq!(state.phase, SwapPhase::SecretRevealed);
        assert_eq!(
            actions,
            vec![SwapAction::Reveal {
                side: ChainSide::Source,
                secret: fixtures::secret()
            }]
        );

        // Recurring ticks never repeat the reveal
        let again = tick(&order, &state, T + 40);
        assert!(again.action.is_none());

        events.push(event(
            ChainSide::Source,
            EventKind::Claimed {
                secret: Some(fixtures::secret()),
            },
            T + 50,
            101,
        ));
        events.push(event(
            ChainSide::Dest,
            EventKind::Claimed { secret: None },
            T + 60,
            3,
        ));
        let (state, actions) = drive(&order, &events);
        assert_eq!(state.phase, SwapPhase::Completed);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_dest_timeout_refunds_dest_exactly_once() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());

        let t = tick(&order, &state, T + 1800);
        assert_eq!(t.state.phase, SwapPhase::Refunding);
        assert_eq!(t.outcome, Outcome::Transitioned);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Dest
            })
        );

        let again = tick(&order, &t.state, T + 1801);
        assert_eq!(again.state.phase, SwapPhase::Refunding);
        assert!(again.action.is_none());
    }

    #[test]
    fn test_refunding_never_completes() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());
        let mut state = tick(&order, &state, T + 1800).state;

        // A late reveal and claims are recorded but cannot complete the swap
        for ev in [
            event(
                ChainSide::Dest,
                EventKind::SecretRevealed {
                    secret: fixtures::secret(),
                },
                T + 1900,
                5,
            ),
            event(ChainSide::Source, EventKind::Claimed { secret: None }, T + 1950, 105),
            event(ChainSide::Dest, EventKind::Claimed { secret: None }, T + 1960, 6),
        ] {
            state = step(&order, &state, Trigger::Event(&ev)).state;
            assert_ne!(state.phase, SwapPhase::Completed);
        }
    }

    #[test]
    fn test_refund_source_after_dest_refund_and_source_timeout() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());
        let state = tick(&order, &state, T + 1800).state;

        let refunded = event(ChainSide::Dest, EventKind::Refunded, T + 1850, 7);
        let t = step(&order, &state, Trigger::Event(&refunded));
        assert_eq!(t.state.phase, SwapPhase::Refunding);
        assert!(t.action.is_none());

        let t = tick(&order, &t.state, T + 3600);
        assert_eq!(t.state.phase, SwapPhase::Refunded);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Source
            })
        );
    }

    #[test]
    fn test_dest_refund_observed_after_source_timeout() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());
        let state = tick(&order, &state, T + 1800).state;

        let refunded = event(ChainSide::Dest, EventKind::Refunded, T + 3700, 7);
        let t = step(&order, &state, Trigger::Event(&refunded));
        assert_eq!(t.state.phase, SwapPhase::Refunded);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Source
            })
        );
    }

    #[test]
    fn test_source_timeout_with_unfunded_dest_refunds_source() {
        let order = fixtures::order();
        let (state, _) = drive(
            &order,
            &[event(ChainSide::Source, EventKind::Funded, T + 10, 100)],
        );

        // Both deadlines passed at once; the dest leg was never funded
        let t = tick(&order, &state, T + 3600);
        assert_eq!(t.state.phase, SwapPhase::Refunded);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Source
            })
        );
    }

    #[test]
    fn test_unclaimed_reveal_expires_at_source_timeout() {
        let order = fixtures::order();
        let mut events = funded_both();
        events.push(event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 30,
            2,
        ));
        let (state, _) = drive(&order, &events);

        let t = tick(&order, &state, T + 1800);
        assert_eq!(t.state.phase, SwapPhase::SecretRevealed);

        let t = tick(&order, &t.state, T + 3600);
        assert_eq!(t.state.phase, SwapPhase::Expired);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Source
            })
        );
    }

    #[test]
    fn test_invalid_secret_is_discarded() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());

        let bogus = event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: Secret::from_bytes([9u8; 32]),
            },
            T + 30,
            2,
        );
        let t = step(&order, &state, Trigger::Event(&bogus));
        assert_eq!(t.outcome, Outcome::InvalidSecret);
        assert_eq!(t.state, state);
        assert!(t.action.is_none());

        let bogus_claim = event(
            ChainSide::Source,
            EventKind::Claimed {
                secret: Some(Secret::from_bytes([9u8; 32])),
            },
            T + 31,
            102,
        );
        let t = step(&order, &state, Trigger::Event(&bogus_claim));
        assert_eq!(t.outcome, Outcome::InvalidSecret);
        assert_eq!(t.state, state);
    }

    #[test]
    fn test_second_reveal_is_confirmation() {
        let order = fixtures::order();
        let mut events = funded_both();
        let reveal = |side, at, height| {
            event(
                side,
                EventKind::SecretRevealed {
                    secret: fixtures::secret(),
                },
                at,
                height,
            )
        };
        events.push(reveal(ChainSide::Dest, T + 30, 2));
        events.push(reveal(ChainSide::Source, T + 31, 102));

        let (state, actions) = drive(&order, &events);
        assert_eq!(state.phase, SwapPhase::SecretRevealed);
        assert_eq!(state.revealed_first_on, Some(ChainSide::Dest));
        assert!(state.source.revealed && state.dest.revealed);
        assert_eq!(actions.len(), 1);
        assert!(outstanding_actions(&order, &state, T + 32).is_empty());
    }

    #[test]
    fn test_reveal_before_funding_completes_later() {
        let order = fixtures::order();
        let events = vec![
            event(ChainSide::Source, EventKind::Funded, T + 10, 100),
            event(
                ChainSide::Source,
                EventKind::SecretRevealed {
                    secret: fixtures::secret(),
                },
                T + 15,
                101,
            ),
            event(ChainSide::Dest, EventKind::Funded, T + 20, 1),
        ];

        let (state, actions) = drive(&order, &events);
        assert_eq!(state.phase, SwapPhase::SecretRevealed);
        assert_eq!(
            actions,
            vec![SwapAction::Reveal {
                side: ChainSide::Dest,
                secret: fixtures::secret()
            }]
        );
    }

    #[test]
    fn test_abandoned_submission_falls_back() {
        let order = fixtures::order();
        let (active, _) = drive(&order, &funded_both());
        let key = ActionKey {
            side: ChainSide::Source,
            kind: ActionKind::Reveal,
        };

        let t = step(&order, &active, Trigger::Abandoned { key, now: T + 40 });
        assert_eq!(t.state.phase, SwapPhase::Refunding);
        // Dest refund waits for its timelock
        assert!(t.action.is_none());
        let t = tick(&order, &t.state, T + 1800);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Dest
            })
        );

        let t = step(&order, &t.state, Trigger::Abandoned { key, now: T + 1900 });
        assert_eq!(t.state.phase, SwapPhase::Expired);
        assert!(t.action.is_none());
    }

    #[test]
    fn test_replay_matches_live_processing() {
        let order = fixtures::order();
        let mut events = funded_both();
        events.push(event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 30,
            2,
        ));
        events.push(event(
            ChainSide::Source,
            EventKind::Claimed {
                secret: Some(fixtures::secret()),
            },
            T + 50,
            101,
        ));

        let (live, _) = drive(&order, &events);
        let live = tick(&order, &live, T + 60).state;
        assert_eq!(replay(&order, &events, T + 60), live);
        assert_eq!(replay(&order, &events, T + 60), replay(&order, &events, T + 60));
    }

    #[test]
    fn test_replay_of_late_reveal_stays_refunding() {
        let order = fixtures::order();
        let mut events = funded_both();
        events.push(event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 1850,
            2,
        ));

        let state = replay(&order, &events, T + 1900);
        assert_eq!(state.phase, SwapPhase::Refunding);
        assert_eq!(
            outstanding_actions(&order, &state, T + 1900),
            vec![SwapAction::Refund {
                side: ChainSide::Dest
            }]
        );

        let state = replay(&order, &events, T + 3600);
        assert_eq!(state.phase, SwapPhase::Expired);
        assert_eq!(
            outstanding_actions(&order, &state, T + 3600),
            vec![
                SwapAction::Refund {
                    side: ChainSide::Dest
                },
                SwapAction::Refund {
                    side: ChainSide::Source
                },
            ]
        );
    }

    #[test]
    fn test_late_reveal_keeps_requested_dest_refund() {
        let order = fixtures::order();
        let (state, _) = drive(&order, &funded_both());
        let t = tick(&order, &state, T + 1800);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Dest
            })
        );

        let reveal = event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 1850,
            2,
        );
        let t = step(&order, &t.state, Trigger::Event(&reveal));
        assert_eq!(t.state.phase, SwapPhase::Refunding);
        assert_eq!(t.state.secret, Some(fixtures::secret()));
        assert!(t.action.is_none());
        assert!(outstanding_actions(&order, &t.state, T + 1850).contains(&SwapAction::Refund {
            side: ChainSide::Dest
        }));

        let t = tick(&order, &t.state, T + 3600);
        assert_eq!(
            t.action,
            Some(SwapAction::Refund {
                side: ChainSide::Source
            })
        );
        assert!(outstanding_actions(&order, &t.state, T + 3600).contains(&SwapAction::Refund {
            side: ChainSide::Dest
        }));

        let refunded = event(ChainSide::Dest, EventKind::Refunded, T + 3650, 8);
        let t = step(&order, &t.state, Trigger::Event(&refunded));
        assert_eq!(
            outstanding_actions(&order, &t.state, T + 3650),
            vec![SwapAction::Refund {
                side: ChainSide::Source
            }]
        );
    }

    #[test]
    fn test_claimed_source_and_refunded_dest_close_the_swap() {
        let order = fixtures::order();
        let mut events = funded_both();
        events.push(event(
            ChainSide::Dest,
            EventKind::SecretRevealed {
                secret: fixtures::secret(),
            },
            T + 30,
            2,
        ));
        events.push(event(
            ChainSide::Source,
            EventKind::Claimed {
                secret: Some(fixtures::secret()),
            },
            T + 50,
            101,
        ));
        events.push(event(ChainSide::Dest, EventKind::Refunded, T + 1900, 3));

        let (state, _) = drive(&order, &events);
        assert_eq!(state.phase, SwapPhase::Expired);

        let t = tick(&order, &state, T + 100_000);
        assert!(t.state.phase.is_terminal());
        assert_eq!(t.outcome, Outcome::Unchanged);
        assert!(t.action.is_none());
        assert!(outstanding_actions(&order, &t.state, T + 100_000).is_empty());
        assert_eq!(replay(&order, &events, T + 100_000).phase, SwapPhase::Expired);
    }

    #[test]
    fn test_terminal_states_ignore_ticks() {
        let order = SwapOrder {
            swap_id: SwapId::from_bytes([2u8; 32]),
            ..fixtures::order()
        };
        let state = SwapState {
            phase: SwapPhase::Completed,
            ..SwapState::default()
        };
        let t = tick(&order, &state, T + 10_000);
        assert_eq!(t.outcome, Outcome::Unchanged);
        assert_eq!(t.state.phase, SwapPhase::Completed);
    }
}
