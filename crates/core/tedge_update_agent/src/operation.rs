//! The retriable operation engine shared by the three topic modules.
//!
//! Each of enrollment, agent-info reporting and update-request handling is
//! "one more state machine with a backoff timer", so instead of giving each
//! topic module its own copy-pasted retry loop they all share one skeleton
//! here: [`OperationContext`] holds the bookkeeping, [`Operation`] is the
//! handful of things a topic module needs to plug in, and [`tick`] drives
//! both. This plays the role the distilled design called a function-pointer
//! table for; Rust expresses "shared skeleton, per-operation behavior" as a
//! trait object rather than a struct of fn pointers.

use clock::Timestamp;
use std::time::Duration;

use crate::config::RetryParamsConfig;
use crate::mqtt::channel::MqttChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    InProgress,
    Completed,
    Expired,
    Failure,
}

/// Which backoff law applies to a retriable failure.
///
/// `ClientTransient` and `ServiceTransient` both retry, but a service
/// telling you to slow down (quota exceeded, broker overloaded) backs off
/// more aggressively than a client-local hiccup (a channel not connected
/// yet). `NonRecoverable` skips retry altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    Default,
    ClientTransient,
    ServiceTransient,
    NonRecoverable,
}

/// What a call to [`Operation::do_work`] accomplished this tick.
pub enum DoWorkOutcome {
    /// Nothing to do yet (still waiting on a response, or backed off).
    Pending,
    /// The operation finished successfully.
    Success,
    /// The operation failed; caller decides whether/how to retry.
    Retry(RetryCategory),
    /// The operation failed in a way that must not be retried.
    Fatal,
}

/// The fields every retriable operation needs, independent of what it's
/// actually doing on the wire.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub state: OperationState,
    pub attempt_count: u32,
    pub next_execution_time: Timestamp,
    pub expiration_time: Timestamp,
    pub retry: RetryParamsConfig,
    pub correlation_id: String,
}

impl OperationContext {
    pub fn idle(now: Timestamp, retry: RetryParamsConfig) -> Self {
        OperationContext {
            state: OperationState::Idle,
            attempt_count: 0,
            next_execution_time: now,
            expiration_time: now,
            retry,
            correlation_id: String::new(),
        }
    }

    pub fn start(&mut self, now: Timestamp, overall_timeout: Duration, correlation_id: String) {
        self.state = OperationState::InProgress;
        self.attempt_count = 0;
        self.next_execution_time = now;
        self.expiration_time = now + seconds(overall_timeout);
        self.correlation_id = correlation_id;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, OperationState::Idle)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, OperationState::InProgress)
    }

    fn schedule_retry(&mut self, now: Timestamp, category: RetryCategory) {
        self.attempt_count += 1;
        let delay = compute_next_attempt_delay(self.attempt_count, category, &self.retry);
        self.next_execution_time = now + seconds(delay);
    }
}

pub fn seconds(d: Duration) -> time::Duration {
    time::Duration::seconds_f64(d.as_secs_f64())
}

/// Trait implemented by each of the three topic-module state machines.
#[async_trait::async_trait]
pub trait Operation {
    fn ctx(&self) -> &OperationContext;
    fn ctx_mut(&mut self) -> &mut OperationContext;

    /// Drives one attempt: send a request, check for a response, whatever
    /// this operation currently needs to do.
    async fn do_work(&mut self, now: Timestamp, channel: &MqttChannel) -> DoWorkOutcome;

    /// Called once when the operation is abandoned: exceeded its overall
    /// expiration, or hit a non-recoverable failure.
    fn on_abandoned(&mut self, _now: Timestamp) {}
}

/// Geometric backoff with jitter: `initial_delay * 2^(attempt - 1)`,
/// capped at `max_delay`, perturbed by up to `max_jitter_percent`.
///
/// `ServiceTransient` failures get one extra doubling over
/// `ClientTransient`/`Default` to back off harder from a server asking for
/// relief, matching the "service transient backs off more aggressively"
/// rule from the design notes.
pub fn compute_next_attempt_delay(
    attempt_count: u32,
    category: RetryCategory,
    params: &RetryParamsConfig,
) -> Duration {
    let exponent = match category {
        RetryCategory::ServiceTransient => attempt_count.saturating_add(1),
        _ => attempt_count,
    };
    let base_ms = params.initial_delay_ms.saturating_mul(1u64 << exponent.min(20));
    let max_ms = params.max_delay_secs.saturating_mul(1_000);
    let capped_ms = base_ms.min(max_ms).max(params.initial_delay_ms);

    let jitter_span = (capped_ms * params.max_jitter_percent as u64) / 100;
    let jitter = if jitter_span == 0 {
        0
    } else {
        fastrand::u64(0..=jitter_span)
    };

    Duration::from_millis(capped_ms + jitter)
}

/// Drives one operation through one tick: expiration check, backoff wait,
/// then `do_work` if it's time.
pub async fn tick(op: &mut dyn Operation, now: Timestamp, channel: &MqttChannel) {
    let state = op.ctx().state;
    match state {
        OperationState::Idle | OperationState::Completed | OperationState::Failure => return,
        OperationState::Expired => return,
        OperationState::InProgress => {}
    }

    if now >= op.ctx().expiration_time {
        op.ctx_mut().state = OperationState::Expired;
        op.on_abandoned(now);
        return;
    }

    if now < op.ctx().next_execution_time {
        return;
    }

    match op.do_work(now, channel).await {
        DoWorkOutcome::Pending => {}
        DoWorkOutcome::Success => {
            op.ctx_mut().state = OperationState::Completed;
        }
        DoWorkOutcome::Retry(category) => {
            let retry = op.ctx().retry.clone();
            if op.ctx().attempt_count >= retry.max_retries {
                op.ctx_mut().state = OperationState::Failure;
                op.on_abandoned(now);
            } else {
                op.ctx_mut().schedule_retry(now, category);
            }
        }
        DoWorkOutcome::Fatal => {
            op.ctx_mut().state = OperationState::Failure;
            op.on_abandoned(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RetryParamsConfig {
        RetryParamsConfig {
            initial_delay_ms: 1_000,
            max_delay_secs: 60,
            max_jitter_percent: 0,
            max_retries: 10,
        }
    }

    #[test]
    fn backoff_doubles_each_attempt_until_capped() {
        let p = params();
        let d1 = compute_next_attempt_delay(1, RetryCategory::Default, &p);
        let d2 = compute_next_attempt_delay(2, RetryCategory::Default, &p);
        let d3 = compute_next_attempt_delay(3, RetryCategory::Default, &p);
        assert!(d2 > d1);
        assert!(d3 > d2);
        assert!(d3 <= Duration::from_secs(60));
    }

    #[test]
    fn service_transient_backs_off_harder_than_default() {
        let p = params();
        let default_delay = compute_next_attempt_delay(2, RetryCategory::Default, &p);
        let service_delay = compute_next_attempt_delay(2, RetryCategory::ServiceTransient, &p);
        assert!(service_delay >= default_delay);
    }

    #[test]
    fn delay_never_exceeds_max_delay_secs() {
        let p = params();
        for attempt in 1..30 {
            let d = compute_next_attempt_delay(attempt, RetryCategory::ServiceTransient, &p);
            assert!(d <= Duration::from_secs(p.max_delay_secs));
        }
    }
}
