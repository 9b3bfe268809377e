use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Circuit breaker guarding language-model calls.
pub type LlmCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Consecutive model failures that open the circuit.
pub const LLM_FAILURE_THRESHOLD: u32 = 5;

/// Creates a circuit breaker for language-model calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transport failures trigger OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: The model keeps failing (quota, rate limit, outage); leads are
///   scored with the neutral default without a network call.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_llm_circuit_breaker() -> LlmCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy =
        failure_policy::consecutive_failures(LLM_FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
