//! Service state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! Caller (main.rs) executes the I/O implied by each action.
//!
//! Setup mirrors a host integration: log in, look up the customer, then
//! fetch once before polling starts. The first fetch may see an expired
//! session while a fresh login propagates on the portal side, so it is
//! retried with a growing delay.

use std::time::Duration;

use crate::error::Error as ServiceError;

/// First-fetch attempts before setup gives up
pub const MAX_WARMUP_ATTEMPTS: u32 = 3;

/// Graceful shutdown budget for the HTTP listener
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum ServiceState {
    /// Loading config, building clients
    Initializing,
    /// Initial login and customer lookup
    Authenticating,
    /// First data fetch, `attempt` is 1-based
    WarmingUp { attempt: u32, customer_id: String },
    /// Waiting before the next first-fetch attempt
    Backoff { attempt: u32, customer_id: String },
    /// Polling on the configured interval
    Running { customer_id: String },
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Error payloads are only read through `Debug` when events are logged.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ServiceEvent {
    ConfigLoaded,
    Authenticated { customer_id: String },
    AuthFailed(ServiceError),
    FetchSucceeded,
    FetchFailed {
        error: ServiceError,
        session_expired: bool,
    },
    RetryTimer,
    ShutdownSignal,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ServiceAction {
    Authenticate,
    FetchInitial,
    ScheduleRetry { delay: Duration },
    StartPolling,
    Shutdown { exit_code: i32 },
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ServiceState, event: ServiceEvent) -> (ServiceState, ServiceAction) {
    match (state, event) {
        // --- Initializing ---
        (ServiceState::Initializing, ServiceEvent::ConfigLoaded) => {
            (ServiceState::Authenticating, ServiceAction::Authenticate)
        }

        // --- Authenticating ---
        (ServiceState::Authenticating, ServiceEvent::Authenticated { customer_id }) => (
            ServiceState::WarmingUp {
                attempt: 1,
                customer_id,
            },
            ServiceAction::FetchInitial,
        ),

        (ServiceState::Authenticating, ServiceEvent::AuthFailed(_)) => (
            ServiceState::Stopped { exit_code: 1 },
            ServiceAction::Shutdown { exit_code: 1 },
        ),

        // --- WarmingUp ---
        (ServiceState::WarmingUp { customer_id, .. }, ServiceEvent::FetchSucceeded) => (
            ServiceState::Running { customer_id },
            ServiceAction::StartPolling,
        ),

        (
            ServiceState::WarmingUp {
                attempt,
                customer_id,
            },
            ServiceEvent::FetchFailed {
                session_expired: true,
                ..
            },
        ) if attempt < MAX_WARMUP_ATTEMPTS => (
            ServiceState::Backoff {
                attempt,
                customer_id,
            },
            ServiceAction::ScheduleRetry {
                delay: Duration::from_secs(u64::from(attempt)),
            },
        ),

        (ServiceState::WarmingUp { .. }, ServiceEvent::FetchFailed { .. }) => (
            ServiceState::Stopped { exit_code: 1 },
            ServiceAction::Shutdown { exit_code: 1 },
        ),

        // --- Backoff ---
        (
            ServiceState::Backoff {
                attempt,
                customer_id,
            },
            ServiceEvent::RetryTimer,
        ) => (
            ServiceState::WarmingUp {
                attempt: attempt + 1,
                customer_id,
            },
            ServiceAction::FetchInitial,
        ),

        // --- Any state + shutdown = stop ---
        (_, ServiceEvent::ShutdownSignal) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, ServiceAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warming(attempt: u32) -> ServiceState {
        ServiceState::WarmingUp {
            attempt,
            customer_id: "1234567".into(),
        }
    }

    fn expired() -> ServiceEvent {
        ServiceEvent::FetchFailed {
            error: ServiceError::UpdateFailed("token expired".into()),
            session_expired: true,
        }
    }

    #[test]
    fn init_to_authenticating_on_config_loaded() {
        let (state, action) = handle_event(ServiceState::Initializing, ServiceEvent::ConfigLoaded);
        assert!(matches!(state, ServiceState::Authenticating));
        assert_eq!(action, ServiceAction::Authenticate);
    }

    #[test]
    fn authenticated_starts_first_fetch() {
        let (state, action) = handle_event(
            ServiceState::Authenticating,
            ServiceEvent::Authenticated {
                customer_id: "1234567".into(),
            },
        );
        assert!(matches!(state, ServiceState::WarmingUp { attempt: 1, .. }));
        assert_eq!(action, ServiceAction::FetchInitial);
    }

    #[test]
    fn auth_failure_stops_service() {
        let (state, action) = handle_event(
            ServiceState::Authenticating,
            ServiceEvent::AuthFailed(ServiceError::InvalidAuth("rejected".into())),
        );
        assert!(matches!(state, ServiceState::Stopped { exit_code: 1 }));
        assert_eq!(action, ServiceAction::Shutdown { exit_code: 1 });
    }

    #[test]
    fn first_fetch_success_starts_polling() {
        let (state, action) = handle_event(warming(2), ServiceEvent::FetchSucceeded);
        match state {
            ServiceState::Running { customer_id } => assert_eq!(customer_id, "1234567"),
            other => panic!("expected Running, got {other:?}"),
        }
        assert_eq!(action, ServiceAction::StartPolling);
    }

    #[test]
    fn expired_session_backoff_grows_per_attempt() {
        for attempt in 1..MAX_WARMUP_ATTEMPTS {
            let (state, action) = handle_event(warming(attempt), expired());
            assert!(matches!(state, ServiceState::Backoff { attempt: a, .. } if a == attempt));
            assert_eq!(
                action,
                ServiceAction::ScheduleRetry {
                    delay: Duration::from_secs(u64::from(attempt))
                }
            );
        }
    }

    #[test]
    fn retry_timer_returns_to_warmup() {
        let (state, action) = handle_event(
            ServiceState::Backoff {
                attempt: 1,
                customer_id: "1234567".into(),
            },
            ServiceEvent::RetryTimer,
        );
        assert!(matches!(state, ServiceState::WarmingUp { attempt: 2, .. }));
        assert_eq!(action, ServiceAction::FetchInitial);
    }

    #[test]
    fn last_attempt_failure_stops_service() {
        let (state, action) = handle_event(warming(MAX_WARMUP_ATTEMPTS), expired());
        assert!(matches!(state, ServiceState::Stopped { exit_code: 1 }));
        assert_eq!(action, ServiceAction::Shutdown { exit_code: 1 });
    }

    #[test]
    fn other_fetch_failures_are_not_retried() {
        let (state, action) = handle_event(
            warming(1),
            ServiceEvent::FetchFailed {
                error: ServiceError::UpdateFailed("no metering points".into()),
                session_expired: false,
            },
        );
        assert!(matches!(state, ServiceState::Stopped { exit_code: 1 }));
        assert_eq!(action, ServiceAction::Shutdown { exit_code: 1 });
    }

    #[test]
    fn any_state_shutdown_signal_stops() {
        let (state, action) = handle_event(warming(1), ServiceEvent::ShutdownSignal);
        assert!(matches!(state, ServiceState::Stopped { exit_code: 0 }));
        assert_eq!(action, ServiceAction::Shutdown { exit_code: 0 });
    }

    #[test]
    fn unhandled_event_keeps_state() {
        let (state, action) = handle_event(
            ServiceState::Running {
                customer_id: "1".into(),
            },
            ServiceEvent::RetryTimer,
        );
        assert!(matches!(state, ServiceState::Running { .. }));
        assert_eq!(action, ServiceAction::None);
    }
}
