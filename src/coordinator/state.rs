//! Build state machine.
//!
//! ```text
//!            trigger                      trigger
//!   Idle ------------> BuildInFlight ---------------> BuildInFlightWithPendingFollowup
//!    ^                  |        ^                        |        (trigger: no-op)
//!    +---- response ----+        +------- response -------+
//!                                     (sends follow-up)
//! ```
//!
//! Pure: no I/O. The coordinator applies the returned [`Transition`].

/// Where the coordinator is in the build cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Idle,
    BuildInFlight,
    /// Changes arrived during the current build; rebuild once it finishes
    BuildInFlightWithPendingFollowup,
}

/// Result of feeding one input into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: BuildState,
    /// Whether a request must be written to the channel now
    pub send_request: bool,
}

impl BuildState {
    /// A rebuild was requested.
    pub fn on_trigger(self) -> Transition {
        match self {
            Self::Idle => Transition {
                next: Self::BuildInFlight,
                send_request: true,
            },
            Self::BuildInFlight | Self::BuildInFlightWithPendingFollowup => Transition {
                next: Self::BuildInFlightWithPendingFollowup,
                send_request: false,
            },
        }
    }

    /// The in-flight build answered.
    ///
    /// A response in `Idle` cannot happen on a well-behaved channel; it is
    /// ignored.
    pub fn on_response(self) -> Transition {
        match self {
            Self::Idle | Self::BuildInFlight => Transition {
                next: Self::Idle,
                send_request: false,
            },
            Self::BuildInFlightWithPendingFollowup => Transition {
                next: Self::BuildInFlight,
                send_request: true,
            },
        }
    }

    pub fn in_flight(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BuildInFlight => "build in flight",
            Self::BuildInFlightWithPendingFollowup => "build in flight, follow-up pending",
        }
    }
}
