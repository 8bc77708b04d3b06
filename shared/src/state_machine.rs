//! Link and Flight State Machines
//!
//! The link machine walks a session from discovery to a usable, handshaken
//! link. The flight state is never driven by commands; it only follows what
//! the drone reports in its flying-state notifications.

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Discovering,
    Connecting,
    Handshaking,
    Ready,
    Disconnecting,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Discovering => "discovering",
            LinkState::Connecting => "connecting",
            LinkState::Handshaking => "handshaking",
            LinkState::Ready => "ready",
            LinkState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Events that drive the link machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// `connect()` called, discovery stream opened
    ScanStarted,
    /// A peripheral matched the session identity (or was handed over directly)
    PeripheralMatched,
    /// Transport connect succeeded
    TransportConnected,
    /// Handshake frame written and acknowledged, settle delay elapsed
    HandshakeAcknowledged,
    /// Disconnect explicitly requested
    DisconnectRequested,
    /// Transport finished tearing the link down
    DisconnectComplete,
    /// Transport reported link loss
    LinkLost,
    /// A connect or setup step failed
    ConnectFailed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(LinkState),
    /// Transition was invalid from current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// Forward-only connection state machine
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: LinkState,
}

impl LinkStateMachine {
    /// Create a new machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match next_state(self.current_state, event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }
}

/// Get the next state for a given event, if the transition is valid
pub fn next_state(from: LinkState, event: LinkEvent) -> Option<LinkState> {
    use LinkEvent::*;
    use LinkState::*;

    match (from, event) {
        (Disconnected, ScanStarted) => Some(Discovering),
        (Discovering, PeripheralMatched) => Some(Connecting),
        // Peripheral handed over without scanning (swarm enrollment)
        (Disconnected, PeripheralMatched) => Some(Connecting),
        (Connecting, TransportConnected) => Some(Handshaking),
        (Handshaking, HandshakeAcknowledged) => Some(Ready),

        // Teardown is reachable from every live state
        (Discovering | Connecting | Handshaking | Ready, DisconnectRequested) => Some(Disconnecting),
        (Disconnecting, DisconnectComplete) => Some(Disconnected),
        (Discovering | Connecting | Handshaking | Ready | Disconnecting, LinkLost) => {
            Some(Disconnected)
        }
        (Discovering | Connecting | Handshaking, ConnectFailed) => Some(Disconnected),

        _ => None,
    }
}

/// Flight state as reported by the drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlightState {
    #[default]
    Landed,
    TakingOff,
    Hovering,
    Landing,
    EmergencyStopped,
}

impl FlightState {
    /// Map a raw flying-state code; unknown codes yield `None`
    pub fn from_status_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FlightState::Landed),
            1 => Some(FlightState::TakingOff),
            // 3 is "flying", a transitional state the client treats as hovering
            2 | 3 => Some(FlightState::Hovering),
            4 => Some(FlightState::Landing),
            5 => Some(FlightState::EmergencyStopped),
            _ => None,
        }
    }

    /// Raw code the firmware reports for this state
    pub fn status_code(&self) -> u8 {
        match self {
            FlightState::Landed => 0,
            FlightState::TakingOff => 1,
            FlightState::Hovering => 2,
            FlightState::Landing => 4,
            FlightState::EmergencyStopped => 5,
        }
    }

    /// Airborne or on its way up
    pub fn is_airborne(&self) -> bool {
        matches!(self, FlightState::TakingOff | FlightState::Hovering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = LinkStateMachine::new();
        assert_eq!(fsm.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_normal_connect_flow() {
        let mut fsm = LinkStateMachine::new();

        let result = fsm.process_event(LinkEvent::ScanStarted);
        assert_eq!(result, TransitionResult::Success(LinkState::Discovering));

        let result = fsm.process_event(LinkEvent::PeripheralMatched);
        assert_eq!(result, TransitionResult::Success(LinkState::Connecting));

        let result = fsm.process_event(LinkEvent::TransportConnected);
        assert_eq!(result, TransitionResult::Success(LinkState::Handshaking));

        let result = fsm.process_event(LinkEvent::HandshakeAcknowledged);
        assert_eq!(result, TransitionResult::Success(LinkState::Ready));

        let result = fsm.process_event(LinkEvent::DisconnectRequested);
        assert_eq!(result, TransitionResult::Success(LinkState::Disconnecting));

        let result = fsm.process_event(LinkEvent::DisconnectComplete);
        assert_eq!(result, TransitionResult::Success(LinkState::Disconnected));
    }

    #[test]
    fn test_direct_peripheral_handover() {
        let mut fsm = LinkStateMachine::new();
        let result = fsm.process_event(LinkEvent::PeripheralMatched);
        assert_eq!(result, TransitionResult::Success(LinkState::Connecting));
    }

    #[test]
    fn test_link_lost_from_ready() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::PeripheralMatched);
        fsm.process_event(LinkEvent::TransportConnected);
        fsm.process_event(LinkEvent::HandshakeAcknowledged);

        let result = fsm.process_event(LinkEvent::LinkLost);
        assert_eq!(result, TransitionResult::Success(LinkState::Disconnected));
    }

    #[test]
    fn test_cannot_skip_handshake() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::PeripheralMatched);

        let result = fsm.process_event(LinkEvent::HandshakeAcknowledged);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), LinkState::Connecting);
    }

    #[test]
    fn test_disconnected_ignores_teardown() {
        let mut fsm = LinkStateMachine::new();
        let result = fsm.process_event(LinkEvent::DisconnectRequested);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_flight_status_mapping() {
        let expected = [
            (0, FlightState::Landed),
            (1, FlightState::TakingOff),
            (2, FlightState::Hovering),
            (3, FlightState::Hovering),
            (4, FlightState::Landing),
            (5, FlightState::EmergencyStopped),
        ];
        for (code, state) in expected {
            assert_eq!(FlightState::from_status_code(code), Some(state));
        }
        assert_eq!(FlightState::from_status_code(6), None);
        assert_eq!(FlightState::from_status_code(0xff), None);
    }

    #[test]
    fn test_status_code_roundtrip() {
        for state in [
            FlightState::Landed,
            FlightState::TakingOff,
            FlightState::Hovering,
            FlightState::Landing,
            FlightState::EmergencyStopped,
        ] {
            assert_eq!(FlightState::from_status_code(state.status_code()), Some(state));
        }
    }
}
