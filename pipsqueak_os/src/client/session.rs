// Connection lifecycle for one request at a time.
//
// Transport events are only recorded as facts while draining; every phase
// change is committed by `poll`, in this order each iteration:
//   1. a complete response ends the session
//   2. a disconnect settles the exchange (errors, clock sync, requeue)
//   3. a fresh connection transmits the staged request
//   4. telemetry is topped up from the status event queue
//   5. the next request is staged (time sync first when required)
//   6. an idle session connects, at most once a second

use std::net::SocketAddr;

use pipsqueak_protocol::codes::{network, request as request_error};
use pipsqueak_protocol::{ErrorRecord, ProtocolKind, Request, RequestSet, Response};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, warn};

use super::RequestQueue;
use crate::net::{Transport, TransportEvent};
use crate::state::DeviceState;

pub const MIN_REQUEST_INTERVAL_MS: u64 = 1_000;
/// Round trips slower than this (seconds) are not trusted to set the clock.
pub const MAX_SYNC_ELAPSED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Transmitting,
    Disconnecting,
}

/// What the transport told us since the last settle.
#[derive(Debug, Default)]
struct Facts {
    disconnected: bool,
    error: Option<i8>,
    timeout: bool,
}

pub struct Session<T: Transport> {
    transport: T,
    server: SocketAddr,
    requests: RequestSet,
    queue: RequestQueue,
    rng: StdRng,
    phase: Phase,
    active: Option<ProtocolKind>,
    facts: Facts,
    last_attempt: Option<u64>,
    sync_required: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, server: SocketAddr, requests: RequestSet) -> Self {
        Self {
            transport,
            server,
            requests,
            queue: RequestQueue::new(),
            rng: StdRng::from_os_rng(),
            phase: Phase::Idle,
            active: None,
            facts: Facts::default(),
            last_attempt: None,
            // the board boots at the epoch
            sync_required: true,
        }
    }

    pub fn enqueue(&mut self, kind: ProtocolKind) -> bool {
        self.queue.push(kind, self.active)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn active(&self) -> Option<ProtocolKind> {
        self.active
    }

    #[cfg(test)]
    pub fn is_sync_required(&self) -> bool {
        self.sync_required
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[cfg(test)]
    pub fn requests(&self) -> &RequestSet {
        &self.requests
    }

    pub fn poll(&mut self, state: &mut DeviceState) {
        self.drain_events();

        if self.phase == Phase::Transmitting && self.active_response().is_some_and(Response::is_complete) {
            self.end_session();
        }
        if self.facts.disconnected {
            self.finish(state);
        }
        if self.phase == Phase::Connected {
            self.transmit(state);
        }
        self.top_up_telemetry(state);
        if self.active.is_none() {
            self.stage();
        }

        let now = state.millis();
        let rested = self
            .last_attempt
            .is_none_or(|at| now.saturating_sub(at) >= MIN_REQUEST_INTERVAL_MS);
        if self.phase == Phase::Idle && self.active.is_some() && rested {
            self.connect(now);
        }
    }

    fn active_response(&self) -> Option<&Response> {
        self.active.map(|kind| self.requests.get(kind).response())
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected => {
                    if self.phase == Phase::Connecting {
                        self.phase = Phase::Connected;
                    }
                }
                TransportEvent::Data(bytes) => {
                    if let Some(kind) = self.active {
                        self.requests.get_mut(kind).response_mut().receive_bytes(&bytes);
                    }
                }
                TransportEvent::Error(code) => self.facts.error = Some(code),
                TransportEvent::Timeout => self.facts.timeout = true,
                TransportEvent::Disconnected => self.facts.disconnected = true,
            }
        }
    }

    fn end_session(&mut self) {
        debug!(event = "session_closing", from = ?self.phase);
        self.phase = Phase::Disconnecting;
        self.transport.close();
    }

    fn connect(&mut self, now: u64) {
        let Some(kind) = self.active else {
            return;
        };
        self.last_attempt = Some(now);
        self.facts = Facts::default();
        self.phase = Phase::Connecting;

        if !self.transport.link_up() {
            debug!(event = "session_no_link", protocol = %kind);
            self.requests
                .get_mut(kind)
                .response_mut()
                .add_error(ErrorRecord::pipsqueak(network::WIFI_CONNECTION));
            // nothing was opened, so there is nothing to wait for
            self.phase = Phase::Disconnecting;
            self.facts.disconnected = true;
            return;
        }
        match self.transport.connect(self.server) {
            Ok(()) => debug!(event = "session_connecting", protocol = %kind, server = %self.server),
            Err(e) => {
                warn!(event = "session_connect_failed", protocol = %kind, error = %e);
                self.facts.disconnected = true;
            }
        }
    }

    fn transmit(&mut self, state: &DeviceState) {
        let Some(kind) = self.active else {
            self.end_session();
            return;
        };
        let challenge = self.rng.next_u32();
        let request = self.requests.get_mut(kind);

        let failure = if !request.ready(state.now(), challenge) {
            request.response_mut().reset();
            Some(request_error::NOT_POPULATED)
        } else if !self.transport.can_send() {
            Some(network::CLIENT_STATE)
        } else if self.transport.space() < request.size() {
            Some(network::BUFFER_FULL)
        } else {
            match self.transport.write(request.as_bytes()) {
                Ok(n) if n == request.size() => None,
                Ok(_) | Err(_) => Some(network::CLIENT_STATE),
            }
        };

        match failure {
            None => {
                debug!(event = "session_transmitting", protocol = %kind, size = request.size());
                self.phase = Phase::Transmitting;
            }
            Some(code) => {
                // nothing reached the server, so there is no response to settle
                if request.is_in_flight() {
                    request.failed();
                }
                request.response_mut().add_error(ErrorRecord::pipsqueak(code));
                warn!(event = "session_transmit_failed", protocol = %kind, code);
                self.end_session();
            }
        }
    }

    /// Folds every fault into the active response, then settles it.
    fn finish(&mut self, state: &mut DeviceState) {
        let facts = std::mem::take(&mut self.facts);
        let phase = self.phase;
        self.phase = Phase::Idle;
        let Some(kind) = self.active.take() else {
            return;
        };

        let now = state.now();
        let request = self.requests.get_mut(kind);
        let elapsed = now.saturating_sub(request.timestamp());
        let response = request.response_mut();

        if facts.timeout {
            response.add_error(ErrorRecord::pipsqueak(network::TIMEOUT));
        }
        if let Some(code) = facts.error {
            response.add_error(ErrorRecord::tcp(code));
        }
        match phase {
            Phase::Transmitting => response.add_error(ErrorRecord::pipsqueak(network::BROKEN_PIPE)),
            Phase::Connected => response.add_error(ErrorRecord::pipsqueak(network::CONNECTION_LOST)),
            Phase::Connecting => {
                response.add_error(ErrorRecord::pipsqueak(network::CONNECTION_FAILED));
                self.transport.close();
            }
            Phase::Disconnecting | Phase::Idle => {}
        }
        if response.is_in_use() {
            response.ready(elapsed);
        }

        state.record_errors(response.errors());
        let ok = !response.has_errors();

        if ok && response.elapsed() <= MAX_SYNC_ELAPSED {
            state.set_clock(response.timestamp());
            state.set_clock_synchronized(true);
            self.sync_required = false;
        } else if kind == ProtocolKind::Time || response.has_clock_skew() {
            self.sync_required = true;
            state.set_clock_synchronized(false);
        }

        if ok {
            if let Some(setpoint) = response.setpoint().filter(|s| !s.is_nan()) {
                state.set_remote_temperature_setpoint(setpoint);
            }
        }
        state.record_request_outcome(ok);

        info!(
            event = "session_end",
            protocol = %kind,
            ok,
            errors = response.error_count(),
            elapsed = response.elapsed(),
        );

        // a failed time request is retried through the sync flag instead
        if !ok && kind != ProtocolKind::Time {
            request.failed();
            self.queue.push(kind, None);
        } else {
            request.reset();
        }
    }

    fn top_up_telemetry(&mut self, state: &mut DeviceState) {
        let telemetry = &mut self.requests.telemetry;
        while telemetry.can_accept() && state.has_status_events() {
            let Some(record) = state.dequeue_status_event() else {
                break;
            };
            telemetry.add_record(&record);
        }
        if telemetry.is_populated() && self.active != Some(ProtocolKind::Telemetry) {
            self.queue.push(ProtocolKind::Telemetry, self.active);
        }
    }

    fn stage(&mut self) {
        if self.sync_required {
            self.active = Some(ProtocolKind::Time);
            return;
        }
        while let Some(kind) = self.queue.pop() {
            if self.requests.get(kind).is_populated() {
                self.active = Some(kind);
                return;
            }
            debug!(event = "request_skipped", protocol = %kind, "nothing to send");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Arc;

    use bytes::Bytes;
    use pipsqueak_protocol::codes::{device, status, tcp};
    use pipsqueak_protocol::response::encode_response;
    use pipsqueak_protocol::{HmacEngine, StatusEvent};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::tests::SECRET;
    use crate::net::mock::MockTransport;
    use crate::state::tests::{new_state, operating_state};

    const SERVER: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9001));
    const SERVER_TIME: u32 = 1_700_000_000;

    fn engine() -> Arc<HmacEngine> {
        Arc::new(HmacEngine::new(SECRET).unwrap())
    }

    fn new_session() -> Session<MockTransport> {
        Session::new(MockTransport::default(), SERVER, RequestSet::new(127, engine()))
    }

    fn challenge_of(frame: &[u8]) -> u32 {
        u32::from_le_bytes(frame[10..14].try_into().unwrap())
    }

    /// Answers the last written request the way the server would.
    fn respond(session: &mut Session<MockTransport>, kind: ProtocolKind, ts: u32, setpoint: Option<f32>, flags: u8) {
        let challenge = challenge_of(session.transport().written.last().unwrap());
        let bytes = encode_response(&engine(), kind, ts, setpoint, flags, challenge);
        session.transport_mut().push(TransportEvent::Data(Bytes::copy_from_slice(&bytes)));
    }

    /// Connect and transmit whatever is staged; the session ends up Transmitting.
    fn open(session: &mut Session<MockTransport>, state: &mut DeviceState) {
        session.poll(state);
        assert_eq!(session.phase(), Phase::Connecting);
        session.transport_mut().push(TransportEvent::Connected);
        session.poll(state);
        assert_eq!(session.phase(), Phase::Transmitting);
    }

    fn sync(session: &mut Session<MockTransport>, state: &mut DeviceState, clock: &ManualClock) {
        open(session, state);
        let now = state.now();
        respond(session, ProtocolKind::Time, now.max(SERVER_TIME), None, 0);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(state);
        assert!(state.is_clock_synchronized());
        assert!(!session.is_sync_required());
        clock.advance(MIN_REQUEST_INTERVAL_MS);
    }

    /// Every error that left the session, whether still queued or batched.
    fn recorded(session: &Session<MockTransport>, state: &DeviceState) -> Vec<ErrorRecord> {
        session
            .requests()
            .telemetry
            .events()
            .chain(state.peek_status_events())
            .filter_map(|ev| match ev {
                StatusEvent::Error { error, .. } => Some(error),
                _ => None,
            })
            .filter(|e| !(device::CLOCK_SYNC..=device::WIFI_CONNECTION).contains(&e.code))
            .collect()
    }

    #[test]
    fn time_exchange_sets_the_clock() {
        let (mut state, _clock) = new_state();
        let mut session = new_session();

        session.poll(&mut state);
        assert_eq!(session.active(), Some(ProtocolKind::Time));
        assert_eq!(session.transport().connects, vec![SERVER]);

        session.transport_mut().push(TransportEvent::Connected);
        session.poll(&mut state);
        let frame = session.transport().written[0].clone();
        assert_eq!(frame.len(), 64);
        assert_eq!(frame[0], ProtocolKind::Time.id());

        respond(&mut session, ProtocolKind::Time, SERVER_TIME, None, 0);
        session.poll(&mut state);
        assert_eq!(session.phase(), Phase::Disconnecting);
        assert_eq!(session.transport().closed, 1);

        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);
        assert_eq!(state.now(), SERVER_TIME);
        assert!(state.is_clock_synchronized());
        assert!(state.is_server_connection_healthy());
        assert!(!session.requests().time.is_in_flight());
        assert!(recorded(&session, &state).is_empty());

        // the sync edge queued the setpoint; telemetry is next but rate limited
        assert_eq!(session.active(), Some(ProtocolKind::Telemetry));
        assert_eq!(session.transport().connects.len(), 1);
    }

    #[test]
    fn slow_time_round_trip_is_not_trusted() {
        let (mut state, clock) = new_state();
        let mut session = new_session();

        open(&mut session, &mut state);
        clock.advance((MAX_SYNC_ELAPSED as u64 + 1) * 1_000);
        let before = state.now();
        respond(&mut session, ProtocolKind::Time, SERVER_TIME, None, 0);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        assert_eq!(state.now(), before);
        assert!(!state.is_clock_synchronized());
        assert!(session.is_sync_required());
        assert!(recorded(&session, &state).is_empty());
        assert_eq!(session.active(), Some(ProtocolKind::Time));
    }

    #[test]
    fn one_second_round_trip_still_syncs() {
        let (mut state, clock) = new_state();
        let mut session = new_session();

        open(&mut session, &mut state);
        clock.advance(MAX_SYNC_ELAPSED as u64 * 1_000);
        respond(&mut session, ProtocolKind::Time, SERVER_TIME, None, 0);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        assert_eq!(state.now(), SERVER_TIME);
        assert!(!session.is_sync_required());
    }

    #[test]
    fn no_link_records_only_the_wifi_error() {
        let (mut state, _clock) = new_state();
        let mut session = new_session();
        session.transport_mut().link = false;

        session.poll(&mut state);
        session.poll(&mut state);
        assert!(session.transport().connects.is_empty());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(recorded(&session, &state), vec![ErrorRecord::pipsqueak(network::WIFI_CONNECTION)]);
        assert!(session.is_sync_required());
        assert_eq!(session.active(), Some(ProtocolKind::Time));
    }

    #[test]
    fn refused_connection_and_rate_limit() {
        let (mut state, clock) = new_state();
        let mut session = new_session();

        session.poll(&mut state);
        session.transport_mut().push(TransportEvent::Error(tcp::RESET));
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);
        assert_eq!(
            recorded(&session, &state),
            vec![ErrorRecord::tcp(tcp::RESET), ErrorRecord::pipsqueak(network::CONNECTION_FAILED)]
        );
        assert_eq!(session.transport().closed, 1);
        assert!(!state.is_clock_synchronized());

        clock.advance(500);
        session.poll(&mut state);
        assert_eq!(session.transport().connects.len(), 1);
        clock.advance(500);
        session.poll(&mut state);
        assert_eq!(session.transport().connects.len(), 2);
        assert_eq!(session.phase(), Phase::Connecting);
    }

    #[test]
    fn connect_error_counts_as_failed_connection() {
        let (mut state, _clock) = new_state();
        let mut session = new_session();
        session.transport_mut().fail_connect = true;

        session.poll(&mut state);
        session.poll(&mut state);
        assert_eq!(recorded(&session, &state), vec![ErrorRecord::pipsqueak(network::CONNECTION_FAILED)]);
    }

    #[test]
    fn dropped_exchange_is_requeued() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        assert!(session.enqueue(ProtocolKind::Setpoint));
        open(&mut session, &mut state);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        let errors = recorded(&session, &state);
        assert!(errors.contains(&ErrorRecord::pipsqueak(network::BROKEN_PIPE)), "{errors:?}");
        let setpoint = &session.requests().setpoint;
        assert!(setpoint.is_populated());
        assert!(!setpoint.is_in_flight());
        // requeued behind nothing, so it is staged again straight away
        assert_eq!(session.active(), Some(ProtocolKind::Setpoint));
    }

    #[test]
    fn setpoint_response_updates_the_device() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        session.enqueue(ProtocolKind::Setpoint);
        open(&mut session, &mut state);
        respond(&mut session, ProtocolKind::Setpoint, state.now(), Some(18.5), 0);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        assert_eq!(state.config().temperature_setpoint(), 18.5);
        assert!(recorded(&session, &state).is_empty());
        assert!(session.requests().telemetry.events().any(|ev| matches!(
            ev,
            StatusEvent::TemperatureSetpoint { setpoint, .. } if setpoint == 18.5
        )));
        assert_eq!(session.active(), Some(ProtocolKind::Telemetry));
    }

    #[test]
    fn clock_skew_forces_resync() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        session.enqueue(ProtocolKind::Setpoint);
        open(&mut session, &mut state);
        respond(&mut session, ProtocolKind::Setpoint, state.now(), Some(18.5), status::CLOCK_SYNC_AHEAD);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        assert!(session.is_sync_required());
        assert!(!state.is_clock_synchronized());
        // the setpoint of a rejected response is not trusted
        assert_eq!(state.config().temperature_setpoint(), 20.0);
        assert_eq!(session.active(), Some(ProtocolKind::Time));
        assert!(session.enqueue(ProtocolKind::ReportReboot));
        assert!(!session.enqueue(ProtocolKind::Setpoint));
    }

    #[test]
    fn forged_response_is_rejected() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        session.enqueue(ProtocolKind::Setpoint);
        open(&mut session, &mut state);
        let challenge = challenge_of(session.transport().written.last().unwrap());
        let forged = HmacEngine::new(&[7u8; 32]).unwrap();
        let bytes = encode_response(&forged, ProtocolKind::Setpoint, state.now(), Some(30.0), 0, challenge);
        session.transport_mut().push(TransportEvent::Data(Bytes::copy_from_slice(&bytes)));
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);

        assert_eq!(
            recorded(&session, &state),
            vec![ErrorRecord::pipsqueak(pipsqueak_protocol::codes::response::AUTHENTICATION)]
        );
        assert_eq!(state.config().temperature_setpoint(), 20.0);
    }

    #[test]
    fn full_send_buffer_fails_without_writing() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);
        let written = session.transport().written.len();

        session.enqueue(ProtocolKind::Setpoint);
        session.transport_mut().space = 10;
        session.poll(&mut state);
        session.transport_mut().push(TransportEvent::Connected);
        session.poll(&mut state);
        assert_eq!(session.phase(), Phase::Disconnecting);
        assert_eq!(session.transport().written.len(), written);

        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);
        assert_eq!(recorded(&session, &state), vec![ErrorRecord::pipsqueak(network::BUFFER_FULL)]);
        assert_eq!(session.active(), Some(ProtocolKind::Setpoint));
    }

    #[test]
    fn lost_connection_before_transmit() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        session.enqueue(ProtocolKind::Setpoint);
        session.transport_mut().can_send = false;
        session.poll(&mut state);
        session.transport_mut().push(TransportEvent::Connected);
        session.poll(&mut state);
        session.transport_mut().push(TransportEvent::Timeout);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);
        assert_eq!(
            recorded(&session, &state),
            vec![ErrorRecord::pipsqueak(network::CLIENT_STATE), ErrorRecord::pipsqueak(network::TIMEOUT)]
        );
    }

    #[test]
    fn telemetry_drains_the_event_queue() {
        let (mut state, clock) = operating_state(20.0);
        let mut session = new_session();
        sync(&mut session, &mut state, &clock);

        // the first reading is already held, so start one step away
        for i in 1..=40 {
            state.set_remote_temperature(20.0 + i as f32);
        }
        session.poll(&mut state);
        assert_eq!(session.requests().telemetry.event_count(), 32);
        assert_eq!(state.status_event_depth(), 8);
        assert_eq!(session.active(), Some(ProtocolKind::Telemetry));

        open_staged(&mut session, &mut state);
        // locked while in flight
        session.poll(&mut state);
        assert_eq!(state.status_event_depth(), 8);

        respond(&mut session, ProtocolKind::Telemetry, state.now(), Some(f32::NAN), 0);
        session.transport_mut().push(TransportEvent::Disconnected);
        session.poll(&mut state);
        // the rest goes out next
        assert_eq!(session.requests().telemetry.event_count(), 8);
        assert_eq!(state.status_event_depth(), 0);
        assert_eq!(state.config().temperature_setpoint(), 20.0);
    }

    /// Like `open`, for a request staged by an earlier poll.
    fn open_staged(session: &mut Session<MockTransport>, state: &mut DeviceState) {
        session.transport_mut().push(TransportEvent::Connected);
        session.poll(state);
        assert_eq!(session.phase(), Phase::Transmitting);
    }
}
