//! Discovery-idle tracking
//!
//! While a client runs service discovery the link manager is told the
//! connection is busy. Each discovery PDU re-arms a timer; when it expires
//! without further discovery traffic the connection is reported idle again.
use super::interface::DeviceManager;
use super::types::ConnectionId;
use crate::error::TimerError;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Busy,
    Idle,
}

#[derive(Debug)]
pub struct DiscoveryIdleTracker {
    /// Seconds; 0 disables tracking
    timeout: u16,
    state: IdleState,
    timer_armed: bool,
    /// Set on disconnect; the tracker never touches the link again
    closed: bool,
}

impl DiscoveryIdleTracker {
    pub fn new(timeout: u16) -> Self {
        Self {
            timeout,
            state: IdleState::Idle,
            timer_armed: false,
            closed: false,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout != 0 && !self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A discovery PDU was handled: mark busy and restart the timer
    pub fn on_discovery_pdu<D: DeviceManager + ?Sized>(
        &mut self,
        device_manager: &D,
        conn: ConnectionId,
    ) -> Result<(), TimerError> {
        if !self.is_enabled() {
            return Ok(());
        }

        if self.state == IdleState::Idle {
            debug!("(ATT) {} discovery busy", conn);
            device_manager.set_idle(conn, true);
            self.state = IdleState::Busy;
        }

        if self.timer_armed {
            device_manager.stop_timer(conn);
            self.timer_armed = false;
        }

        device_manager.start_timer(conn, self.timeout)?;
        self.timer_armed = true;
        Ok(())
    }

    /// The idle timer expired
    pub fn on_timeout<D: DeviceManager + ?Sized>(
        &mut self,
        device_manager: &D,
        conn: ConnectionId,
    ) {
        if self.closed {
            return;
        }
        self.timer_armed = false;

        if self.state == IdleState::Busy {
            debug!("(ATT) {} discovery idle", conn);
            device_manager.set_idle(conn, false);
            self.state = IdleState::Idle;
        }
    }

    pub fn on_disconnect<D: DeviceManager + ?Sized>(
        &mut self,
        device_manager: &D,
        conn: ConnectionId,
    ) {
        if self.timer_armed {
            device_manager.stop_timer(conn);
            self.timer_armed = false;
        }
        self.state = IdleState::Idle;
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        SetIdle(bool),
        Start(u16),
        Stop,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        fail_start: bool,
    }

    impl DeviceManager for Recorder {
        fn set_idle(&self, _conn: ConnectionId, busy: bool) {
            self.events.lock().unwrap().push(Event::SetIdle(busy));
        }

        fn start_timer(&self, conn: ConnectionId, seconds: u16) -> Result<(), TimerError> {
            if self.fail_start {
                return Err(TimerError::Unavailable(conn));
            }
            self.events.lock().unwrap().push(Event::Start(seconds));
            Ok(())
        }

        fn stop_timer(&self, _conn: ConnectionId) {
            self.events.lock().unwrap().push(Event::Stop);
        }
    }

    const CONN: ConnectionId = ConnectionId(1);

    #[test]
    fn test_busy_then_idle() {
        let dm = Recorder::default();
        let mut tracker = DiscoveryIdleTracker::new(15);

        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        assert_eq!(tracker.state(), IdleState::Busy);
        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        tracker.on_timeout(&dm, CONN);
        assert_eq!(tracker.state(), IdleState::Idle);

        assert_eq!(
            *dm.events.lock().unwrap(),
            vec![
                Event::SetIdle(true),
                Event::Start(15),
                Event::Stop,
                Event::Start(15),
                Event::SetIdle(false),
            ]
        );
    }

    #[test]
    fn test_zero_timeout_disables_tracking() {
        let dm = Recorder::default();
        let mut tracker = DiscoveryIdleTracker::new(0);

        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        assert_eq!(tracker.state(), IdleState::Idle);
        assert!(dm.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_stops_armed_timer() {
        let dm = Recorder::default();
        let mut tracker = DiscoveryIdleTracker::new(5);

        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        tracker.on_disconnect(&dm, CONN);
        assert!(!tracker.timer_armed());
        assert_eq!(dm.events.lock().unwrap().last(), Some(&Event::Stop));
    }

    #[test]
    fn test_closed_tracker_stays_quiet() {
        let dm = Recorder::default();
        let mut tracker = DiscoveryIdleTracker::new(5);

        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        tracker.on_disconnect(&dm, CONN);
        dm.events.lock().unwrap().clear();

        tracker.on_discovery_pdu(&dm, CONN).unwrap();
        tracker.on_timeout(&dm, CONN);
        tracker.on_disconnect(&dm, CONN);

        assert!(tracker.is_closed());
        assert!(!tracker.timer_armed());
        assert_eq!(tracker.state(), IdleState::Idle);
        assert!(dm.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_timer_failure_is_reported() {
        let dm = Recorder {
            fail_start: true,
            ..Default::default()
        };
        let mut tracker = DiscoveryIdleTracker::new(5);

        assert!(matches!(
            tracker.on_discovery_pdu(&dm, CONN),
            Err(TimerError::Unavailable(CONN))
        ));
        assert!(!tracker.timer_armed());
    }
}
