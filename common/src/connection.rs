use std::fmt;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error(_) => "ERROR",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "ERROR: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Side effects the host must perform against the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    Connect,
    Subscribe,
    EndSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingReconnect {
    due_ms: u64,
    reason: ReconnectReason,
}

/// Connection status machine and the single reconnect timer slot.
///
/// `Disconnected -> Connecting -> Connected`, and back to `Disconnected` or
/// `Error` on transport loss. Timers are deadlines checked by [`tick`], so at
/// most one attempt can ever be pending.
///
/// [`tick`]: ConnectionTracker::tick
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    config: ReconnectConfig,
    state: ConnectionState,
    pending: Option<PendingReconnect>,
    retry_count: u32,
    session_live: bool,
    status_message: String,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ConnectionTracker {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            pending: None,
            retry_count: 0,
            session_live: false,
            status_message: "Disconnected".to_string(),
        }
    }

    pub fn current_state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn pending_timers(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.map(|pending| pending.due_ms)
    }

    pub fn pending_reason(&self) -> Option<ReconnectReason> {
        self.pending.map(|pending| pending.reason)
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.config.auto_reconnect = enabled;
        if !enabled && self.pending_reason() == Some(ReconnectReason::Automatic) {
            self.pending = None;
        }
    }

    pub fn start(&mut self, _now_ms: u64) -> Vec<ConnectionAction> {
        if self.state.is_active() {
            return Vec::new();
        }

        self.pending = None;
        self.state = ConnectionState::Connecting;
        self.session_live = true;
        self.status_message = if self.retry_count == 0 {
            "Connecting to broker...".to_string()
        } else {
            format!("Reconnecting to broker (attempt {})...", self.retry_count + 1)
        };
        vec![ConnectionAction::Connect]
    }

    pub fn on_transport_connected(&mut self, _now_ms: u64) -> Vec<ConnectionAction> {
        self.pending = None;
        self.retry_count = 0;
        self.session_live = true;
        self.state = ConnectionState::Connected;
        self.status_message = "Connected to broker".to_string();
        vec![ConnectionAction::Subscribe]
    }

    pub fn on_transport_disconnected(
        &mut self,
        reason: Option<&str>,
        now_ms: u64,
    ) -> Vec<ConnectionAction> {
        self.session_live = false;
        self.retry_count = self.retry_count.saturating_add(1);

        match reason.map(str::trim).filter(|reason| !reason.is_empty()) {
            Some(reason) => {
                self.state = ConnectionState::Error(reason.to_string());
                self.status_message = format!("Connection error: {reason}");
            }
            None => {
                self.state = ConnectionState::Disconnected;
                self.status_message = "Disconnected from broker".to_string();
            }
        }

        if self.config.auto_reconnect && self.pending_reason() != Some(ReconnectReason::Manual) {
            self.pending = Some(PendingReconnect {
                due_ms: now_ms.saturating_add(self.config.delay_ms),
                reason: ReconnectReason::Automatic,
            });
            self.status_message.push_str(&format!(
                "; retrying in {}s",
                self.config.delay_ms.div_ceil(1_000)
            ));
        }

        Vec::new()
    }

    /// Manual reconnect: drop any pending attempt, end the live session and
    /// start again after the short manual delay.
    pub fn reconnect(&mut self, now_ms: u64) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        self.pending = None;

        if self.session_live || self.state.is_active() {
            actions.push(ConnectionAction::EndSession);
        }
        self.session_live = false;
        self.state = ConnectionState::Disconnected;
        self.status_message = "Reconnecting...".to_string();

        self.pending = Some(PendingReconnect {
            due_ms: now_ms.saturating_add(self.config.manual_delay_ms),
            reason: ReconnectReason::Manual,
        });

        actions
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<ConnectionAction> {
        match self.pending {
            Some(pending) if now_ms >= pending.due_ms => {
                self.pending = None;
                self.start(now_ms)
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tracker() -> ConnectionTracker {
        ConnectionTracker::new(ReconnectConfig {
            auto_reconnect: true,
            delay_ms: 5_000,
            manual_delay_ms: 1_000,
        })
    }

    fn connected_tracker() -> ConnectionTracker {
        let mut tracker = tracker();
        tracker.start(0);
        tracker.on_transport_connected(100);
        tracker
    }

    #[test]
    fn starts_disconnected() {
        let tracker = tracker();

        assert_eq!(tracker.current_state(), &ConnectionState::Disconnected);
        assert_eq!(tracker.pending_timers(), 0);
    }

    #[test]
    fn start_moves_to_connecting() {
        let mut tracker = tracker();

        assert_eq!(tracker.start(0), vec![ConnectionAction::Connect]);
        assert_eq!(tracker.current_state(), &ConnectionState::Connecting);
    }

    #[test]
    fn start_is_idempotent_while_active() {
        let mut tracker = tracker();
        tracker.start(0);

        assert!(tracker.start(10).is_empty());
        assert_eq!(tracker.current_state(), &ConnectionState::Connecting);

        tracker.on_transport_connected(20);
        assert!(tracker.start(30).is_empty());
        assert_eq!(tracker.current_state(), &ConnectionState::Connected);
    }

    #[test]
    fn connected_requests_subscription() {
        let mut tracker = tracker();
        tracker.start(0);

        assert_eq!(
            tracker.on_transport_connected(50),
            vec![ConnectionAction::Subscribe]
        );
        assert_eq!(tracker.current_state(), &ConnectionState::Connected);
    }

    #[test]
    fn error_disconnect_schedules_one_timer() {
        let mut tracker = connected_tracker();

        tracker.on_transport_disconnected(Some("x"), 1_000);

        assert_eq!(
            tracker.current_state(),
            &ConnectionState::Error("x".to_string())
        );
        assert_eq!(tracker.pending_timers(), 1);
        assert_eq!(tracker.next_deadline(), Some(6_000));
    }

    #[test]
    fn repeated_disconnects_keep_single_timer() {
        let mut tracker = connected_tracker();

        tracker.on_transport_disconnected(Some("x"), 1_000);
        tracker.on_transport_disconnected(Some("y"), 2_000);
        tracker.on_transport_disconnected(None, 2_500);

        assert_eq!(tracker.pending_timers(), 1);
        assert_eq!(tracker.next_deadline(), Some(7_500));
        assert_eq!(tracker.current_state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn blank_reason_means_plain_disconnect() {
        let mut tracker = connected_tracker();

        tracker.on_transport_disconnected(Some("  "), 1_000);

        assert_eq!(tracker.current_state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn timer_fires_start_when_due() {
        let mut tracker = connected_tracker();
        tracker.on_transport_disconnected(Some("offline"), 1_000);

        assert!(tracker.tick(5_999).is_empty());
        assert_eq!(tracker.pending_timers(), 1);

        assert_eq!(tracker.tick(6_000), vec![ConnectionAction::Connect]);
        assert_eq!(tracker.current_state(), &ConnectionState::Connecting);
        assert_eq!(tracker.pending_timers(), 0);
        assert_eq!(tracker.retry_count(), 1);
    }

    #[test]
    fn connected_resets_retries_and_cancels_timer() {
        let mut tracker = connected_tracker();
        tracker.on_transport_disconnected(Some("offline"), 1_000);
        tracker.tick(6_000);
        tracker.on_transport_disconnected(Some("offline"), 7_000);
        assert_eq!(tracker.retry_count(), 2);

        tracker.on_transport_connected(7_500);

        assert_eq!(tracker.retry_count(), 0);
        assert_eq!(tracker.pending_timers(), 0);
    }

    #[test]
    fn auto_reconnect_disabled_schedules_nothing() {
        let mut tracker = ConnectionTracker::new(ReconnectConfig {
            auto_reconnect: false,
            ..ReconnectConfig::default()
        });
        tracker.start(0);
        tracker.on_transport_connected(10);

        tracker.on_transport_disconnected(Some("refused"), 20);

        assert_eq!(tracker.pending_timers(), 0);
        assert!(tracker.tick(1_000_000).is_empty());
        assert_eq!(
            tracker.current_state(),
            &ConnectionState::Error("refused".to_string())
        );
    }

    #[test]
    fn manual_reconnect_ends_session_and_restarts_after_delay() {
        let mut tracker = connected_tracker();

        assert_eq!(tracker.reconnect(2_000), vec![ConnectionAction::EndSession]);
        assert_eq!(tracker.current_state(), &ConnectionState::Disconnected);
        assert_eq!(tracker.pending_timers(), 1);
        assert_eq!(tracker.pending_reason(), Some(ReconnectReason::Manual));

        assert!(tracker.tick(2_999).is_empty());
        assert_eq!(tracker.tick(3_000), vec![ConnectionAction::Connect]);
    }

    #[test]
    fn manual_reconnect_replaces_pending_automatic_timer() {
        let mut tracker = connected_tracker();
        tracker.on_transport_disconnected(Some("offline"), 1_000);

        assert!(tracker.reconnect(1_500).is_empty());

        assert_eq!(tracker.pending_timers(), 1);
        assert_eq!(tracker.next_deadline(), Some(2_500));
    }

    #[test]
    fn disconnect_after_manual_reconnect_keeps_manual_deadline() {
        let mut tracker = connected_tracker();
        tracker.reconnect(2_000);

        tracker.on_transport_disconnected(None, 2_100);

        assert_eq!(tracker.pending_timers(), 1);
        assert_eq!(tracker.next_deadline(), Some(3_000));
    }

    #[test]
    fn manual_reconnect_works_without_auto_reconnect() {
        let mut tracker = ConnectionTracker::new(ReconnectConfig {
            auto_reconnect: false,
            ..ReconnectConfig::default()
        });
        tracker.start(0);
        tracker.on_transport_disconnected(Some("refused"), 10);

        tracker.reconnect(20);

        assert_eq!(tracker.tick(1_020), vec![ConnectionAction::Connect]);
    }

    #[test]
    fn disabling_auto_reconnect_cancels_automatic_timer() {
        let mut tracker = connected_tracker();
        tracker.on_transport_disconnected(Some("offline"), 1_000);

        tracker.set_auto_reconnect(false);

        assert_eq!(tracker.pending_timers(), 0);
    }
}
