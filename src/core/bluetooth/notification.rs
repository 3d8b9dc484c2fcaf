//! Notification handling for the alert characteristic
//! This module decodes incoming notifications and fans them out to the alert
//! popup and, for call requests, the call action.

use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::constants::{ALERT_TITLE, CALL_COMMAND_PREFIX, DEFAULT_ALERT_MESSAGE};
use crate::core::ports::{AlertSink, CallAction, StatusSink};

/// A decoded notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub raw: Vec<u8>,
    pub text: String,
}

impl InboundMessage {
    /// Decodes the payload as UTF-8, replacing invalid sequences
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            raw: raw.to_vec(),
            text: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// Text shown in the alert popup
    pub fn alert_text(&self) -> &str {
        if self.text.is_empty() {
            DEFAULT_ALERT_MESSAGE
        } else {
            &self.text
        }
    }

    /// Phone number carried by a `CALL:` payload
    pub fn call_number(&self) -> Option<&str> {
        self.text
            .strip_prefix(CALL_COMMAND_PREFIX)
            .map(str::trim)
            .filter(|number| !number.is_empty())
    }
}

/// Routes alert notifications to the user-facing collaborators
#[derive(Clone)]
pub struct NotificationRouter {
    characteristic: Uuid,
    alerts: Arc<dyn AlertSink>,
    calls: Arc<dyn CallAction>,
    status: Arc<dyn StatusSink>,
}

impl NotificationRouter {
    pub fn new(
        characteristic: Uuid,
        alerts: Arc<dyn AlertSink>,
        calls: Arc<dyn CallAction>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self { characteristic, alerts, calls, status }
    }

    /// Handles one characteristic change. Values from other characteristics
    /// are ignored.
    pub fn on_message(&self, characteristic: Uuid, raw: &[u8]) {
        if characteristic != self.characteristic {
            debug!("Ignoring notification from {}", characteristic);
            return;
        }

        let message = InboundMessage::decode(raw);
        info!("Received alert: {:?}", message.text);

        self.status.set_status(&format!("Alert notify: {}", message.text));
        self.alerts.display(ALERT_TITLE, message.alert_text(), true);

        if let Some(number) = message.call_number() {
            info!("Alert requests a call to {}", number);
            self.calls.initiate(number);
        } else if message.text.starts_with(CALL_COMMAND_PREFIX) {
            warn!("Call request without a phone number: {:?}", message.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_ALERT_CHAR;
    use crate::core::ports::{MockAlertSink, MockCallAction, MockStatusSink};
    use mockall::predicate::{always, eq};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quiet_status() -> MockStatusSink {
        let mut status = MockStatusSink::new();
        status.expect_set_status().returning(|_| ());
        status
    }

    fn router(alerts: MockAlertSink, calls: MockCallAction, status: MockStatusSink) -> NotificationRouter {
        NotificationRouter::new(UUID_ALERT_CHAR, Arc::new(alerts), Arc::new(calls), Arc::new(status))
    }

    #[test]
    fn test_empty_payload_uses_default_text() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_display()
            .with(eq(ALERT_TITLE), eq(DEFAULT_ALERT_MESSAGE), eq(true))
            .times(1)
            .returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();

        router(alerts, calls, quiet_status()).on_message(UUID_ALERT_CHAR, b"");
    }

    #[test]
    fn test_plain_text_is_forwarded_verbatim() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_display()
            .with(eq(ALERT_TITLE), eq("Fall detected in kitchen"), eq(true))
            .times(1)
            .returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();
        let mut status = MockStatusSink::new();
        status
            .expect_set_status()
            .with(eq("Alert notify: Fall detected in kitchen"))
            .times(1)
            .returning(|_| ());

        router(alerts, calls, status).on_message(UUID_ALERT_CHAR, b"Fall detected in kitchen");
    }

    #[test]
    fn test_call_payload_triggers_alert_and_call() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_display()
            .with(eq(ALERT_TITLE), eq("CALL:2062014760"), eq(true))
            .times(1)
            .returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().with(eq("2062014760")).times(1).returning(|_| ());

        router(alerts, calls, quiet_status()).on_message(UUID_ALERT_CHAR, b"CALL:2062014760");
    }

    #[test]
    fn test_call_number_is_trimmed() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts.expect_display().times(1).returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().with(eq("555-1234")).times(1).returning(|_| ());

        router(alerts, calls, quiet_status()).on_message(UUID_ALERT_CHAR, b"CALL:  555-1234  ");
    }

    #[test]
    fn test_prefix_must_lead_the_payload() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts.expect_display().times(2).returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();

        let router = router(alerts, calls, quiet_status());
        router.on_message(UUID_ALERT_CHAR, b"please CALL:911");
        router.on_message(UUID_ALERT_CHAR, b"call:911");
    }

    #[test]
    fn test_call_without_number_only_alerts() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_display()
            .with(eq(ALERT_TITLE), eq("CALL:   "), eq(true))
            .times(1)
            .returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();

        router(alerts, calls, quiet_status()).on_message(UUID_ALERT_CHAR, b"CALL:   ");
    }

    #[test]
    fn test_other_characteristics_are_ignored() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts.expect_display().never();
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();
        let mut status = MockStatusSink::new();
        status.expect_set_status().never();

        let other = Uuid::from_u128(0x2a19);
        router(alerts, calls, status).on_message(other, b"CALL:2062014760");
    }

    #[test]
    fn test_invalid_utf8_still_alerts() {
        init_logger();
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_display()
            .with(eq(ALERT_TITLE), eq("Help \u{FFFD}!"), always())
            .times(1)
            .returning(|_, _, _| ());
        let mut calls = MockCallAction::new();
        calls.expect_initiate().never();

        router(alerts, calls, quiet_status()).on_message(UUID_ALERT_CHAR, b"Help \xff!");
    }

    #[test]
    fn test_decode_keeps_raw_bytes() {
        let message = InboundMessage::decode(b"CALL:42");
        assert_eq!(message.raw, b"CALL:42".to_vec());
        assert_eq!(message.call_number(), Some("42"));
        assert_eq!(InboundMessage::decode(b"").alert_text(), DEFAULT_ALERT_MESSAGE);
    }
}
