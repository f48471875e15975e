//! Connection health monitor
//!
//! Detects silent disconnection of the accepted port. Two detection paths
//! feed the same state: a fixed-interval poll of the full port list
//! (always on) and OS hot-plug notifications via [`HealthMonitor::notify_unplugged`]
//! where the platform provides them. Both share one deduplication guard so
//! a loss is reported exactly once no matter how many paths observe it.

use crate::board::scanner::Port;

/// Events produced by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The device list changed size — something was plugged or removed.
    DeviceListChanged,
    /// The currently-accepted port vanished. Emitted exactly once per loss.
    AcceptedPortLost(String),
}

/// Port-set comparison state.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    last_ports: Option<Vec<String>>,
    accepted: Option<String>,
    loss_reported: bool,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted port; re-arms loss reporting.
    pub fn set_accepted(&mut self, port: Option<String>) {
        self.accepted = port;
        self.loss_reported = false;
    }

    pub fn accepted(&self) -> Option<&str> {
        self.accepted.as_deref()
    }

    /// Feed one poll of the full port list.
    pub fn observe(&mut self, ports: &[Port]) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let paths: Vec<String> = ports.iter().map(|p| p.path.clone()).collect();

        if let Some(last) = &self.last_ports {
            if last.len() != paths.len() {
                events.push(MonitorEvent::DeviceListChanged);
            }
        }

        if let Some(accepted) = &self.accepted {
            if !paths.iter().any(|p| p == accepted) {
                if let Some(event) = self.report_loss_once() {
                    events.push(event);
                }
            }
        }

        self.last_ports = Some(paths);
        events
    }

    /// OS hot-plug path: a device-removal notification for `path`.
    ///
    /// Shares the deduplication guard with the polling path, so a
    /// notification followed by a poll (or two notifications) still yields
    /// one loss event.
    pub fn notify_unplugged(&mut self, path: &str) -> Option<MonitorEvent> {
        if self.accepted.as_deref() == Some(path) {
            self.report_loss_once()
        } else {
            None
        }
    }

    fn report_loss_once(&mut self) -> Option<MonitorEvent> {
        if self.loss_reported {
            return None;
        }
        self.loss_reported = true;
        self.accepted
            .clone()
            .map(MonitorEvent::AcceptedPortLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(path: &str) -> Port {
        Port {
            path: path.to_string(),
            vendor_id: Some(0x2341),
            product_id: Some(0x0043),
        }
    }

    #[test]
    fn test_device_list_size_change_reports_connect_class_event() {
        let mut monitor = HealthMonitor::new();
        assert!(monitor.observe(&[port("/dev/ttyUSB0")]).is_empty()); // first poll: baseline
        let events = monitor.observe(&[port("/dev/ttyUSB0"), port("/dev/ttyUSB1")]);
        assert_eq!(events, vec![MonitorEvent::DeviceListChanged]);
    }

    #[test]
    fn test_accepted_port_loss_exactly_once() {
        let mut monitor = HealthMonitor::new();
        monitor.set_accepted(Some("/dev/ttyUSB0".to_string()));
        monitor.observe(&[port("/dev/ttyUSB0")]);

        let events = monitor.observe(&[]);
        assert!(events.contains(&MonitorEvent::AcceptedPortLost("/dev/ttyUSB0".to_string())));

        // Second poll with the port still gone: nothing new.
        let events = monitor.observe(&[]);
        assert!(!events
            .iter()
            .any(|e| matches!(e, MonitorEvent::AcceptedPortLost(_))));
    }

    #[test]
    fn test_hotplug_and_poll_share_the_guard() {
        let mut monitor = HealthMonitor::new();
        monitor.set_accepted(Some("/dev/ttyUSB0".to_string()));
        monitor.observe(&[port("/dev/ttyUSB0")]);

        // Hot-plug notification lands first.
        assert_eq!(
            monitor.notify_unplugged("/dev/ttyUSB0"),
            Some(MonitorEvent::AcceptedPortLost("/dev/ttyUSB0".to_string()))
        );
        // The polling fallback then sees the same loss: deduplicated.
        let events = monitor.observe(&[]);
        assert!(!events
            .iter()
            .any(|e| matches!(e, MonitorEvent::AcceptedPortLost(_))));
        // And a duplicate notification too.
        assert_eq!(monitor.notify_unplugged("/dev/ttyUSB0"), None);
    }

    #[test]
    fn test_unrelated_unplug_ignored() {
        let mut monitor = HealthMonitor::new();
        monitor.set_accepted(Some("/dev/ttyUSB0".to_string()));
        assert_eq!(monitor.notify_unplugged("/dev/ttyUSB7"), None);
    }

    #[test]
    fn test_reaccepting_rearms_loss_reporting() {
        let mut monitor = HealthMonitor::new();
        monitor.set_accepted(Some("/dev/ttyUSB0".to_string()));
        monitor.observe(&[port("/dev/ttyUSB0")]);
        assert!(!monitor.observe(&[]).is_empty());

        monitor.set_accepted(Some("/dev/ttyUSB0".to_string()));
        monitor.observe(&[port("/dev/ttyUSB0")]);
        let events = monitor.observe(&[]);
        assert!(events.contains(&MonitorEvent::AcceptedPortLost("/dev/ttyUSB0".to_string())));
    }
}
