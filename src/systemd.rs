use log::{debug, info};
use thiserror::Error;
use crate::command;

/// Directory holding the generated unit files.
pub const UNITS_DIR: &str = "/etc/systemd/system";

/// Unit of the pod sharing the network namespace of all the proxy containers.
pub const POD_SERVICE: &str = "uyuni-proxy-pod";

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to {action} {service} service: {err}")]
    Service {
        action: &'static str,
        service: String,
        err: command::Error,
    },

    #[error("failed to reload systemd units: {0}")]
    Reload(command::Error),
}

/// Service manager fronting the container engine.
pub trait ServiceManager {
    /// Whether the service is active.
    fn is_running(&self, service: &str) -> bool;

    /// Enable the service and start it now.
    fn enable(&self, service: &str) -> Result<(), Error>;

    fn stop(&self, service: &str) -> Result<(), Error>;

    /// Stop the service and disable it.
    fn disable(&self, service: &str) -> Result<(), Error>;

    fn restart(&self, service: &str) -> Result<(), Error>;

    /// Reload the unit definitions.
    fn reload(&self) -> Result<(), Error>;
}

/// [ServiceManager] running `systemctl`.
#[derive(Default)]
pub struct Systemctl;

impl Systemctl {
    fn service_command(&self, action: &'static str, args: &[&str], service: &str) -> Result<(), Error> {
        let mut command = args.to_vec();
        command.push(service);
        command::output("systemctl", command).map(|_| ()).map_err(|err| Error::Service {
            action,
            service: service.to_string(),
            err,
        })
    }
}

impl ServiceManager for Systemctl {
    fn is_running(&self, service: &str) -> bool {
        command::succeeds("systemctl", ["is-active", "-q", service]).unwrap_or(false)
    }

    fn enable(&self, service: &str) -> Result<(), Error> {
        self.service_command("enable", &["enable", "--now"], service)
    }

    fn stop(&self, service: &str) -> Result<(), Error> {
        self.service_command("stop", &["stop"], service)
    }

    fn disable(&self, service: &str) -> Result<(), Error> {
        self.service_command("disable", &["disable", "--now"], service)
    }

    fn restart(&self, service: &str) -> Result<(), Error> {
        self.service_command("restart", &["restart"], service)
    }

    fn reload(&self) -> Result<(), Error> {
        // A previously failed unit would not be restarted otherwise.
        if let Err(err) = command::output("systemctl", ["reset-failed"]) {
            debug!("systemctl reset-failed: {err}");
        }
        command::output("systemctl", ["daemon-reload"])
            .map(|_| ())
            .map_err(Error::Reload)
    }
}

/// Start a service, or restart it to pick up new units and images if it is already running.
pub fn start(manager: &dyn ServiceManager, service: &str) -> Result<(), Error> {
    if manager.is_running(service) {
        info!("Restarting {service}");
        manager.restart(service)
    } else {
        info!("Enabling and starting {service}");
        manager.enable(service)
    }
}

pub fn stop(manager: &dyn ServiceManager, service: &str) -> Result<(), Error> {
    info!("Stopping {service}");
    manager.stop(service)
}

pub fn restart(manager: &dyn ServiceManager, service: &str) -> Result<(), Error> {
    info!("Restarting {service}");
    manager.restart(service)
}

#[cfg(test)]
pub mod fake {
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use super::*;

    /// Records every call and keeps a set of running services.
    #[derive(Default)]
    pub struct FakeManager {
        pub calls: RefCell<Vec<String>>,
        pub running: RefCell<BTreeSet<String>>,
        pub fail_reload: bool,
    }

    impl FakeManager {
        pub fn running(services: &[&str]) -> Self {
            let manager = Self::default();
            manager
                .running
                .borrow_mut()
                .extend(services.iter().map(|s| s.to_string()));
            manager
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl ServiceManager for FakeManager {
        fn is_running(&self, service: &str) -> bool {
            self.running.borrow().contains(service)
        }

        fn enable(&self, service: &str) -> Result<(), Error> {
            self.record(format!("enable {service}"));
            self.running.borrow_mut().insert(service.to_string());
            Ok(())
        }

        fn stop(&self, service: &str) -> Result<(), Error> {
            self.record(format!("stop {service}"));
            self.running.borrow_mut().remove(service);
            Ok(())
        }

        fn disable(&self, service: &str) -> Result<(), Error> {
            self.record(format!("disable {service}"));
            self.running.borrow_mut().remove(service);
            Ok(())
        }

        fn restart(&self, service: &str) -> Result<(), Error> {
            self.record(format!("restart {service}"));
            Ok(())
        }

        fn reload(&self) -> Result<(), Error> {
            self.record("reload".to_string());
            if self.fail_reload {
                return Err(Error::Reload(command::Error::MissingBinary("systemctl".to_string())));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeManager;
    use super::*;

    #[test]
    fn start_enables_stopped_service() {
        let manager = FakeManager::default();
        start(&manager, POD_SERVICE).unwrap();
        assert_eq!(manager.calls(), vec!["enable uyuni-proxy-pod"]);
        assert!(manager.is_running(POD_SERVICE));
    }

    #[test]
    fn start_restarts_running_service() {
        let manager = FakeManager::running(&[POD_SERVICE]);
        start(&manager, POD_SERVICE).unwrap();
        assert_eq!(manager.calls(), vec!["restart uyuni-proxy-pod"]);
    }

    #[test]
    fn stop_and_restart_pass_through() {
        let manager = FakeManager::running(&[POD_SERVICE]);
        stop(&manager, POD_SERVICE).unwrap();
        restart(&manager, POD_SERVICE).unwrap();
        assert_eq!(
            manager.calls(),
            vec!["stop uyuni-proxy-pod", "restart uyuni-proxy-pod"]
        );
    }
}
