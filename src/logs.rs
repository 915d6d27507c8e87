use chrono::DateTime;

/// What part of the container logs to show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFlags {
    pub follow: bool,
    pub timestamps: bool,
    /// Number of lines from the end of the logs, all of them if unset.
    pub tail: Option<u32>,
    /// RFC 3339 timestamp or relative duration such as `3h`.
    pub since: Option<String>,
}

impl LogFlags {
    fn is_timestamp(since: &str) -> bool {
        DateTime::parse_from_rfc3339(since).is_ok()
    }

    /// `podman logs` arguments for the given containers.
    pub fn podman_args(&self, containers: &[String]) -> Vec<String> {
        let mut args = vec!["logs".to_string()];
        if self.follow {
            args.push("--follow".to_string());
        }
        if self.timestamps {
            args.push("--timestamps".to_string());
        }
        if let Some(tail) = self.tail {
            args.push(format!("--tail={tail}"));
        }
        if let Some(since) = &self.since {
            args.push(format!("--since={since}"));
        }
        args.extend(containers.iter().cloned());
        args
    }

    /// `kubectl logs` arguments for a pod, all of its containers unless one is named.
    pub fn kubectl_args(&self, namespace: &str, pod: &str, container: Option<&str>) -> Vec<String> {
        let mut args = vec!["logs".to_string(), "-n".to_string(), namespace.to_string()];
        if self.follow {
            args.push("-f".to_string());
        }
        if self.timestamps {
            args.push("--timestamps".to_string());
        }
        if let Some(tail) = self.tail {
            args.push(format!("--tail={tail}"));
        }
        match &self.since {
            Some(since) if Self::is_timestamp(since) => args.push(format!("--since-time={since}")),
            Some(since) => args.push(format!("--since={since}")),
            None => {}
        }
        args.push(pod.to_string());
        match container {
            Some(container) => {
                args.push("-c".to_string());
                args.push(container.to_string());
            }
            None => args.push("--all-containers".to_string()),
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn podman_logs_of_every_container() {
        let flags = LogFlags {
            follow: true,
            tail: Some(20),
            ..Default::default()
        };
        let args = flags.podman_args(&["uyuni-proxy-httpd".to_string(), "uyuni-proxy-ssh".to_string()]);
        assert_eq!(
            args.join(" "),
            "logs --follow --tail=20 uyuni-proxy-httpd uyuni-proxy-ssh"
        );
    }

    #[test]
    fn kubectl_since_flavors() {
        let flags = LogFlags {
            since: Some("2025-01-02T15:04:05Z".to_string()),
            timestamps: true,
            ..Default::default()
        };
        assert_eq!(
            flags.kubectl_args("uyuni", "uyuni-proxy-7d9", None).join(" "),
            "logs -n uyuni --timestamps --since-time=2025-01-02T15:04:05Z uyuni-proxy-7d9 --all-containers"
        );

        let flags = LogFlags {
            since: Some("3h".to_string()),
            ..Default::default()
        };
        assert_eq!(
            flags.kubectl_args("uyuni", "uyuni-proxy-7d9", Some("httpd")).join(" "),
            "logs -n uyuni --since=3h uyuni-proxy-7d9 -c httpd"
        );
    }
}
