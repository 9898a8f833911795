//! Canned fixes for failing pods.
//!
//! A closed, ordered table of log substrings; the first match picks the fix
//! and anything unrecognized gets a plain restart.

use std::fmt;

/// Fix applied to one failing pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Volume permission problem: recreate the pod so init containers re-run.
    PermissionFix,
    /// Stale unix socket: recreate the pod, then re-apply the service manifest.
    SocketFix,
    /// Registry cache misconfiguration: recreate the pod.
    CacheFix,
    /// Anything else: delete and let the controller recreate it.
    Restart,
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissionFix => "permission fix",
            Self::SocketFix => "socket fix",
            Self::CacheFix => "cache fix",
            Self::Restart => "restart",
        };
        f.write_str(text)
    }
}

/// One `(pattern, action)` row.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub pattern: &'static str,
    pub action: Remediation,
}

impl Rule {
    #[must_use]
    pub fn matches(&self, logs: &str) -> bool {
        logs.contains(self.pattern)
    }
}

/// Evaluated top to bottom.
pub const RULES: &[Rule] = &[
    Rule {
        pattern: "Permission denied",
        action: Remediation::PermissionFix,
    },
    Rule {
        pattern: "unix domain socket",
        action: Remediation::SocketFix,
    },
    Rule {
        pattern: "cache type",
        action: Remediation::CacheFix,
    },
];

/// Pick the remediation for a pod's log tail.
#[must_use]
pub fn classify(logs: &str) -> Remediation {
    RULES
        .iter()
        .find(|rule| rule.matches(logs))
        .map_or(Remediation::Restart, |rule| rule.action)
}

/// A pod outside Running/Succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingPod {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for FailingPod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parse `namespace/name` lines.
#[must_use]
pub fn parse_failing_pods(listing: &str) -> Vec<FailingPod> {
    listing
        .lines()
        .filter_map(|line| {
            let (namespace, name) = line.trim().split_once('/')?;
            (!namespace.is_empty() && !name.is_empty()).then(|| FailingPod {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        let cases = [
            (
                "chown: /var/lib/postgresql/data: Permission denied",
                Remediation::PermissionFix,
            ),
            (
                "could not bind to unix domain socket /run/php.sock",
                Remediation::SocketFix,
            ),
            ("invalid cache type: redis-cluster", Remediation::CacheFix),
            ("panic: runtime error: index out of range", Remediation::Restart),
            ("", Remediation::Restart),
        ];
        for (logs, expected) in cases {
            assert_eq!(classify(logs), expected, "logs: {logs:?}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        let logs = "unix domain socket busy\nopen /data: Permission denied";
        assert_eq!(classify(logs), Remediation::PermissionFix);
    }

    #[test]
    fn test_parse_failing_pods() {
        let listing = "ceres/gitlab-7d9f\nmailcow/postfix-0\n\nbogus-line\n";
        let pods = parse_failing_pods(listing);
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[1].to_string(), "mailcow/postfix-0");
    }
}
