use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub(crate) fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools the host backend drives.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_host_prereqs(render_helper: &str, relation_helper: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("apt-get") {
        missing.push(MissingPrereq {
            name: "apt-get".to_owned(),
            purpose: "installing service packages",
            install_hint: "run on a Debian or Ubuntu host",
        });
    }

    if !command_exists("systemctl") {
        missing.push(MissingPrereq {
            name: "systemctl".to_owned(),
            purpose: "restarting managed daemons",
            install_hint: "part of systemd",
        });
    }

    if !command_exists(render_helper) {
        missing.push(MissingPrereq {
            name: render_helper.to_owned(),
            purpose: "rendering config files from templates",
            install_hint: "install the template helper shipped with the service",
        });
    }

    if !command_exists(relation_helper) {
        missing.push(MissingPrereq {
            name: relation_helper.to_owned(),
            purpose: "exchanging data with related services",
            install_hint: "install the relation helper of your orchestrator",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThe host backend requires these tools to provision a unit.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "systemctl".to_owned(),
            purpose: "restarting daemons",
            install_hint: "part of systemd",
        };
        let s = format!("{m}");
        assert!(s.contains("systemctl"));
        assert!(s.contains("restarting daemons"));
        assert!(s.contains("part of systemd"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "apt-get".to_owned(),
                purpose: "packages",
                install_hint: "debian",
            },
            MissingPrereq {
                name: "stagehand-render".to_owned(),
                purpose: "templates",
                install_hint: "ship it",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("apt-get"));
        assert!(output.contains("stagehand-render"));
    }

    #[test]
    fn unknown_helpers_are_reported() {
        let missing = check_host_prereqs(
            "stagehand-render-does-not-exist",
            "stagehand-relation-does-not-exist",
        );
        assert!(missing
            .iter()
            .any(|m| m.name == "stagehand-render-does-not-exist"));
        assert!(missing
            .iter()
            .any(|m| m.name == "stagehand-relation-does-not-exist"));
    }
}
