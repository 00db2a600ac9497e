// SPDX-License-Identifier: MIT
//! Command validation — deny-list guard for task commands.
//!
//! Every command is checked before it is stored and again before every
//! execution. The guard refuses or accepts; it never rewrites a command.

use once_cell::sync::Lazy;
use regex::Regex;

/// Why a command was refused. Expected, user-facing outcomes — not faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command refused: {pattern}")]
    DangerousCommand { pattern: String },
}

/// Compiled deny-list. Patterns match whole tokens or recognizable
/// sub-invocations, case-insensitively — `rm -rf` matches, `firmware` does not.
static DENY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\brm\s+(-\w+\s+)*-\w*r|\brm\s+(-\w+\s+)*--recursive\b", "recursive delete"),
        (r"(?i)\brm\b.*--no-preserve-root\b", "recursive delete"),
        (r"(?i)\bsudo\b", "privilege escalation"),
        (r"(?i)\bsu\s+(-|root\b)", "privilege escalation"),
        (r"(?i)\bmkfs(\.\w+)?\b", "filesystem format"),
        (r"(?i)\bdd\b[^|;&]*\bof=/dev/", "raw device write"),
        (r"(?i)\b(shutdown|reboot|poweroff|halt)\b", "power control"),
        (r":\(\)\s*\{", "fork bomb"),
        (r"(?i)\bchmod\s+(-\w+\s+)*777\b", "world-writable chmod"),
    ]
    .into_iter()
    .map(|(pattern, label)| {
        (
            Regex::new(pattern).expect("deny-list pattern must compile"),
            label,
        )
    })
    .collect()
});

/// Validate a raw command string against the deny-list.
///
/// Returns the first matching rejection, or `Ok(())` when the command is
/// acceptable. Pure — no side effects, no sanitization.
pub fn validate_command(command: &str) -> Result<(), RejectionReason> {
    if command.trim().is_empty() {
        return Err(RejectionReason::EmptyCommand);
    }
    for (re, label) in DENY_PATTERNS.iter() {
        if re.is_match(command) {
            return Err(RejectionReason::DangerousCommand {
                pattern: (*label).to_string(),
            });
        }
    }
    Ok(())
}
