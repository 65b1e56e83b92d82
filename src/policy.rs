/// Allow/deny matcher applied to a command string before a task is
/// admitted to the queue. Deny rules win when both lists match; an empty
/// allow list means "allow everything not denied".
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        CommandPolicy {
            allow: Vec::new(),
            deny: vec![
                "rm -rf /".into(),
                "mkfs".into(),
                ":(){ :|:& };:".into(),
                "dd if=/dev/zero".into(),
            ],
        }
    }
}

impl CommandPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        CommandPolicy { allow, deny }
    }

    /// Returns `Err(reason)` when the command is rejected.
    pub fn check(&self, command: &str) -> Result<(), String> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err("command must not be empty".into());
        }
        for pattern in &self.deny {
            if trimmed.contains(pattern.as_str()) {
                return Err(format!("command matches a denied pattern: {pattern}"));
            }
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|p| trimmed.starts_with(p.as_str())) {
            return Err("command is not on the allow list".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_rejects_known_destructive_commands() {
        let p = CommandPolicy::default();
        assert!(p.check("rm -rf / --no-preserve-root").is_err());
        assert!(p.check("uptime").is_ok());
    }

    #[test]
    fn allow_list_restricts_to_prefixes() {
        let p = CommandPolicy::new(vec!["systemctl status".into()], vec![]);
        assert!(p.check("systemctl status nginx").is_ok());
        assert!(p.check("systemctl restart nginx").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let p = CommandPolicy::default();
        assert!(p.check("   ").is_err());
    }
}
