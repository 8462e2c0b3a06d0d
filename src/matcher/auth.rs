//! Rule authorization: allow/deny lists and usergroup membership.

use tracing::{info, warn};

use crate::config::Bot;
use crate::models::Rule;
use crate::remotes::Remote;

/// Decide whether a user may trigger a rule.
///
/// Deny lists take precedence over allow lists. Usergroup membership is
/// delegated to the service's remote; a lookup that fails denies, since the
/// engine cannot prove the user is (or is not) in the group.
pub async fn can_trigger(
    rule: &Rule,
    user_name: &str,
    user_id: &str,
    remote: &dyn Remote,
    bot: &Bot,
) -> bool {
    if !rule.has_auth_lists() {
        return true;
    }

    if rule.ignore_users.iter().any(|u| u == user_name) {
        info!(rule = %rule.name, user = user_name, "user is in ignore_users");
        return false;
    }

    for group in &rule.ignore_usergroups {
        match group_members(group, remote, bot).await {
            Ok(members) => {
                if members.iter().any(|m| m == user_id) {
                    info!(rule = %rule.name, user = user_id, group = %group, "user is in an ignored usergroup");
                    return false;
                }
            }
            Err(reason) => {
                warn!(rule = %rule.name, group = %group, "usergroup lookup failed, denying: {reason}");
                return false;
            }
        }
    }

    let has_allow_lists = !rule.allow_users.is_empty()
        || !rule.allow_user_ids.is_empty()
        || !rule.allow_usergroups.is_empty();
    if !has_allow_lists {
        return true;
    }

    if rule.allow_users.iter().any(|u| u == user_name) {
        return true;
    }
    if rule.allow_user_ids.iter().any(|u| u == user_id) {
        return true;
    }
    for group in &rule.allow_usergroups {
        match group_members(group, remote, bot).await {
            Ok(members) => {
                if members.iter().any(|m| m == user_id) {
                    return true;
                }
            }
            Err(reason) => {
                warn!(rule = %rule.name, group = %group, "usergroup lookup failed, denying: {reason}");
                return false;
            }
        }
    }

    false
}

/// Resolve a usergroup name via the bot's index (falling back to treating the
/// name as an id) and fetch its members from the remote.
async fn group_members(
    group: &str,
    remote: &dyn Remote,
    bot: &Bot,
) -> Result<Vec<String>, String> {
    let group_id = bot
        .usergroup_id(group)
        .await
        .unwrap_or_else(|| group.to_string());
    remote
        .usergroup_members(&group_id, bot)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::BotConfig;
    use crate::error::RemoteError;
    use crate::models::Message;

    /// Remote whose usergroup index is a static map; `fail_lookups` simulates
    /// a platform that cannot answer.
    struct FakeRemote {
        groups: HashMap<String, Vec<String>>,
        fail_lookups: bool,
    }

    #[async_trait]
    impl Remote for FakeRemote {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn read(
            &self,
            _input_tx: mpsc::Sender<Message>,
            _rules: Arc<HashMap<String, Rule>>,
            _bot: Arc<Bot>,
        ) {
        }

        async fn send(&self, _message: Message, _bot: Arc<Bot>) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn usergroup_members(
            &self,
            group_id: &str,
            _bot: &Bot,
        ) -> Result<Vec<String>, RemoteError> {
            if self.fail_lookups {
                return Err(RemoteError::UsergroupLookup {
                    name: "fake".into(),
                    reason: "api unavailable".into(),
                });
            }
            Ok(self.groups.get(group_id).cloned().unwrap_or_default())
        }
    }

    fn remote(groups: &[(&str, &[&str])]) -> FakeRemote {
        FakeRemote {
            groups: groups
                .iter()
                .map(|(g, m)| (g.to_string(), m.iter().map(|s| s.to_string()).collect()))
                .collect(),
            fail_lookups: false,
        }
    }

    fn bot() -> Bot {
        Bot::new(BotConfig {
            usergroups: HashMap::from([("admins".to_string(), "G1".to_string())]),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn no_lists_allows_everyone() {
        let rule = Rule::default();
        assert!(can_trigger(&rule, "alice", "U1", &remote(&[]), &bot()).await);
    }

    #[tokio::test]
    async fn ignore_users_denies() {
        let rule = Rule {
            ignore_users: vec!["mallory".into()],
            ..Default::default()
        };
        assert!(!can_trigger(&rule, "mallory", "U9", &remote(&[]), &bot()).await);
        assert!(can_trigger(&rule, "alice", "U1", &remote(&[]), &bot()).await);
    }

    #[tokio::test]
    async fn ignore_usergroup_denies_members() {
        let rule = Rule {
            ignore_usergroups: vec!["admins".into()],
            ..Default::default()
        };
        let r = remote(&[("G1", &["U9"])]);
        assert!(!can_trigger(&rule, "mallory", "U9", &r, &bot()).await);
        assert!(can_trigger(&rule, "alice", "U1", &r, &bot()).await);
    }

    #[tokio::test]
    async fn allow_lists_gate_access() {
        let rule = Rule {
            allow_users: vec!["alice".into()],
            allow_user_ids: vec!["U2".into()],
            ..Default::default()
        };
        let r = remote(&[]);
        assert!(can_trigger(&rule, "alice", "U1", &r, &bot()).await);
        assert!(can_trigger(&rule, "bob", "U2", &r, &bot()).await);
        assert!(!can_trigger(&rule, "carol", "U3", &r, &bot()).await);
    }

    #[tokio::test]
    async fn allow_usergroup_membership_allows() {
        let rule = Rule {
            allow_usergroups: vec!["admins".into()],
            ..Default::default()
        };
        let r = remote(&[("G1", &["U1"])]);
        assert!(can_trigger(&rule, "alice", "U1", &r, &bot()).await);
        assert!(!can_trigger(&rule, "bob", "U2", &r, &bot()).await);
    }

    #[tokio::test]
    async fn lookup_failure_denies() {
        let rule = Rule {
            allow_usergroups: vec!["admins".into()],
            ..Default::default()
        };
        let r = FakeRemote {
            groups: HashMap::new(),
            fail_lookups: true,
        };
        assert!(!can_trigger(&rule, "alice", "U1", &r, &bot()).await);

        let rule = Rule {
            ignore_usergroups: vec!["admins".into()],
            ..Default::default()
        };
        assert!(!can_trigger(&rule, "alice", "U1", &r, &bot()).await);
    }

    #[tokio::test]
    async fn deterministic_for_identical_inputs() {
        let rule = Rule {
            allow_users: vec!["alice".into()],
            ignore_users: vec!["mallory".into()],
            ..Default::default()
        };
        let r = remote(&[]);
        let b = bot();
        for _ in 0..3 {
            assert!(can_trigger(&rule, "alice", "U1", &r, &b).await);
            assert!(!can_trigger(&rule, "mallory", "U9", &r, &b).await);
            assert!(!can_trigger(&rule, "carol", "U3", &r, &b).await);
        }
    }
}
