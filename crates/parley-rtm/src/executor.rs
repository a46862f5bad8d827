//! Depth-first action execution.
//!
//! Handlers return a single [`Action`]; applying an action may yield a
//! follow-up action. The executor drives this to quiescence with an explicit
//! stack so that a sequence `[a, b, c]` runs `c` first and fully expands
//! everything `c` yields before `b` is considered.

use anyhow::Result;
use async_trait::async_trait;
use parley_command::Action;

/// Where actions take effect. The session implements this against the live
/// socket and Web API; tests substitute a scripted environment.
#[async_trait]
pub trait ActionEnvironment: Send {
    /// Applies one non-sequence action, optionally yielding a follow-up.
    async fn apply(&mut self, action: Action) -> Result<Option<Action>>;
}

/// Runs one action tree to completion, newest work first.
pub async fn execute<E>(env: &mut E, root: Option<Action>) -> Result<()>
where
    E: ActionEnvironment + ?Sized,
{
    let mut stack = Vec::new();
    stack.extend(root);
    while let Some(action) = stack.pop() {
        match action {
            // Pushing in order means the last element pops first.
            Action::Sequence(items) => stack.extend(items),
            other => {
                if let Some(follow_up) = env.apply(other).await? {
                    stack.push(follow_up);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use parley_command::Action;

    use super::{execute, ActionEnvironment};

    /// Records applied reactions in order; a scripted emoji may yield a
    /// follow-up action when applied.
    #[derive(Default)]
    struct ScriptedEnv {
        applied: Vec<String>,
        follow_ups: HashMap<String, Action>,
        fail_on: Option<String>,
    }

    fn react(emoji: &str) -> Action {
        Action::React {
            emoji: emoji.to_string(),
        }
    }

    #[async_trait]
    impl ActionEnvironment for ScriptedEnv {
        async fn apply(&mut self, action: Action) -> Result<Option<Action>> {
            let Action::React { emoji } = action else {
                bail!("scripted environment only handles reactions");
            };
            if self.fail_on.as_deref() == Some(emoji.as_str()) {
                bail!("scripted failure on {emoji}");
            }
            self.applied.push(emoji.clone());
            Ok(self.follow_ups.remove(&emoji))
        }
    }

    #[tokio::test]
    async fn unit_sequences_run_back_to_front() {
        let mut env = ScriptedEnv::default();
        let root = Action::Sequence(vec![react("a"), react("b"), react("c")]);
        execute(&mut env, Some(root)).await.expect("execute");
        assert_eq!(env.applied, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn unit_follow_ups_expand_before_earlier_siblings() {
        let mut env = ScriptedEnv::default();
        env.follow_ups.insert(
            "c".to_string(),
            Action::Sequence(vec![react("d"), react("e")]),
        );
        let root = Action::Sequence(vec![react("a"), react("b"), react("c")]);
        execute(&mut env, Some(root)).await.expect("execute");
        assert_eq!(env.applied, vec!["c", "e", "d", "b", "a"]);
    }

    #[tokio::test]
    async fn unit_nested_sequences_flatten_depth_first() {
        let mut env = ScriptedEnv::default();
        let root = Action::Sequence(vec![
            react("a"),
            Action::Sequence(vec![react("b"), react("c")]),
        ]);
        execute(&mut env, Some(root)).await.expect("execute");
        assert_eq!(env.applied, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn unit_no_action_is_a_no_op() {
        let mut env = ScriptedEnv::default();
        execute(&mut env, None).await.expect("execute");
        assert!(env.applied.is_empty());
    }

    #[tokio::test]
    async fn regression_failures_stop_remaining_work() {
        let mut env = ScriptedEnv {
            fail_on: Some("b".to_string()),
            ..ScriptedEnv::default()
        };
        let root = Action::Sequence(vec![react("a"), react("b"), react("c")]);
        let error = execute(&mut env, Some(root)).await.expect_err("fails");
        assert!(error.to_string().contains("scripted failure"));
        assert_eq!(env.applied, vec!["c"]);
    }
}
