//! Routing decisions for inbound messages.
//!
//! Pure logic only: given the grammar, the registry, and where a message
//! arrived, decide what the session should do with it. The session owns the
//! side effects.

use std::collections::HashSet;

use parley_command::{CommandGrammar, HandlerRegistry, MatchArgs};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// Run the named command handler with the captured arguments.
    Invoke { name: String, args: MatchArgs },
    /// The command exists but is reserved for administrators.
    AdminDenied,
    /// Reply with the help text, in the sender's DM session.
    DmHelp,
    /// Pass to unfiltered watchers and consider for persistence.
    Unfiltered,
    Ignore,
}

/// Routes one plain message. Direct messages never reach watchers: an
/// unparseable DM earns the help text instead.
pub(crate) fn route_message(
    grammar: &CommandGrammar,
    registry: &HandlerRegistry,
    admins: &HashSet<String>,
    is_dm: bool,
    channel_name: Option<&str>,
    user: &str,
    text: &str,
) -> Route {
    match grammar.try_match(text, is_dm) {
        Some(matched) => match registry.lookup_filtered(&matched.name) {
            Some(record) => {
                // Channel restrictions only apply to channels; a DM may
                // invoke any command the sender is otherwise allowed.
                if !is_dm && !record.allows_channel(channel_name) {
                    Route::Ignore
                } else if record.admin_only && !admins.contains(user) {
                    Route::AdminDenied
                } else {
                    Route::Invoke {
                        name: matched.name,
                        args: matched.args,
                    }
                }
            }
            // A grammar entry with no registered handler is a registration
            // bug; don't let it fall through to watchers.
            None if is_dm => Route::DmHelp,
            None => Route::Ignore,
        },
        None if is_dm => Route::DmHelp,
        None => Route::Unfiltered,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use parley_command::{
        Action, CommandCall, CommandHandler, CommandSet, CommandSpec, MatchExpr,
    };

    use super::{route_message, Route};

    struct NullCommand;

    #[async_trait]
    impl CommandHandler for NullCommand {
        async fn on_command(&self, _call: CommandCall<'_>) -> Result<Option<Action>> {
            Ok(None)
        }
    }

    fn command_set() -> CommandSet {
        let mut set = CommandSet::new("!");
        set.register_command(
            CommandSpec::new("greet", MatchExpr::keyword("greet").word("name")),
            Arc::new(NullCommand),
        )
        .expect("register greet");
        set.register_command(
            CommandSpec::new("purge", MatchExpr::keyword("purge")).admin_only(),
            Arc::new(NullCommand),
        )
        .expect("register purge");
        set.register_command(
            CommandSpec::new("standup", MatchExpr::keyword("standup"))
                .in_channels(["ops"]),
            Arc::new(NullCommand),
        )
        .expect("register standup");
        set
    }

    fn route(set: &CommandSet, is_dm: bool, channel: Option<&str>, user: &str, text: &str) -> Route {
        let admins: HashSet<String> = ["UADMIN".to_string()].into();
        route_message(set.grammar(), set.registry(), &admins, is_dm, channel, user, text)
    }

    #[test]
    fn unit_matched_channel_command_invokes_with_args() {
        let set = command_set();
        match route(&set, false, Some("general"), "U1", "!greet ada") {
            Route::Invoke { name, args } => {
                assert_eq!(name, "greet");
                assert_eq!(args.get("name"), Some("ada"));
            }
            other => panic!("expected invoke, got {other:?}"),
        }
    }

    #[test]
    fn unit_dm_commands_work_without_the_alert_prefix() {
        let set = command_set();
        assert!(matches!(
            route(&set, true, None, "U1", "greet ada"),
            Route::Invoke { .. }
        ));
    }

    #[test]
    fn unit_unparseable_dm_gets_help() {
        let set = command_set();
        assert_eq!(route(&set, true, None, "U1", "what can you do"), Route::DmHelp);
    }

    #[test]
    fn unit_plain_channel_chatter_goes_to_watchers() {
        let set = command_set();
        assert_eq!(
            route(&set, false, Some("general"), "U1", "good morning"),
            Route::Unfiltered
        );
    }

    #[test]
    fn unit_admin_only_commands_deny_non_admins() {
        let set = command_set();
        assert_eq!(route(&set, false, Some("general"), "U1", "!purge"), Route::AdminDenied);
        assert!(matches!(
            route(&set, false, Some("general"), "UADMIN", "!purge"),
            Route::Invoke { .. }
        ));
    }

    #[test]
    fn unit_channel_restricted_commands_ignore_other_rooms() {
        let set = command_set();
        assert_eq!(route(&set, false, Some("general"), "U1", "!standup"), Route::Ignore);
        assert!(matches!(
            route(&set, false, Some("ops"), "U1", "!standup"),
            Route::Invoke { .. }
        ));
    }

    #[test]
    fn regression_dm_invokes_channel_restricted_commands() {
        // Restrictions scope where a command may be shouted in public, not
        // whether it exists; a direct message bypasses them.
        let set = command_set();
        assert!(matches!(
            route(&set, true, None, "U1", "standup"),
            Route::Invoke { .. }
        ));
    }

    #[test]
    fn regression_failed_invocation_attempt_still_reaches_watchers() {
        // A channel message with the alert prefix but no matching command is
        // ordinary chatter as far as watchers are concerned.
        let set = command_set();
        assert_eq!(
            route(&set, false, Some("general"), "U1", "!frobnicate"),
            Route::Unfiltered
        );
    }
}
