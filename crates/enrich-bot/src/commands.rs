#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BotCommand {
    Menu,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelegramCommandSpec {
    pub command: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandDef {
    command: BotCommand,
    patterns: &'static [&'static str],
    telegram_spec: TelegramCommandSpec,
}

const COMMAND_DEFS: &[CommandDef] = &[
    CommandDef {
        command: BotCommand::Menu,
        patterns: &["/menu", "/start"],
        telegram_spec: TelegramCommandSpec {
            command: "menu",
            description: "Open the session menu",
        },
    },
    CommandDef {
        command: BotCommand::Status,
        patterns: &["/status"],
        telegram_spec: TelegramCommandSpec {
            command: "status",
            description: "Show labeling progress per session",
        },
    },
];

pub(crate) fn telegram_command_specs() -> Vec<TelegramCommandSpec> {
    COMMAND_DEFS.iter().map(|def| def.telegram_spec).collect()
}

pub(crate) fn parse_command(text: &str) -> Option<BotCommand> {
    let trimmed = text.trim();

    COMMAND_DEFS.iter().find_map(|def| {
        def.patterns
            .iter()
            .any(|pattern| command_matches(trimmed, pattern))
            .then_some(def.command)
    })
}

fn command_matches(trimmed_text: &str, command: &str) -> bool {
    if trimmed_text == command {
        return true;
    }

    trimmed_text
        .strip_prefix(command)
        .is_some_and(|stripped| stripped.starts_with('@'))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{BotCommand, command_matches, parse_command, telegram_command_specs};

    #[test]
    fn parse_menu_aliases() {
        assert_eq!(parse_command("/menu"), Some(BotCommand::Menu));
        assert_eq!(parse_command(" /menu@enrich_bot "), Some(BotCommand::Menu));
        assert_eq!(parse_command("/start"), Some(BotCommand::Menu));
        assert_eq!(parse_command("/status"), Some(BotCommand::Status));
    }

    #[test]
    fn rejects_non_commands() {
        assert_eq!(parse_command("cat"), None);
        assert_eq!(parse_command("/menu please"), None);
        assert_eq!(parse_command("/statusquo"), None);
    }

    #[test]
    fn command_matcher_accepts_bot_mentions_only() {
        assert!(command_matches("/menu", "/menu"));
        assert!(command_matches("/menu@enrich_bot", "/menu"));
        assert!(!command_matches("/menu anything", "/menu"));
    }

    #[test]
    fn telegram_command_specs_are_unique_and_non_empty() {
        let specs = telegram_command_specs();
        assert!(!specs.is_empty());

        let mut names = HashSet::new();
        for spec in specs {
            assert!(!spec.command.trim().is_empty());
            assert!(!spec.description.trim().is_empty());
            assert!(names.insert(spec.command));
        }
    }
}
