#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BotCommand {
    Start,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandDef {
    command: BotCommand,
    patterns: &'static [&'static str],
}

const COMMAND_DEFS: &[CommandDef] = &[
    CommandDef {
        command: BotCommand::Start,
        patterns: &["/start"],
    },
    CommandDef {
        command: BotCommand::Help,
        patterns: &["/help"],
    },
];

pub(crate) const HELP_TEXT: &str = "*tagbox*\n\n\
Send me anything and I will file it:\n\
• text, links and forwards\n\
• photos, albums, documents, audio, voice notes and stickers\n\n\
Add `#tags` anywhere in the text\\. Untagged messages land in `#inbox`\\.\n\
Edit the original message later and the saved entry follows\\.\n\n\
Channels: add me as an admin and every post is filed silently\\.";

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
