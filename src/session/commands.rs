//! The line-oriented command grammar: `<verb> [args]`, CRLF-tolerant.

/// A parsed client command. `Unknown` carries the verb so the caller
/// can render a consistent "unknown command" reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { username: String, password: String },
    Create { username: String, password: String },
    Look,
    Say(String),
    Pose(String),
    Play(String),
    Quit,
    Unknown(String),
    Empty,
}

impl Command {
    /// Parse one line of client input. Trailing `\r` and surrounding
    /// whitespace are stripped before splitting on the first space.
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };
        match verb.to_ascii_uppercase().as_str() {
            "CONNECT" => match credentials(rest) {
                Some((username, password)) => Command::Connect { username, password },
                None => Command::Unknown(line.to_string()),
            },
            "CREATE" => match credentials(rest) {
                Some((username, password)) => Command::Create { username, password },
                None => Command::Unknown(line.to_string()),
            },
            "LOOK" => Command::Look,
            "SAY" if !rest.is_empty() => Command::Say(rest.to_string()),
            "POSE" if !rest.is_empty() => Command::Pose(rest.to_string()),
            "PLAY" if !rest.is_empty() => Command::Play(rest.to_string()),
            "QUIT" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

fn credentials(rest: &str) -> Option<(String, String)> {
    match rest.split_once(' ') {
        Some((username, password)) if !username.is_empty() && !password.is_empty() => Some((username.to_string(), password.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_two_arguments() {
        let cmd = Command::parse("CONNECT alice hunter2");
        assert_eq!(
            cmd,
            Command::Connect {
                username: "alice".to_string(),
                password: "hunter2".to_string(),
            }
        );
    }

    #[test]
    fn connect_is_case_insensitive() {
        let cmd = Command::parse("connect alice hunter2");
        assert!(matches!(cmd, Command::Connect { .. }));
    }

    #[test]
    fn parses_create_with_two_arguments() {
        let cmd = Command::parse("CREATE bob swordfish");
        assert_eq!(
            cmd,
            Command::Create {
                username: "bob".to_string(),
                password: "swordfish".to_string(),
            }
        );
    }

    #[test]
    fn connect_without_both_arguments_is_unknown() {
        assert_eq!(Command::parse("CONNECT alice"), Command::Unknown("CONNECT alice".to_string()));
    }

    #[test]
    fn parses_look_with_no_arguments() {
        assert_eq!(Command::parse("LOOK"), Command::Look);
    }

    #[test]
    fn parses_play_with_character_name() {
        assert_eq!(Command::parse("PLAY Gandalf"), Command::Play("Gandalf".to_string()));
    }

    #[test]
    fn strips_trailing_carriage_return() {
        assert_eq!(Command::parse("SAY hello there\r"), Command::Say("hello there".to_string()));
    }

    #[test]
    fn empty_line_yields_empty() {
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn say_without_text_is_unknown() {
        assert_eq!(Command::parse("SAY"), Command::Unknown("SAY".to_string()));
    }

    #[test]
    fn unrecognized_verb_is_unknown() {
        assert_eq!(Command::parse("DANCE"), Command::Unknown("DANCE".to_string()));
    }

    #[test]
    fn quit_ignores_trailing_arguments() {
        assert_eq!(Command::parse("QUIT now"), Command::Quit);
    }
}
