//! Building remote command lines.

/// Join argv words into one command line for a remote POSIX shell.
pub fn render_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote `input` for a POSIX shell unless it only contains safe characters.
pub fn shell_escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_words_are_left_alone() {
        let args = vec!["uptime".to_string(), "--since".to_string()];
        assert_eq!(render_command(&args), "uptime --since");
    }

    #[test]
    fn words_with_spaces_and_quotes_are_quoted() {
        let args = vec!["echo".to_string(), "it's here".to_string()];
        assert_eq!(render_command(&args), "echo 'it'\"'\"'s here'");
    }

    #[test]
    fn empty_word_survives_as_empty_quotes() {
        assert_eq!(shell_escape(""), "''");
    }
}
