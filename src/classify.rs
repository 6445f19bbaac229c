//! Heuristics over free text: is a streamed answer a runnable one-liner, and
//! does piped input read like a command or a question.

use regex::Regex;
use std::sync::LazyLock;

/// Leading token the exec prompt reserves for "no command possible".
pub const NOEXEC_SENTINEL: &str = "[noexec]";

static COMMAND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^(ls|cd|grep|find|git|docker|kubectl|npm|go|python|pip)\s",
        r"^[./]",
        r"\|\s*\w+",
        r"\bsudo\s",
        r"^(cat|less|more|head|tail|vim|nano|mkdir|rmdir|touch|chmod|chown)\s",
        r"^(apt|yum|brew)\s",
        r"\s(>|>>|<)\s",
    ])
});

static COMMAND_QUERY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)^(what|how|show|get|find|list|display)\b.*\b(command|run|execute)\b",
        r"(?i)^(what|how)\b.*\b(ip|address|port|url|endpoint)\b",
        r"(?i)^(what|how)\b.*\b(containers?|pods?|instances?|servers?|services?)\b",
        r"(?i)^(how to|how do i)\s",
        r"(?i)\bcommand for\b",
        r"(?i)\bcommand to\s",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::error!(pattern, %error, "invalid classifier pattern");
                None
            }
        })
        .collect()
}

/// True when accumulated exec-mode output can be offered for execution.
pub fn is_executable_output(output: &str) -> bool {
    !output.starts_with(NOEXEC_SENTINEL) && !output.contains('\n')
}

/// Advisory guess whether `input` is a shell command (or asks for one).
pub fn looks_like_command(input: &str) -> bool {
    let input = input.trim();
    if input.is_empty() {
        return false;
    }

    if COMMAND_PATTERNS.iter().any(|p| p.is_match(input)) {
        return true;
    }

    if COMMAND_QUERY_PATTERNS.iter().any(|p| p.is_match(input)) {
        return true;
    }

    input.split_whitespace().count() <= 3 && !input.contains('?')
}
