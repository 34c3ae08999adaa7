//! REPL command surface
//!
//! A line is either a conversation command (`help`, `clear`, ...), a tool
//! prefix that names its tool explicitly (`/calc 2+2`), or free text for
//! the classifier. Tool prefixes bypass classification entirely.

use serde_json::{json, Map, Value};

use crate::tools::ToolInvocation;

pub const HELP: &str = "\
Conversation:
  help                       Show this help
  clear                      Clear conversation history
  history                    Show recent turns
  save                       Save the session now
  context                    Show context window usage
  model, /model              Show served model info
  status, /status            Show server and policy status
  tools                      List available tools
  metrics                    Print prometheus metrics
  quit, exit, /q             Exit

File tools:
  /read <file>               Read a file
  /write <file> <content>    Write content to a file
  /list [dir]                List directory contents
  /search <dir> <pattern>    Find files by name

System tools:
  /disk                      Disk usage
  /gpu                       GPU information
  /ps                        Top processes by CPU
  /net                       Listening ports

Network tools:
  /web <query>               Web search
  /curl <url>                HTTP GET
  /ping <host>               Ping a host

Code & AI tools:
  /calc <expression>         Evaluate arithmetic
  /exec <language> <code>    Run python, bash or javascript
  /analyze <file>            AI analysis of a file
  /summary <text>            Summarize text
  /code <language> <task>    Generate code
  /translate <lang> <text>   Translate text

Anything else is sent to the assistant, which picks a tool when one is needed.";

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Clear,
    History,
    Save,
    Context,
    Model,
    Status,
    Tools,
    Metrics,
    Quit,
    /// A tool prefix with its arguments
    Invoke(ToolInvocation),
    /// A tool prefix missing required arguments
    Usage(&'static str),
    /// An unrecognised `/word`
    Unknown(String),
    /// Free text for the classifier
    Chat(String),
}

/// Parse one REPL line
pub fn parse(line: &str) -> Command {
    let line = line.trim();
    let (word, rest) = split_word(line);

    let command = match word.to_lowercase().as_str() {
        "help" | "/help" | "?" => Command::Help,
        "clear" | "/clear" => Command::Clear,
        "history" | "/history" => Command::History,
        "save" | "/save" => Command::Save,
        "context" | "/context" => Command::Context,
        "model" | "/model" => Command::Model,
        "status" | "/status" => Command::Status,
        "tools" | "/tools" => Command::Tools,
        "metrics" | "/metrics" => Command::Metrics,
        "quit" | "exit" | "/q" | "/quit" | "/exit" => Command::Quit,
        // conversation words only count on their own
        _ if !word.starts_with('/') => Command::Chat(line.to_string()),
        prefix => tool_prefix(prefix, rest),
    };
    command.only_if_bare(rest, line)
}

impl Command {
    /// `clear the screen please` is a chat message, not a command
    fn only_if_bare(self, rest: &str, line: &str) -> Command {
        match self {
            Command::Invoke(_) | Command::Usage(_) | Command::Unknown(_) | Command::Chat(_) => self,
            _ if rest.is_empty() => self,
            _ => Command::Chat(line.to_string()),
        }
    }
}

fn tool_prefix(prefix: &str, rest: &str) -> Command {
    let invoke = |tool: &str, pairs: &[(&str, &str)]| {
        let mut arguments = Map::new();
        for (name, value) in pairs {
            arguments.insert((*name).to_string(), Value::String((*value).to_string()));
        }
        Command::Invoke(ToolInvocation::new(tool, arguments))
    };
    let system_info = |kind: &str| {
        let mut arguments = Map::new();
        arguments.insert("kind".to_string(), json!(kind));
        Command::Invoke(ToolInvocation::new("system_info", arguments))
    };

    match prefix {
        "/read" => one_arg(rest, "/read <file>", |path| invoke("read_file", &[("path", path)])),
        "/write" => two_args(rest, "/write <file> <content>", |path, content| {
            invoke("write_file", &[("path", path), ("content", content)])
        }),
        "/list" | "/ls" if rest.is_empty() => invoke("list_directory", &[]),
        "/list" | "/ls" => invoke("list_directory", &[("path", rest)]),
        "/search" => two_args(rest, "/search <dir> <pattern>", |path, pattern| {
            invoke("find_files", &[("path", path), ("pattern", pattern)])
        }),
        "/web" => one_arg(rest, "/web <query>", |query| invoke("web_search", &[("query", query)])),
        "/curl" => one_arg(rest, "/curl <url>", |url| invoke("http_get", &[("url", url)])),
        "/ping" => one_arg(rest, "/ping <host>", |host| invoke("ping", &[("host", host)])),
        "/disk" => system_info("disk"),
        "/gpu" => system_info("gpu"),
        "/ps" => system_info("processes"),
        "/net" => system_info("network"),
        "/calc" => one_arg(rest, "/calc <expression>", |expression| {
            invoke("calculator", &[("expression", expression)])
        }),
        "/exec" => two_args(rest, "/exec <language> <code>", |language, code| {
            invoke("run_code", &[("language", language), ("code", code)])
        }),
        "/analyze" => one_arg(rest, "/analyze <file>", |path| invoke("analyze_file", &[("path", path)])),
        "/summary" | "/summarize" => {
            one_arg(rest, "/summary <text>", |text| invoke("summarize", &[("text", text)]))
        }
        "/code" => two_args(rest, "/code <language> <task>", |language, task| {
            invoke("generate_code", &[("language", language), ("task", task)])
        }),
        "/translate" => two_args(rest, "/translate <lang> <text>", |language, text| {
            invoke("translate", &[("language", language), ("text", text)])
        }),
        other => Command::Unknown(other.to_string()),
    }
}

/// Whole remainder as one argument
fn one_arg(rest: &str, usage: &'static str, build: impl FnOnce(&str) -> Command) -> Command {
    if rest.is_empty() {
        Command::Usage(usage)
    } else {
        build(rest)
    }
}

/// First word, then the untouched remainder
fn two_args(rest: &str, usage: &'static str, build: impl FnOnce(&str, &str) -> Command) -> Command {
    match split_word(rest) {
        (first, second) if !first.is_empty() && !second.is_empty() => build(first, second),
        _ => Command::Usage(usage),
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn invocation(command: Command) -> ToolInvocation {
        match command {
            Command::Invoke(inv) => inv,
            other => panic!("expected a tool invocation, got {other:?}"),
        }
    }

    #[rstest]
    #[case("help", Command::Help)]
    #[case("  CLEAR ", Command::Clear)]
    #[case("history", Command::History)]
    #[case("save", Command::Save)]
    #[case("context", Command::Context)]
    #[case("/model", Command::Model)]
    #[case("status", Command::Status)]
    #[case("tools", Command::Tools)]
    #[case("metrics", Command::Metrics)]
    #[case("exit", Command::Quit)]
    #[case("/q", Command::Quit)]
    fn test_conversation_commands(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse(line), expected);
    }

    #[test]
    fn test_command_words_inside_sentences_are_chat() {
        assert_eq!(
            parse("clear up this confusion for me"),
            Command::Chat("clear up this confusion for me".into())
        );
        assert_eq!(parse("hello"), Command::Chat("hello".into()));
    }

    #[rstest]
    #[case("/read notes.md", "read_file", &[("path", "notes.md")])]
    #[case("/write out.txt hello  world", "write_file", &[("path", "out.txt"), ("content", "hello  world")])]
    #[case("/list src", "list_directory", &[("path", "src")])]
    #[case("/search src main", "find_files", &[("path", "src"), ("pattern", "main")])]
    #[case("/web rust async traits", "web_search", &[("query", "rust async traits")])]
    #[case("/curl example.com", "http_get", &[("url", "example.com")])]
    #[case("/ping 1.1.1.1", "ping", &[("host", "1.1.1.1")])]
    #[case("/ps", "system_info", &[("kind", "processes")])]
    #[case("/calc 2^10 + 5 * 3", "calculator", &[("expression", "2^10 + 5 * 3")])]
    #[case("/exec python print(6 * 7)", "run_code", &[("language", "python"), ("code", "print(6 * 7)")])]
    #[case("/code rust parse a csv line", "generate_code", &[("language", "rust"), ("task", "parse a csv line")])]
    #[case("/translate French good night", "translate", &[("language", "French"), ("text", "good night")])]
    fn test_tool_prefixes(#[case] line: &str, #[case] tool: &str, #[case] args: &[(&str, &str)]) {
        let inv = invocation(parse(line));
        assert_eq!(inv.tool_id, tool);
        assert_eq!(inv.arguments.len(), args.len());
        for (name, value) in args {
            assert_eq!(inv.arguments[*name], *value, "argument {name}");
        }
    }

    #[test]
    fn test_list_without_dir_has_no_arguments() {
        assert!(invocation(parse("/list")).arguments.is_empty());
    }

    #[rstest]
    #[case("/read", "/read <file>")]
    #[case("/write out.txt", "/write <file> <content>")]
    #[case("/search src", "/search <dir> <pattern>")]
    #[case("/exec python", "/exec <language> <code>")]
    #[case("/translate", "/translate <lang> <text>")]
    fn test_missing_arguments_print_usage(#[case] line: &str, #[case] usage: &'static str) {
        assert_eq!(parse(line), Command::Usage(usage));
    }

    #[test]
    fn test_unknown_prefix() {
        assert_eq!(parse("/frobnicate now"), Command::Unknown("/frobnicate".into()));
    }

    #[test]
    fn test_prefix_wins_over_lexical_trigger() {
        // "search for ..." would route to web_search as free text
        let inv = invocation(parse("/read search for recent news"));
        assert_eq!(inv.tool_id, "read_file");
    }
}
