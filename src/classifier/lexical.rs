//! Lexical stage: deterministic regex triggers per tool
//!
//! Each rule names a tool, a case-insensitive pattern whose named groups
//! are that tool's argument names, and optional constant arguments.
//! Specificity of a match is the length of the text the pattern itself
//! pinned down, i.e. the whole match minus any free-text captures; the
//! most specific match wins and an exact tie between different tools is
//! left to the semantic stage.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::tools::Arguments;

/// Captures passed to the tool as typed: only surrounding whitespace goes
const VERBATIM: &[&str] = &["code", "content", "text"];

/// One trigger pattern for one tool
pub struct LexicalRule {
    pub tool: &'static str,
    pattern: Regex,
    /// Captures holding unconstrained text; excluded from specificity
    free: &'static [&'static str],
    /// Arguments implied by the trigger itself
    fixed: &'static [(&'static str, &'static str)],
    /// A whole match that also matches this is not a trigger
    veto: Option<Regex>,
}

impl LexicalRule {
    fn new(
        tool: &'static str,
        pattern: &str,
        free: &'static [&'static str],
        fixed: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            tool,
            pattern: Regex::new(&format!("(?i){pattern}"))
                .unwrap_or_else(|e| panic!("invalid lexical rule for {tool}: {e}")),
            free,
            fixed,
            veto: None,
        }
    }

    fn unless(mut self, pattern: &str) -> Self {
        self.veto = Some(
            Regex::new(pattern)
                .unwrap_or_else(|e| panic!("invalid veto for {}: {e}", self.tool)),
        );
        self
    }

    /// Match against an utterance, extracting arguments
    pub fn apply(&self, utterance: &str) -> Option<LexicalMatch> {
        let caps = self.pattern.captures(utterance)?;
        let whole = caps.get(0)?;
        if let Some(veto) = &self.veto {
            if veto.is_match(whole.as_str().trim()) {
                return None;
            }
        }

        let mut arguments = Arguments::new();
        let mut free_len = 0;
        for name in self.pattern.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                let value = if VERBATIM.contains(&name) {
                    m.as_str().trim().to_string()
                } else {
                    clean(m.as_str())
                };
                if value.is_empty() {
                    continue;
                }
                if self.free.contains(&name) {
                    free_len += m.as_str().len();
                }
                arguments.insert(name.to_string(), Value::String(value));
            }
        }
        for (name, value) in self.fixed {
            arguments.insert(name.to_string(), Value::String(value.to_string()));
        }

        Some(LexicalMatch {
            tool_id: self.tool.to_string(),
            arguments,
            specificity: whole.as_str().len() - free_len,
        })
    }
}

/// Trim whitespace, surrounding quotes and trailing sentence punctuation
fn clean(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c| matches!(c, '?' | '!' | '.'))
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub tool_id: String,
    pub arguments: Arguments,
    pub specificity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LexicalVerdict {
    /// Exactly one tool is the most specific match
    Unique(LexicalMatch),
    /// Two or more tools tie for the most specific match
    Ambiguous(Vec<LexicalMatch>),
    NoMatch,
}

const NUMBER: &str = r"(?:\d+(?:[.,]\d+)*|pi)";
const FUNCTIONS: &str = r"(?:sqrt|abs|ln|log|exp|sin|cos|tan|floor|ceil|round)";

fn arithmetic_pattern() -> String {
    let operand = format!(r"[-(\s]*(?:{FUNCTIONS}\s*\(\s*)?{NUMBER}[\s)]*");
    let operator = r"(?:\*\*|[-+*/%^×÷])";
    format!(
        r"(?P<expression>(?:{operand}(?:{operator}{operand})+|{FUNCTIONS}\s*\(\s*{operand}\)))"
    )
}

const PATH: &str = r"[\w./~-]+";
const FILE_WITH_EXT: &str = r"[\w./~-]*\.\w+";

lazy_static! {
    /// Built-in trigger rules
    pub static ref RULES: Vec<LexicalRule> = vec![
        // arithmetic: any expression with at least one binary operator,
        // except dates and phone numbers (2024-01-15, 555-123-4567, 555-1234)
        LexicalRule::new("calculator", &arithmetic_pattern(), &[], &[])
            .unless(r"^(?:\d+-\d+-\d+(?:-\d+)*|\d{3}-\d{4})$"),

        LexicalRule::new(
            "web_search",
            r"\b(?:search|look\s+up|google)(?:\s+the\s+web|\s+online)?(?:\s+for)?\s+(?P<query>.+?)\s*[?.!]*$",
            &["query"],
            &[],
        ),
        LexicalRule::new(
            "web_search",
            r"\b(?:latest|recent)\s+news\s+(?:on|about|for)\s+(?P<query>.+?)\s*[?.!]*$",
            &["query"],
            &[],
        ),

        LexicalRule::new(
            "http_get",
            r"\b(?:fetch|curl|get|download|open)\s+(?:the\s+)?(?:url\s+|page\s+)?(?P<url>https?://\S+)",
            &[],
            &[],
        ),

        LexicalRule::new(
            "ping",
            r"\bping\s+(?P<host>[a-z0-9][a-z0-9.:-]*)",
            &[],
            &[],
        ),
        LexicalRule::new(
            "ping",
            r"\bis\s+(?P<host>[a-z0-9.-]+\.[a-z]{2,})\s+(?:up|reachable|online|down)\b",
            &[],
            &[],
        ),

        LexicalRule::new(
            "run_code",
            r"\b(?:run|execute)\s+(?:this\s+|the\s+following\s+)?(?P<language>python3?|bash|sh|javascript|js|node)(?:\s+(?:code|script|snippet))?\s*[:\n]\s*(?P<code>[\s\S]+)",
            &["code"],
            &[],
        ),
        LexicalRule::new(
            "run_code",
            r"\b(?:run|execute)\b[^`]*```(?P<language>python3?|bash|sh|javascript|js|node)[ \t]*\n(?P<code>[\s\S]*?)```",
            &["code"],
            &[],
        ),

        LexicalRule::new(
            "read_file",
            &format!(r"\b(?:read|show|open|cat|display|print)\s+(?:me\s+)?(?:the\s+)?(?:contents?\s+of\s+)?(?:the\s+)?file\s+(?P<path>{PATH})"),
            &["path"],
            &[],
        ),
        LexicalRule::new(
            "read_file",
            &format!(r"\b(?:read|cat)\s+(?P<path>{FILE_WITH_EXT})\b"),
            &["path"],
            &[],
        ),

        LexicalRule::new(
            "write_file",
            &format!(r#"\b(?:write|save)\s+["'](?P<content>.+?)["']\s+(?:to|into|in)\s+(?:the\s+)?(?:file\s+)?(?P<path>{PATH})"#),
            &["content", "path"],
            &[],
        ),
        LexicalRule::new(
            "write_file",
            &format!(r"\bcreate\s+(?:a\s+)?file\s+(?P<path>{PATH})\s+(?:with|containing)\s+(?:the\s+)?(?:content\s+|text\s+)?(?P<content>.+)"),
            &["content", "path"],
            &[],
        ),

        LexicalRule::new(
            "list_directory",
            &format!(r"\b(?:list|show)\s+(?:all\s+)?(?:the\s+)?(?:files|contents|entries)\s+(?:in|of|inside)\s+(?:the\s+)?(?:directory\s+|folder\s+)?(?P<path>{PATH})"),
            &["path"],
            &[],
        ),
        LexicalRule::new(
            "list_directory",
            r"\b(?:list|ls)\s+(?:the\s+)?(?:current\s+)?(?:directory|folder|files)\b",
            &[],
            &[],
        ),

        LexicalRule::new(
            "find_files",
            &format!(r"\b(?:find|search\s+for|locate)\s+(?:all\s+)?files?\s+(?:named|matching|called|like)\s+(?P<pattern>\S+?)(?:\s+(?:in|under)\s+(?P<path>{PATH}))?\s*[?.!]*$"),
            &["pattern", "path"],
            &[],
        ),

        LexicalRule::new(
            "system_info",
            r"\b(?:disk\s+(?:usage|space)|free\s+space|storage\s+space)\b",
            &[],
            &[("kind", "disk")],
        ),
        LexicalRule::new(
            "system_info",
            r"\b(?:gpu|nvidia-smi|vram)\b",
            &[],
            &[("kind", "gpu")],
        ),
        LexicalRule::new(
            "system_info",
            r"\b(?:running\s+processes|top\s+processes|process\s+list|what(?:'s|\s+is)\s+running)\b",
            &[],
            &[("kind", "processes")],
        ),
        LexicalRule::new(
            "system_info",
            r"\b(?:listening\s+ports|open\s+ports|network\s+(?:status|connections))\b",
            &[],
            &[("kind", "network")],
        ),

        LexicalRule::new(
            "translate",
            r"\btranslate\s+(?:this\s+)?(?:in)?to\s+(?P<language>[a-z]+)\s*:\s*(?P<text>[\s\S]+)",
            &["text"],
            &[],
        ),
        LexicalRule::new(
            "translate",
            r"\btranslate\s+(?P<text>.+?)\s+(?:in)?to\s+(?P<language>[a-z]+)\s*[?.!]*$",
            &["text"],
            &[],
        ),

        LexicalRule::new(
            "summarize",
            r"\b(?:summari[sz]e|tl;?dr)\b(?:\s+(?:this|the\s+following)(?:\s+text)?)?\s*:\s*(?P<text>[\s\S]+)",
            &["text"],
            &[],
        ),

        LexicalRule::new(
            "analyze_file",
            &format!(r"\b(?:analy[sz]e|review|explain)\s+(?:the\s+)?(?:file\s+)?(?P<path>{FILE_WITH_EXT})\b"),
            &["path"],
            &[],
        ),

        LexicalRule::new(
            "generate_code",
            r"\b(?:write|generate|create)\s+(?:me\s+)?(?:an?\s+|some\s+)?(?P<language>python|rust|javascript|typescript|bash|go|java|ruby|c\+\+|c)\s+(?:code|script|program|function|class)\s+(?:to|that|for|which)\s+(?P<task>.+?)\s*[?.!]*$",
            &["task"],
            &[],
        ),
    ];
}

/// Every rule match, keeping the most specific match per tool
pub fn find_matches<'a>(
    rules: impl IntoIterator<Item = &'a LexicalRule>,
    utterance: &str,
) -> Vec<LexicalMatch> {
    let mut best: Vec<LexicalMatch> = Vec::new();
    for found in rules.into_iter().filter_map(|rule| rule.apply(utterance)) {
        match best.iter_mut().find(|m| m.tool_id == found.tool_id) {
            Some(existing) if existing.specificity >= found.specificity => {}
            Some(existing) => *existing = found,
            None => best.push(found),
        }
    }
    best
}

/// Apply the tie-break: longest specific match wins, exact ties are ambiguous
pub fn resolve(mut matches: Vec<LexicalMatch>) -> LexicalVerdict {
    let Some(top) = matches.iter().map(|m| m.specificity).max() else {
        return LexicalVerdict::NoMatch;
    };
    matches.retain(|m| m.specificity == top);
    if matches.len() == 1 {
        LexicalVerdict::Unique(matches.remove(0))
    } else {
        LexicalVerdict::Ambiguous(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn classify(utterance: &str) -> LexicalVerdict {
        resolve(find_matches(RULES.iter(), utterance))
    }

    fn unique(utterance: &str) -> LexicalMatch {
        match classify(utterance) {
            LexicalVerdict::Unique(m) => m,
            other => panic!("expected a unique match for {utterance:?}, got {other:?}"),
        }
    }

    #[rstest]
    #[case("What is 2^10 + 5 * 3?", "calculator", "expression", "2^10 + 5 * 3")]
    #[case("compute (1 + 2) * 3 please", "calculator", "expression", "(1 + 2) * 3")]
    #[case("what's sqrt(16)", "calculator", "expression", "sqrt(16)")]
    #[case("Search for recent developments in AI", "web_search", "query", "recent developments in AI")]
    #[case("look up the rust 2024 edition?", "web_search", "query", "the rust 2024 edition")]
    #[case("fetch https://example.com/a?b=1", "http_get", "url", "https://example.com/a?b=1")]
    #[case("can you ping google.com", "ping", "host", "google.com")]
    #[case("is example.org up?", "ping", "host", "example.org")]
    #[case("show me the contents of file notes/todo.md", "read_file", "path", "notes/todo.md")]
    #[case("cat Cargo.toml", "read_file", "path", "Cargo.toml")]
    #[case("list the files in src", "list_directory", "path", "src")]
    #[case("find files named main.rs in src", "find_files", "pattern", "main.rs")]
    #[case("how much disk space is left", "system_info", "kind", "disk")]
    #[case("show the GPU status", "system_info", "kind", "gpu")]
    #[case("translate good morning to Spanish", "translate", "language", "Spanish")]
    #[case("analyze src/main.rs", "analyze_file", "path", "src/main.rs")]
    #[case("write a python script that prints primes", "generate_code", "task", "prints primes")]
    fn test_unique_triggers(
        #[case] utterance: &str,
        #[case] tool: &str,
        #[case] arg: &str,
        #[case] value: &str,
    ) {
        let m = unique(utterance);
        assert_eq!(m.tool_id, tool, "{utterance}");
        assert_eq!(m.arguments[arg], value, "{utterance}");
    }

    #[test]
    fn test_run_code_extracts_language_and_code() {
        let m = unique("run this python code: print(6 * 7)");
        assert_eq!(m.tool_id, "run_code");
        assert_eq!(m.arguments["language"], "python");
        assert_eq!(m.arguments["code"], "print(6 * 7)");

        let m = unique("please execute\n```bash\necho hi\n```");
        assert_eq!(m.arguments["language"], "bash");
        assert_eq!(m.arguments["code"], "echo hi");
    }

    #[test]
    fn test_write_file_extracts_both_arguments() {
        let m = unique("save 'hello world' to greeting.txt");
        assert_eq!(m.tool_id, "write_file");
        assert_eq!(m.arguments["content"], "hello world");
        assert_eq!(m.arguments["path"], "greeting.txt");
    }

    #[test]
    fn test_free_text_keeps_quotes_and_punctuation() {
        let m = unique("run this bash code: echo 'hi'");
        assert_eq!(m.arguments["code"], "echo 'hi'");

        let m = unique("run this python code: print(\"done.\")");
        assert_eq!(m.arguments["code"], "print(\"done.\")");

        let m = unique("create a file notes.txt with Hello, world!");
        assert_eq!(m.arguments["path"], "notes.txt");
        assert_eq!(m.arguments["content"], "Hello, world!");

        let m = unique("summarize this: It works. Mostly!");
        assert_eq!(m.arguments["text"], "It works. Mostly!");
    }

    #[rstest]
    #[case("what happened on 2024-01-15?")]
    #[case("call me at 555-123-4567")]
    #[case("my extension is 555-1234")]
    fn test_dates_and_phone_numbers_are_not_arithmetic(#[case] utterance: &str) {
        assert_eq!(classify(utterance), LexicalVerdict::NoMatch, "{utterance}");
    }

    #[test]
    fn test_unspaced_subtraction_is_still_arithmetic() {
        let m = unique("what is 10-3?");
        assert_eq!(m.tool_id, "calculator");
        assert_eq!(m.arguments["expression"], "10-3");
    }

    #[test]
    fn test_more_specific_pattern_wins() {
        // web_search pins "search for ", find_files pins "search for files named "
        let m = unique("search for files named notes.txt");
        assert_eq!(m.tool_id, "find_files");
        assert_eq!(m.arguments["pattern"], "notes.txt");
    }

    #[test]
    fn test_no_match() {
        assert_eq!(classify("hello"), LexicalVerdict::NoMatch);
        assert_eq!(classify("tell me a joke about cats"), LexicalVerdict::NoMatch);
    }

    #[test]
    fn test_exact_tie_is_ambiguous() {
        let tied = vec![
            LexicalMatch {
                tool_id: "a".into(),
                arguments: Arguments::new(),
                specificity: 7,
            },
            LexicalMatch {
                tool_id: "b".into(),
                arguments: Arguments::new(),
                specificity: 7,
            },
            LexicalMatch {
                tool_id: "c".into(),
                arguments: Arguments::new(),
                specificity: 3,
            },
        ];
        match resolve(tied) {
            LexicalVerdict::Ambiguous(ms) => {
                let ids: Vec<&str> = ms.iter().map(|m| m.tool_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }
}
