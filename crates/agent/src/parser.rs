//! Response parsing: raw model text in, exactly one [`Action`] out.
//!
//! The text is first repaired (truncated or missing close tags are
//! completed), then an ordered chain of [`ActionMatcher`]s is tried. The
//! first matcher whose block is present converts the text; everything
//! outside the block becomes the action's thought. When no matcher fires
//! the whole text is a message to the user that expects a reply, so
//! parsing never fails.
//!
//! Matchers run in priority order: finish, bash, ipython, browse. Blocks
//! are assumed not to nest inside one another; a finish block that wraps
//! an `<execute_bash>` block is read as a finish.

use devloop_core::Action;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Code the ipython kernel runs before the first cell.
pub const IPYTHON_INIT_CODE: &str = "from agentskills import *";

/// Prefix joining a browse block to the thought in a delegated task.
const DELEGATE_TASK_JOIN: &str = ". I should start with: ";

/// Tag kinds whose close tag is repaired before matching.
const REPAIRED_BLOCKS: [(&str, &str); 4] = [
    ("<execute_bash>", "</execute_bash>"),
    ("<execute_ipython>", "</execute_ipython>"),
    ("<execute_browse>", "</execute_browse>"),
    ("<finish>", "</finish>"),
];

static FINISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<finish>.*</finish>").expect("valid finish pattern"));
static BASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<execute_bash>(.*?)</execute_bash>").expect("valid bash pattern")
});
static IPYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<execute_ipython>(.*?)</execute_ipython>").expect("valid ipython pattern")
});
static BROWSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<execute_browse>(.*)</execute_browse>").expect("valid browse pattern")
});

/// Where a finish block's surrounding text ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishMode {
    /// In the finish action's `thought`.
    #[default]
    Thought,
    /// In `outputs.output`, handed back to a delegating parent.
    Outputs,
}

/// One link in the parser chain.
pub trait ActionMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Convert `text` if this matcher's block is present.
    fn try_parse(&self, text: &str) -> Option<Action>;
}

/// Text outside `span`, trimmed.
fn thought_without(text: &str, span: &str) -> String {
    text.replace(span, "").trim().to_string()
}

/// Inner text of a block, keeping only what follows the last repeated open tag.
fn block_body<'a>(inner: &'a str, open_tag: &str) -> &'a str {
    inner.rsplit(open_tag).next().unwrap_or(inner).trim()
}

pub struct FinishMatcher {
    mode: FinishMode,
}

impl FinishMatcher {
    pub fn new(mode: FinishMode) -> Self {
        Self { mode }
    }
}

impl ActionMatcher for FinishMatcher {
    fn name(&self) -> &'static str {
        "finish"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let span = FINISH.find(text)?.as_str();
        let rest = thought_without(text, span);
        Some(match self.mode {
            FinishMode::Thought => Action::Finish {
                outputs: Map::new(),
                thought: rest,
            },
            FinishMode::Outputs => {
                let mut outputs = Map::new();
                outputs.insert("output".into(), Value::String(rest));
                Action::Finish {
                    outputs,
                    thought: String::new(),
                }
            }
        })
    }
}

pub struct CmdRunMatcher;

impl ActionMatcher for CmdRunMatcher {
    fn name(&self) -> &'static str {
        "execute_bash"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let caps = BASH.captures(text)?;
        let span = caps.get(0)?.as_str();
        let command = block_body(caps.get(1)?.as_str(), "<execute_bash>");
        let thought = thought_without(text, span);
        if command == "exit" {
            return Some(Action::Finish {
                outputs: Map::new(),
                thought,
            });
        }
        Some(Action::Run {
            command: command.to_string(),
            thought,
            background: false,
        })
    }
}

pub struct IPythonMatcher;

impl ActionMatcher for IPythonMatcher {
    fn name(&self) -> &'static str {
        "execute_ipython"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let caps = IPYTHON.captures(text)?;
        let span = caps.get(0)?.as_str();
        Some(Action::RunIpython {
            code: block_body(caps.get(1)?.as_str(), "<execute_ipython>").to_string(),
            thought: thought_without(text, span),
            kernel_init_code: IPYTHON_INIT_CODE.to_string(),
        })
    }
}

/// Turns a browse block into a delegation to the browsing agent.
pub struct DelegateMatcher {
    agent: String,
}

impl DelegateMatcher {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl ActionMatcher for DelegateMatcher {
    fn name(&self) -> &'static str {
        "execute_browse"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let caps = BROWSE.captures(text)?;
        let span = caps.get(0)?.as_str();
        let browse = caps.get(1)?.as_str().trim();
        let thought = thought_without(text, span);

        let mut inputs = Map::new();
        inputs.insert(
            "task".into(),
            Value::String(format!("{thought}{DELEGATE_TASK_JOIN}{browse}")),
        );
        Some(Action::Delegate {
            agent: self.agent.clone(),
            inputs,
            thought,
        })
    }
}

/// Complete a truncated close tag, then append any close tag still missing.
pub fn repair(text: &str) -> String {
    let mut repaired = text.to_string();
    for (open, close) in REPAIRED_BLOCKS {
        let truncated = &close[..close.len() - 1];
        if repaired.contains(truncated) && !repaired.contains(close) {
            repaired = repaired.replace(truncated, close);
        }
        if repaired.contains(open) && !repaired.contains(close) {
            repaired.push_str(close);
        }
    }
    repaired
}

/// An ordered matcher chain with a message fallback.
pub struct ResponseParser {
    matchers: Vec<Box<dyn ActionMatcher>>,
}

impl ResponseParser {
    /// A parser with no matchers: every reply becomes a message.
    pub fn new() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Append a matcher at the lowest priority so far.
    pub fn with_matcher(mut self, matcher: impl ActionMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Finish, bash, ipython and browse-as-delegation.
    pub fn codeact(delegate_agent: impl Into<String>) -> Self {
        Self::new()
            .with_matcher(FinishMatcher::new(FinishMode::Thought))
            .with_matcher(CmdRunMatcher)
            .with_matcher(IPythonMatcher)
            .with_matcher(DelegateMatcher::new(delegate_agent))
    }

    /// Finish with outputs, bash and ipython.
    pub fn searcher() -> Self {
        Self::new()
            .with_matcher(FinishMatcher::new(FinishMode::Outputs))
            .with_matcher(CmdRunMatcher)
            .with_matcher(IPythonMatcher)
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn parse(&self, text: &str) -> Action {
        let repaired = repair(text);
        self.matchers
            .iter()
            .find_map(|m| m.try_parse(&repaired))
            .unwrap_or_else(|| Action::Message {
                content: repaired,
                images: Vec::new(),
                wait_for_response: true,
            })
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn with_thought(thought: &str, block: String) -> String {
    if thought.is_empty() {
        block
    } else {
        format!("{thought}\n{block}")
    }
}

/// Render an agent action back into the tag grammar it was parsed from.
///
/// Returns `None` for actions a model never writes directly.
pub fn render(action: &Action, finish_mode: FinishMode) -> Option<String> {
    match action {
        Action::Run {
            command, thought, ..
        } => Some(with_thought(
            thought,
            format!("<execute_bash>\n{command}\n</execute_bash>"),
        )),
        Action::RunIpython { code, thought, .. } => Some(with_thought(
            thought,
            format!("<execute_ipython>\n{code}\n</execute_ipython>"),
        )),
        Action::Delegate {
            inputs, thought, ..
        } => {
            let task = inputs.get("task").and_then(Value::as_str).unwrap_or_default();
            let browse = task
                .rsplit_once(DELEGATE_TASK_JOIN)
                .map_or(task, |(_, browse)| browse);
            Some(with_thought(
                thought,
                format!("<execute_browse>\n{browse}\n</execute_browse>"),
            ))
        }
        Action::Finish {
            outputs, thought, ..
        } => {
            let text = match finish_mode {
                FinishMode::Thought => thought.as_str(),
                FinishMode::Outputs => outputs
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            };
            Some(with_thought(text, "<finish></finish>".to_string()))
        }
        Action::Message { content, .. } => Some(content.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codeact() -> ResponseParser {
        ResponseParser::codeact("browser")
    }

    #[test]
    fn bash_block_with_thought() {
        let action = codeact().parse("thinking...\n<execute_bash>ls -la</execute_bash>");
        assert_eq!(
            action,
            Action::Run {
                command: "ls -la".into(),
                thought: "thinking...".into(),
                background: false,
            }
        );
    }

    #[test]
    fn unterminated_exit_becomes_finish() {
        let action = codeact().parse("<execute_bash>exit");
        assert!(matches!(action, Action::Finish { ref thought, .. } if thought.is_empty()));
    }

    #[test]
    fn truncated_close_tag_is_completed() {
        assert_eq!(
            repair("<execute_ipython>print(1)</execute_ipython"),
            "<execute_ipython>print(1)</execute_ipython>"
        );
        let action = codeact().parse("<execute_ipython>print(1)</execute_ipython");
        assert!(matches!(action, Action::RunIpython { ref code, .. } if code == "print(1)"));
    }

    #[test]
    fn finish_wins_over_bash() {
        let action = codeact().parse("done <execute_bash>ls</execute_bash>\n<finish></finish>");
        assert!(matches!(action, Action::Finish { .. }));
    }

    #[test]
    fn finish_wrapping_a_bash_block_is_a_finish() {
        let action = codeact().parse("<finish><execute_bash>rm -rf /</execute_bash></finish>");
        assert_eq!(action.kind(), "finish");
    }

    #[test]
    fn bash_wins_over_ipython() {
        let action = codeact().parse(
            "<execute_ipython>x = 1</execute_ipython>\n<execute_bash>pwd</execute_bash>",
        );
        match action {
            Action::Run { command, thought, .. } => {
                assert_eq!(command, "pwd");
                assert_eq!(thought, "<execute_ipython>x = 1</execute_ipython>");
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn repeated_open_tag_keeps_last_segment() {
        let action = codeact().parse("<execute_bash>ls<execute_bash>cat a.txt</execute_bash>");
        assert!(matches!(action, Action::Run { ref command, .. } if command == "cat a.txt"));
    }

    #[test]
    fn ipython_carries_init_code() {
        let action = codeact().parse("<execute_ipython>\nimport os\n</execute_ipython>");
        match action {
            Action::RunIpython {
                code,
                kernel_init_code,
                ..
            } => {
                assert_eq!(code, "import os");
                assert_eq!(kernel_init_code, IPYTHON_INIT_CODE);
            }
            other => panic!("expected ipython, got {other:?}"),
        }
    }

    #[test]
    fn browse_becomes_delegation() {
        let action =
            codeact().parse("I need the docs\n<execute_browse>Open docs.rs</execute_browse>");
        match action {
            Action::Delegate {
                agent,
                inputs,
                thought,
            } => {
                assert_eq!(agent, "browser");
                assert_eq!(thought, "I need the docs");
                assert_eq!(
                    inputs["task"],
                    "I need the docs. I should start with: Open docs.rs"
                );
            }
            other => panic!("expected delegate, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_asks_the_user() {
        let action = codeact().parse("Which file should I edit?");
        assert_eq!(
            action,
            Action::Message {
                content: "Which file should I edit?".into(),
                images: vec![],
                wait_for_response: true,
            }
        );
    }

    #[test]
    fn empty_chain_always_falls_back() {
        let action = ResponseParser::new().parse("<execute_bash>ls</execute_bash>");
        assert!(matches!(action, Action::Message { .. }));
    }

    #[test]
    fn searcher_finish_puts_text_in_outputs() {
        let action = ResponseParser::searcher().parse("Found it in src/lib.rs\n<finish>");
        match action {
            Action::Finish { outputs, thought } => {
                assert_eq!(outputs["output"], "Found it in src/lib.rs");
                assert!(thought.is_empty());
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn searcher_ignores_browse_blocks() {
        let action = ResponseParser::searcher().parse("<execute_browse>x</execute_browse>");
        assert!(matches!(action, Action::Message { .. }));
        assert_eq!(
            ResponseParser::searcher().matcher_names(),
            ["finish", "execute_bash", "execute_ipython"]
        );
    }

    #[test]
    fn rendered_actions_parse_back() {
        let parser = codeact();
        let actions = [
            Action::Run {
                command: "cargo test".into(),
                thought: "run the tests".into(),
                background: false,
            },
            Action::RunIpython {
                code: "print('hi')".into(),
                thought: String::new(),
                kernel_init_code: IPYTHON_INIT_CODE.into(),
            },
            parser.parse("look it up\n<execute_browse>search crates.io</execute_browse>"),
            Action::finish("all done"),
        ];
        for action in actions {
            let text = render(&action, FinishMode::Thought).unwrap();
            assert_eq!(parser.parse(&text), action, "round trip of {text:?}");
        }
    }
}
