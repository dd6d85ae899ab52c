//! Expansion of inline directives in a user message.
//!
//! Two kinds of directive are recognized:
//!
//! - `` `cmd` `` runs `cmd` in the configured shell and substitutes its stdout.
//! - `@target` substitutes the contents of the file at `target`, or, if
//!   `target` is an absolute URL, an instruction asking the assistant to fetch
//!   it with its own fetch tool.
//!
//! Scanning ([`tokenize`]) is pure and separate from execution
//! ([`Resolver::resolve`]). Resolution is a single left-to-right pass: text
//! produced by a directive is never scanned again, so command output or file
//! contents cannot smuggle in further commands.

use std::fs;
use std::io;
use std::time::Duration;
use tracing::debug;

use crate::shell::{self, ShellError};
use crate::term;

/// Marks text inserted in place of a directive that could not be resolved.
pub const DIAGNOSTIC_PREFIX: &str = "[agent-zero-cli:";

#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    ShellCommand { raw_text: String },
    FileInclude { path: String },
    UrlInclude { url: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Text(String),
    Directive(Directive),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("command `{command}` failed (exit code {code}){stderr}")]
    CommandFailed {
        command: String,
        code: String,
        stderr: String,
    },
    #[error("command `{command}` {source}")]
    Command {
        command: String,
        #[source]
        source: ShellError,
    },
    #[error("cannot expand path {path}: {reason}")]
    PathExpansion { path: String, reason: String },
    #[error("cannot read {path}: {source}")]
    FileUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl DirectiveError {
    /// The inline text that replaces the failed directive.
    pub fn to_diagnostic(&self) -> String {
        format!("{} {}]", DIAGNOSTIC_PREFIX, self)
    }
}

/// Splits `message` into literal text and directives.
///
/// Concatenating the `Text` segments of a message with no directives
/// reproduces the message exactly.
pub fn tokenize(message: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = message;
    // `@` only starts a directive at the start of a word. This keeps e-mail
    // addresses and decorators literal.
    let mut at_word_start = true;

    while let Some(c) = rest.chars().next() {
        match c {
            '`' => {
                let run = rest.len() - rest.trim_start_matches('`').len();
                if run == 1 {
                    if let Some(close) = rest[1..].find('`') {
                        let raw_text = rest[1..1 + close].trim();
                        if !raw_text.is_empty() {
                            flush_literal(&mut literal, &mut segments);
                            segments.push(Segment::Directive(Directive::ShellCommand {
                                raw_text: raw_text.to_string(),
                            }));
                            rest = &rest[close + 2..];
                            at_word_start = false;
                            continue;
                        }
                    }
                }
                // Code fences, unclosed and empty spans stay as they are.
                literal.push_str(&rest[..run]);
                rest = &rest[run..];
                at_word_start = false;
            }
            '@' if at_word_start => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let target = &rest[1..end];
                if target.is_empty() {
                    literal.push('@');
                    rest = &rest[1..];
                    at_word_start = false;
                    continue;
                }
                flush_literal(&mut literal, &mut segments);
                segments.push(Segment::Directive(classify_inclusion(target)));
                rest = &rest[end..];
                at_word_start = false;
            }
            _ => {
                literal.push(c);
                rest = &rest[c.len_utf8()..];
                at_word_start = c.is_whitespace();
            }
        }
    }
    flush_literal(&mut literal, &mut segments);
    segments
}

fn flush_literal(literal: &mut String, segments: &mut Vec<Segment>) {
    if !literal.is_empty() {
        segments.push(Segment::Text(std::mem::take(literal)));
    }
}

/// URL form is tried first; anything that isn't an absolute URL with a host
/// is a file path.
fn classify_inclusion(target: &str) -> Directive {
    match url::Url::parse(target) {
        Ok(url) if url.host_str().is_some_and(|host| !host.is_empty()) => Directive::UrlInclude {
            url: target.to_string(),
        },
        _ => Directive::FileInclude {
            path: target.to_string(),
        },
    }
}

/// The text sent in place of `@url`. The assistant fetches the page itself.
pub fn url_fetch_instruction(url: &str) -> String {
    format!(
        "[Use your fetch tool to retrieve the content of {} and use it to answer]",
        url
    )
}

/// Removes all trailing line terminators.
fn trim_trailing_newlines(s: &str) -> &str {
    s.trim_end_matches(['\n', '\r'])
}

pub struct Resolver {
    shell: String,
    command_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(shell: &str, command_timeout: Option<Duration>) -> Self {
        Resolver {
            shell: shell.to_string(),
            command_timeout,
        }
    }

    /// Expands every directive in `message`. Never fails: a directive that
    /// can't be resolved becomes an inline diagnostic (see
    /// [`DIAGNOSTIC_PREFIX`]) and the rest of the message is still resolved.
    ///
    /// WARN: Backtick commands are executed without confirmation.
    pub async fn resolve(&self, message: &str) -> String {
        let mut resolved = String::with_capacity(message.len());
        for segment in tokenize(message) {
            match segment {
                Segment::Text(text) => resolved.push_str(&text),
                Segment::Directive(directive) => {
                    match self.resolve_directive(&directive).await {
                        Ok(text) => resolved.push_str(&text),
                        Err(e) => {
                            term::directive_failed(&e);
                            resolved.push_str(&e.to_diagnostic());
                        }
                    }
                }
            }
        }
        resolved
    }

    async fn resolve_directive(&self, directive: &Directive) -> Result<String, DirectiveError> {
        match directive {
            Directive::ShellCommand { raw_text } => self.run_command(raw_text).await,
            Directive::FileInclude { path } => read_file(path),
            Directive::UrlInclude { url } => {
                debug!("deferring fetch of {} to the assistant", url);
                Ok(url_fetch_instruction(url))
            }
        }
    }

    async fn run_command(&self, command: &str) -> Result<String, DirectiveError> {
        term::command_started(command);
        let output = shell::shell_exec(&self.shell, command, self.command_timeout)
            .await
            .map_err(|source| DirectiveError::Command {
                command: command.to_string(),
                source,
            })?;
        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(DirectiveError::CommandFailed {
                command: command.to_string(),
                code: output
                    .code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                },
            });
        }
        let stdout = trim_trailing_newlines(&output.stdout);
        term::command_finished(stdout.chars().count());
        Ok(stdout.to_string())
    }
}

fn read_file(raw_path: &str) -> Result<String, DirectiveError> {
    let path = shellexpand::full(raw_path)
        .map_err(|e| DirectiveError::PathExpansion {
            path: raw_path.to_string(),
            reason: format!("undefined variable {}", e.var_name),
        })?
        .into_owned();
    debug!("including file {}", path);
    fs::read_to_string(&path).map_err(|source| DirectiveError::FileUnreadable {
        path: raw_path.to_string(),
        source,
    })
}
