use colored::*;
use std::fmt;
use std::io::{IsTerminal, Write};

use crate::api::types::ReplyStatus;

/// Decides whether output gets ANSI colors. `var` looks up an environment
/// variable.
fn colors_wanted(var: impl Fn(&str) -> Option<String>, stdout_is_tty: bool) -> bool {
    // NO_COLOR wins over everything
    if var("NO_COLOR").is_some() {
        return false;
    }
    if var("CLICOLOR_FORCE").as_deref() == Some("1") {
        return true;
    }
    if var("CLICOLOR").as_deref() == Some("0") {
        return false;
    }
    stdout_is_tty
}

/// Applies the color preference to every `colored` string printed afterwards.
pub fn init_colors() {
    let wanted = colors_wanted(|key| std::env::var(key).ok(), std::io::stdout().is_terminal());
    colored::control::set_override(wanted);
}

pub fn window_title_set(title: &str) {
    if std::io::stdout().is_terminal() {
        let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::SetTitle(title));
    }
}

pub fn window_title_reset() {
    if std::io::stdout().is_terminal() {
        let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::SetTitle(""));
    }
}

/// Prints the assistant's reply on stdout under a header colored by status.
pub fn print_reply(status: ReplyStatus, reply: &str) {
    let header = match status {
        ReplyStatus::Success => "agent-zero".green().bold(),
        ReplyStatus::Error => "agent-zero (error)".red().bold(),
        ReplyStatus::Unknown => "agent-zero".yellow().bold(),
    };
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", header);
    let _ = writeln!(stdout, "{}", reply.trim_end());
    let _ = stdout.flush();
}

// Everything below writes to stderr so stdout carries only replies.

pub fn note(msg: &str) {
    eprintln!("{}", msg.dimmed());
}

pub fn error(msg: impl fmt::Display) {
    eprintln!("{} {}", "error:".red(), msg);
}

pub fn command_started(command: &str) {
    eprintln!("{} {}", "exec:".cyan(), command);
}

pub fn command_finished(output_chars: usize) {
    note(&format!("  ({} chars)", output_chars));
}

pub fn directive_failed(err: impl fmt::Display) {
    eprintln!("{} {}", "directive failed:".red(), err);
}
