use chrono::{DateTime, Local};
use crossterm::event::{
    KeyCode, KeyModifiers, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::terminal::supports_keyboard_enhancement;
use reedline::{
    EditCommand, Emacs, FileBackedHistory, History, HistoryItem, Prompt, PromptEditMode,
    PromptHistorySearch, PromptHistorySearchStatus, Reedline, ReedlineError, ReedlineEvent, Signal,
    default_emacs_keybindings,
};
use std::borrow::Cow;
use std::env;
use std::path::Path;
use tracing::warn;

use crate::repl::{InputEvent, InputSource};

/// Chat ids are long; the prompt only shows their head.
const PROMPT_CHAT_ID_CHARS: usize = 8;

pub struct LineEditor {
    reedline: Reedline,
}

impl LineEditor {
    /// `entries` seed up/down recall and Ctrl-R search, oldest first.
    /// Persisting new lines is left to the caller.
    pub fn new(entries: &[String], capacity: usize) -> LineEditor {
        let mut keybindings = default_emacs_keybindings();
        keybindings.add_binding(
            KeyModifiers::ALT,
            KeyCode::Backspace,
            ReedlineEvent::Edit(vec![EditCommand::BackspaceWord]),
        );
        // Works for Konsole
        keybindings.add_binding(
            KeyModifiers::ALT,
            KeyCode::Enter,
            ReedlineEvent::Edit(vec![EditCommand::InsertNewline]),
        );
        // Works for iTerm2 (fails on Terminal.app)
        // https://github.com/crossterm-rs/crossterm/issues/861
        keybindings.add_binding(
            KeyModifiers::SHIFT,
            KeyCode::Enter,
            ReedlineEvent::Edit(vec![EditCommand::InsertNewline]),
        );

        let mut reedline = Reedline::create()
            .use_bracketed_paste(true)
            .with_edit_mode(Box::new(Emacs::new(keybindings)))
            .with_ansi_colors(true);

        match seeded_history(entries, capacity) {
            Ok(history) => reedline = reedline.with_history(Box::new(history)),
            Err(e) => warn!("history recall disabled: {}", e),
        }

        LineEditor { reedline }
    }

    fn pre_readline(&self) {
        if let Ok(true) = supports_keyboard_enhancement() {
            let _ = crossterm::execute!(
                std::io::stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
            );
        }
    }

    /// Enhancement flags must be off outside the prompt; they interfere with
    /// Ctrl-C while a request is in flight.
    fn post_readline(&self) {
        // Terminals without enhancement support print a stray "1u" on pop.
        if let Ok(true) = supports_keyboard_enhancement() {
            let _ = crossterm::execute!(std::io::stdout(), PopKeyboardEnhancementFlags);
        }
    }
}

fn seeded_history(
    entries: &[String],
    capacity: usize,
) -> Result<FileBackedHistory, ReedlineError> {
    let mut history = FileBackedHistory::new(capacity.max(1))?;
    for entry in entries {
        history.save(HistoryItem::from_command_line(entry.as_str()))?;
    }
    Ok(history)
}

impl InputSource for LineEditor {
    fn read_input(&mut self, index: u32, chat_id: Option<&str>) -> InputEvent {
        let prompt = EditorPrompt::new(index, chat_id);
        self.pre_readline();
        let sig = self.reedline.read_line(&prompt);
        self.post_readline();
        match sig {
            Ok(Signal::Success(line)) => InputEvent::Line(line),
            Ok(Signal::CtrlC) => InputEvent::Interrupted,
            Ok(Signal::CtrlD) => InputEvent::EndOfInput,
            Err(e) => {
                warn!("could not read input: {}", e);
                InputEvent::EndOfInput
            }
            #[allow(unreachable_patterns)]
            _ => InputEvent::EndOfInput,
        }
    }
}

// ---

pub struct EditorPrompt {
    index: u32,
    chat_id: Option<String>,
}

impl EditorPrompt {
    pub fn new(index: u32, chat_id: Option<&str>) -> EditorPrompt {
        EditorPrompt {
            index,
            chat_id: chat_id.map(|id| id.chars().take(PROMPT_CHAT_ID_CHARS).collect()),
        }
    }
}

impl Prompt for EditorPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        match self.chat_id {
            Some(ref chat_id) => Cow::Owned(format!("[{}] {}", self.index, chat_id)),
            None => Cow::Owned(format!("[{}]", self.index)),
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        let now: DateTime<Local> = Local::now();
        let formatted_time = now.format("%m/%d/%y %I:%M:%S %p").to_string();
        Cow::Owned(format!("{} {}", abbreviate_cwd(), formatted_time))
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed(": ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("::: ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

// --

fn abbreviate_cwd() -> String {
    match env::current_dir() {
        Ok(cwd) => abbreviate_path(&cwd, dirs::home_dir().as_deref()),
        Err(_) => "?".to_string(),
    }
}

/// Replaces a leading home directory with `~`.
fn abbreviate_path(path: &Path, home_dir: Option<&Path>) -> String {
    if let Some(stripped) = home_dir.and_then(|home| path.strip_prefix(home).ok()) {
        if stripped.as_os_str().is_empty() {
            return "~".to_string();
        }
        return format!("~/{}", stripped.display());
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_path() {
        let home = Path::new("/home/ada");
        assert_eq!(abbreviate_path(Path::new("/home/ada"), Some(home)), "~");
        assert_eq!(
            abbreviate_path(Path::new("/home/ada/src/x"), Some(home)),
            "~/src/x"
        );
        assert_eq!(abbreviate_path(Path::new("/tmp"), Some(home)), "/tmp");
        assert_eq!(abbreviate_path(Path::new("/tmp"), None), "/tmp");
    }

    #[test]
    fn test_prompt_left() {
        assert_eq!(EditorPrompt::new(0, None).render_prompt_left(), "[0]");
        assert_eq!(
            EditorPrompt::new(3, Some("0123456789abcdef")).render_prompt_left(),
            "[3] 01234567"
        );
    }

    #[test]
    fn test_seeded_history() {
        let entries = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let history = seeded_history(&entries, 2).unwrap();
        assert_eq!(history.count_all().unwrap(), 2);
    }
}
