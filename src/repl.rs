use tracing::{debug, warn};

use crate::api::ChatBackend;
use crate::api::client::TransportError;
use crate::api::types::Exchange;
use crate::ctrlc_handler::CtrlcHandler;
use crate::directive::Resolver;
use crate::history::HistoryStore;
use crate::session::ChatSession;
use crate::term;

const EXIT_TOKENS: [&str; 3] = ["quit", "exit", "q"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    /// Send the message given on the command line, print the reply, exit.
    OneShot,
    /// Keep prompting under the same chat id until told to stop.
    Persistent,
}

#[derive(Debug, PartialEq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl-C at the prompt
    Interrupted,
    /// Ctrl-D or a closed stdin
    EndOfInput,
}

/// Where persistent mode gets its lines from.
pub trait InputSource {
    /// `index` is the number of messages sent so far.
    fn read_input(&mut self, index: u32, chat_id: Option<&str>) -> InputEvent;
}

/// Input for one-shot runs, which never prompt.
pub struct NoInput;

impl InputSource for NoInput {
    fn read_input(&mut self, _index: u32, _chat_id: Option<&str>) -> InputEvent {
        InputEvent::EndOfInput
    }
}

#[derive(Debug)]
enum LoopState {
    Init(Option<String>),
    AwaitingInput,
    Resolving(String),
    Sending(String),
    Displaying(Exchange),
    Terminated(i32),
}

/// Drives one run: read, resolve directives, send, display.
///
/// Owns all mutable run state (chat id, turn count), so nothing about a
/// conversation lives in globals.
pub struct Repl<B: ChatBackend, I: InputSource> {
    mode: Mode,
    backend: B,
    input: I,
    resolver: Resolver,
    session: ChatSession,
    /// `None` in one-shot mode, which never touches local state.
    store: Option<HistoryStore>,
    record_history: bool,
    ctrlc_handler: Option<CtrlcHandler>,
    turns: u32,
    /// What this run last wrote to the session file.
    saved_chat_id: Option<String>,
}

impl<B: ChatBackend, I: InputSource> Repl<B, I> {
    pub fn new(mode: Mode, backend: B, input: I, resolver: Resolver, session: ChatSession) -> Self {
        Repl {
            mode,
            backend,
            input,
            resolver,
            session,
            store: None,
            record_history: false,
            ctrlc_handler: None,
            turns: 0,
            saved_chat_id: None,
        }
    }

    pub fn with_store(mut self, store: HistoryStore, record_history: bool) -> Self {
        if self.mode == Mode::Persistent {
            self.store = Some(store);
            self.record_history = record_history;
        }
        self
    }

    pub fn with_ctrlc_handler(mut self, ctrlc_handler: CtrlcHandler) -> Self {
        self.ctrlc_handler = Some(ctrlc_handler);
        self
    }

    /// Runs until the loop terminates and returns the process exit code.
    pub async fn run(&mut self, initial: Option<String>) -> i32 {
        let mut state = LoopState::Init(initial);
        loop {
            debug!("loop state: {:?}", state);
            state = match state {
                LoopState::Init(initial) => match (initial, self.mode) {
                    (Some(message), _) => LoopState::Resolving(message),
                    (None, Mode::Persistent) => LoopState::AwaitingInput,
                    (None, Mode::OneShot) => {
                        term::error("one-shot mode needs a message");
                        LoopState::Terminated(2)
                    }
                },
                LoopState::AwaitingInput => self.await_input(),
                LoopState::Resolving(raw) => {
                    let resolved = self.resolver.resolve(&raw).await;
                    if resolved != raw {
                        term::note(&format!(
                            "sending resolved message ({} chars)",
                            resolved.chars().count()
                        ));
                    }
                    LoopState::Sending(resolved)
                }
                LoopState::Sending(message) => match self.send(&message).await {
                    Ok(exchange) => LoopState::Displaying(exchange),
                    Err(e) => {
                        term::error(&e);
                        match self.mode {
                            Mode::OneShot => LoopState::Terminated(1),
                            Mode::Persistent => LoopState::AwaitingInput,
                        }
                    }
                },
                LoopState::Displaying(exchange) => {
                    self.display(exchange);
                    match self.mode {
                        Mode::OneShot => LoopState::Terminated(0),
                        Mode::Persistent => LoopState::AwaitingInput,
                    }
                }
                LoopState::Terminated(code) => {
                    self.finish().await;
                    return code;
                }
            };
        }
    }

    fn await_input(&mut self) -> LoopState {
        match self.input.read_input(self.turns, self.session.chat_id()) {
            InputEvent::Line(line) => {
                let trimmed = line.trim();
                if EXIT_TOKENS.contains(&trimmed) {
                    return LoopState::Terminated(0);
                }
                if trimmed.is_empty() {
                    return LoopState::AwaitingInput;
                }
                if self.record_history {
                    if let Some(ref store) = self.store {
                        if let Err(e) = store.append(&line) {
                            warn!("history not saved: {}", e);
                        }
                    }
                }
                LoopState::Resolving(line)
            }
            InputEvent::Interrupted | InputEvent::EndOfInput => LoopState::Terminated(0),
        }
    }

    /// Sends under the current chat id. Ctrl-C abandons the request and
    /// leaves the session as it was.
    async fn send(&mut self, message: &str) -> Result<Exchange, TransportError> {
        let chat_id = self.session.chat_id().map(str::to_string);
        let cancel = self.ctrlc_handler.as_mut().map(|h| h.cancel_token());

        let result = match cancel {
            Some((ref token, _)) => tokio::select! {
                res = self.backend.send_message(message, chat_id.as_deref()) => res,
                _ = token.cancelled() => Err(TransportError::Interrupted),
            },
            None => self.backend.send_message(message, chat_id.as_deref()).await,
        };

        if let (Some(handler), Some((_, handler_id))) = (self.ctrlc_handler.as_mut(), cancel) {
            handler.remove_handler(handler_id);
        }
        if result.is_ok() {
            self.turns += 1;
        }
        result
    }

    /// Prints the reply and, in persistent mode, records the chat id once the
    /// server has accepted a message under it.
    fn display(&mut self, exchange: Exchange) {
        term::print_reply(exchange.status, &exchange.reply);
        let changed = self.session.update(exchange.chat_id);
        if self.mode != Mode::Persistent {
            return;
        }
        let Some(chat_id) = self.session.chat_id() else {
            return;
        };
        if changed {
            term::note(&format!("chat id: {}", chat_id));
        }
        if self.saved_chat_id.as_deref() == Some(chat_id) {
            return;
        }
        if let Some(ref store) = self.store {
            match store.save_session(chat_id) {
                Ok(()) => self.saved_chat_id = Some(chat_id.to_string()),
                Err(e) => warn!("chat id not saved: {}", e),
            }
        }
    }

    async fn finish(&mut self) {
        if self.mode != Mode::Persistent {
            return;
        }
        if let Some(chat_id) = self.session.chat_id().map(str::to_string) {
            debug!("finishing chat {}", chat_id);
            if let Err(e) = self.backend.finish_chat(&chat_id).await {
                warn!("could not finish chat {}: {}", chat_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::ReplyStatus;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeBackend {
        replies: VecDeque<Result<Exchange, TransportError>>,
        sent: Vec<(String, Option<String>)>,
        finished: Vec<String>,
        /// A message that never gets a reply; the `Notify` fires once it is
        /// in flight.
        hang_on: Option<(String, Arc<Notify>)>,
    }

    impl FakeBackend {
        fn replying(replies: Vec<Result<Exchange, TransportError>>) -> Self {
            FakeBackend {
                replies: replies.into(),
                ..Default::default()
            }
        }
    }

    impl ChatBackend for FakeBackend {
        async fn send_message(
            &mut self,
            message: &str,
            chat_id: Option<&str>,
        ) -> Result<Exchange, TransportError> {
            self.sent
                .push((message.to_string(), chat_id.map(str::to_string)));
            if let Some((ref trigger, ref in_flight)) = self.hang_on {
                if message == trigger {
                    in_flight.notify_one();
                    return std::future::pending().await;
                }
            }
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Malformed("no reply scripted".into())))
        }

        async fn finish_chat(&mut self, chat_id: &str) -> Result<(), TransportError> {
            self.finished.push(chat_id.to_string());
            Ok(())
        }
    }

    struct ScriptedInput {
        events: VecDeque<InputEvent>,
    }

    impl ScriptedInput {
        fn lines(lines: &[&str]) -> Self {
            ScriptedInput {
                events: lines
                    .iter()
                    .map(|line| InputEvent::Line(line.to_string()))
                    .collect(),
            }
        }
    }

    impl InputSource for ScriptedInput {
        fn read_input(&mut self, _index: u32, _chat_id: Option<&str>) -> InputEvent {
            self.events.pop_front().unwrap_or(InputEvent::EndOfInput)
        }
    }

    fn reply(text: &str, chat_id: Option<&str>) -> Result<Exchange, TransportError> {
        Ok(Exchange {
            status: ReplyStatus::Success,
            reply: text.to_string(),
            chat_id: chat_id.map(str::to_string),
        })
    }

    fn repl<I: InputSource>(
        mode: Mode,
        backend: FakeBackend,
        input: I,
        resume: Option<&str>,
    ) -> Repl<FakeBackend, I> {
        Repl::new(
            mode,
            backend,
            input,
            Resolver::new("sh", None),
            ChatSession::new(resume.map(str::to_string)),
        )
    }

    fn store_in(dir: &Path) -> HistoryStore {
        HistoryStore::new(dir.join("history"), dir.join("last_chat_id"), 100)
    }

    #[tokio::test]
    async fn test_quit_sends_nothing() {
        for token in ["quit", "exit", "q", "  q  "] {
            let mut r = repl(
                Mode::Persistent,
                FakeBackend::default(),
                ScriptedInput::lines(&[token]),
                None,
            );
            assert_eq!(r.run(None).await, 0);
            assert!(r.backend.sent.is_empty());
        }
    }

    #[tokio::test]
    async fn test_interrupt_at_prompt_exits_cleanly() {
        let input = ScriptedInput {
            events: VecDeque::from([InputEvent::Interrupted]),
        };
        let mut r = repl(Mode::Persistent, FakeBackend::default(), input, None);
        assert_eq!(r.run(None).await, 0);
        assert!(r.backend.sent.is_empty());
    }

    #[tokio::test]
    async fn test_chat_id_continuity() {
        let backend = FakeBackend::replying(vec![reply("one", Some("X")), reply("two", Some("X"))]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["first", "", "second", "quit"]),
            None,
        );
        assert_eq!(r.run(None).await, 0);
        assert_eq!(
            r.backend.sent,
            vec![
                ("first".to_string(), None),
                ("second".to_string(), Some("X".to_string())),
            ]
        );
        assert_eq!(r.backend.finished, vec!["X".to_string()]);
    }

    #[tokio::test]
    async fn test_persistent_transport_error_keeps_going() {
        let backend = FakeBackend::replying(vec![
            reply("one", Some("X")),
            Err(TransportError::Malformed("boom".into())),
            reply("three", None),
        ]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["a", "b", "c"]),
            None,
        );
        assert_eq!(r.run(None).await, 0);
        assert_eq!(r.backend.sent.len(), 3);
        // Neither the failure nor the id-less reply moved the session.
        assert_eq!(r.backend.sent[2].1.as_deref(), Some("X"));
        assert_eq!(r.session.chat_id(), Some("X"));
        assert_eq!(r.turns, 2);
    }

    #[tokio::test]
    async fn test_one_shot_transport_error_exits_nonzero() {
        let backend = FakeBackend::replying(vec![Err(TransportError::Interrupted)]);
        let mut r = repl(Mode::OneShot, backend, NoInput, None);
        assert_eq!(r.run(Some("hello".to_string())).await, 1);
        assert_eq!(r.backend.sent.len(), 1);
        assert!(r.backend.finished.is_empty());
    }

    #[tokio::test]
    async fn test_one_shot_success() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::replying(vec![reply("hi", Some("X"))]);
        let mut r = repl(Mode::OneShot, backend, NoInput, None).with_store(store_in(dir.path()), true);
        assert_eq!(r.run(Some("hello".to_string())).await, 0);
        assert_eq!(r.backend.sent, vec![("hello".to_string(), None)]);
        // One-shot runs leave no local state and keep the chat open.
        assert!(r.backend.finished.is_empty());
        assert!(!dir.path().join("last_chat_id").exists());
        assert!(!dir.path().join("history").exists());
    }

    #[tokio::test]
    async fn test_one_shot_without_message() {
        let mut r = repl(Mode::OneShot, FakeBackend::default(), NoInput, None);
        assert_eq!(r.run(None).await, 2);
        assert!(r.backend.sent.is_empty());
    }

    #[tokio::test]
    async fn test_resume_id_used_on_first_send() {
        let backend = FakeBackend::replying(vec![reply("ok", None)]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["q"]),
            Some("old-chat"),
        );
        assert_eq!(r.run(Some("again".to_string())).await, 0);
        assert_eq!(
            r.backend.sent,
            vec![("again".to_string(), Some("old-chat".to_string()))]
        );
        assert_eq!(r.backend.finished, vec!["old-chat".to_string()]);
    }

    #[tokio::test]
    async fn test_history_and_session_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let backend = FakeBackend::replying(vec![reply("ok", Some("C1")), reply("ok", Some("C2"))]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["hello", "  ", "world", "exit"]),
            None,
        )
        .with_store(store.clone(), true);
        assert_eq!(r.run(None).await, 0);

        assert_eq!(store.load().unwrap(), vec!["hello", "world"]);
        assert_eq!(store.load_session().unwrap(), Some("C2".to_string()));
    }

    #[tokio::test]
    async fn test_incognito_skips_history_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let backend = FakeBackend::replying(vec![reply("ok", Some("C1"))]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["hello"]),
            None,
        )
        .with_store(store.clone(), false);
        assert_eq!(r.run(None).await, 0);

        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.load_session().unwrap(), Some("C1".to_string()));
    }

    #[tokio::test]
    async fn test_directives_resolved_before_send() {
        let backend = FakeBackend::replying(vec![reply("ok", None)]);
        let mut r = repl(
            Mode::OneShot,
            backend,
            NoInput,
            None,
        );
        assert_eq!(r.run(Some("see @/nonexistent/file".to_string())).await, 0);
        let (sent, _) = &r.backend.sent[0];
        assert!(sent.starts_with("see [agent-zero-cli:"));
    }

    #[tokio::test]
    async fn test_continued_chat_id_is_saved() {
        // The server echoes the id the run started with, or reports none.
        for reported in [Some("X"), None] {
            let dir = tempfile::tempdir().unwrap();
            let store = store_in(dir.path());
            store.save_session("OLD").unwrap();
            let backend = FakeBackend::replying(vec![reply("ok", reported)]);
            let mut r = repl(
                Mode::Persistent,
                backend,
                ScriptedInput::lines(&["hello", "q"]),
                Some("X"),
            )
            .with_store(store.clone(), true);
            assert_eq!(r.run(None).await, 0);
            assert_eq!(store.load_session().unwrap(), Some("X".to_string()));
        }
    }

    #[tokio::test]
    async fn test_failed_exchange_does_not_save_chat_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let backend = FakeBackend::replying(vec![Err(TransportError::Malformed("boom".into()))]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["hello"]),
            Some("X"),
        )
        .with_store(store.clone(), true);
        assert_eq!(r.run(None).await, 0);
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[tokio::test]
    async fn test_ctrlc_cancels_one_shot_request() {
        let in_flight = Arc::new(Notify::new());
        let mut backend = FakeBackend::default();
        backend.hang_on = Some(("hello".to_string(), Arc::clone(&in_flight)));
        let handler = CtrlcHandler::unattached();
        let mut r =
            repl(Mode::OneShot, backend, NoInput, Some("X")).with_ctrlc_handler(handler.clone());

        let (code, ()) = tokio::join!(r.run(Some("hello".to_string())), async {
            in_flight.notified().await;
            handler.trigger();
        });
        assert_eq!(code, 1);
        assert_eq!(r.turns, 0);
        assert_eq!(r.session.chat_id(), Some("X"));
        assert_eq!(handler.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_ctrlc_cancels_persistent_request_and_keeps_session() {
        let in_flight = Arc::new(Notify::new());
        let mut backend = FakeBackend::replying(vec![reply("one", Some("X")), reply("three", None)]);
        backend.hang_on = Some(("hang".to_string(), Arc::clone(&in_flight)));
        let handler = CtrlcHandler::unattached();
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["first", "hang", "third", "q"]),
            None,
        )
        .with_ctrlc_handler(handler.clone());

        let (code, ()) = tokio::join!(r.run(None), async {
            in_flight.notified().await;
            handler.trigger();
        });
        assert_eq!(code, 0);
        assert_eq!(r.turns, 2);
        assert_eq!(r.session.chat_id(), Some("X"));
        assert_eq!(r.backend.sent.len(), 3);
        assert_eq!(r.backend.sent[2].1.as_deref(), Some("X"));
        assert_eq!(r.backend.finished, vec!["X".to_string()]);
        assert_eq!(handler.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failures_do_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the state directory should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = store_in(&blocker);
        let backend = FakeBackend::replying(vec![reply("one", Some("X")), reply("two", Some("X"))]);
        let mut r = repl(
            Mode::Persistent,
            backend,
            ScriptedInput::lines(&["first", "second", "quit"]),
            None,
        )
        .with_store(store.clone(), true);

        assert_eq!(r.run(None).await, 0);
        assert_eq!(
            r.backend.sent,
            vec![
                ("first".to_string(), None),
                ("second".to_string(), Some("X".to_string())),
            ]
        );
        assert_eq!(r.saved_chat_id, None);
        assert!(store.load_session().is_err());
    }
}
