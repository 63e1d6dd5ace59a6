//! Answers to the questions a mutation needs before it talks to the backend.
//!
//! The synchronizer awaits a [`Dialog`] instead of blocking on a prompt, so a
//! caller can answer from a terminal, from command-line flags, or from a
//! script in tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};

/// What an input prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Data,
    User,
}

#[async_trait]
pub trait Dialog: Send + Sync {
    /// `false` means declined or dismissed.
    async fn confirm(&self, message: &str) -> bool;

    /// `None` means dismissed. `default` pre-fills the answer.
    async fn prompt(&self, field: Field, message: &str, default: Option<&str>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirm(bool),
    Input(Option<String>),
}

/// Replays canned answers in order. Exhausted or mismatched answers count as
/// a dismissal.
#[derive(Debug, Default)]
pub struct ScriptedDialog {
    answers: Mutex<VecDeque<Answer>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_confirm(self, yes: bool) -> Self {
        self.answers.lock().push_back(Answer::Confirm(yes));
        self
    }

    pub fn then_answer(self, text: impl Into<String>) -> Self {
        self.answers.lock().push_back(Answer::Input(Some(text.into())));
        self
    }

    pub fn then_dismiss(self) -> Self {
        self.answers.lock().push_back(Answer::Input(None));
        self
    }

    /// Every message shown so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().len()
    }
}

#[async_trait]
impl Dialog for ScriptedDialog {
    async fn confirm(&self, message: &str) -> bool {
        self.asked.lock().push(message.to_string());
        matches!(self.answers.lock().pop_front(), Some(Answer::Confirm(true)))
    }

    async fn prompt(&self, _field: Field, message: &str, _default: Option<&str>) -> Option<String> {
        self.asked.lock().push(message.to_string());
        match self.answers.lock().pop_front() {
            Some(Answer::Input(text)) => text,
            _ => None,
        }
    }
}

/// Reads answers from stdin, writing questions to stderr.
pub struct TerminalDialog {
    stdin: tokio::sync::Mutex<BufReader<Stdin>>,
}

impl Default for TerminalDialog {
    fn default() -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl TerminalDialog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ask(&self, question: &str) -> Option<String> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(question.as_bytes()).await.ok()?;
        stderr.flush().await.ok()?;

        let mut line = String::new();
        let read = self.stdin.lock().await.read_line(&mut line).await.ok()?;
        if read == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Dialog for TerminalDialog {
    async fn confirm(&self, message: &str) -> bool {
        match self.ask(&format!("{message} [y/N] ")).await {
            Some(reply) => matches!(reply.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }

    async fn prompt(&self, _field: Field, message: &str, default: Option<&str>) -> Option<String> {
        let question = match default {
            Some(d) => format!("{message} [{d}] "),
            None => format!("{message} "),
        };
        let reply = self.ask(&question).await?;
        Some(prompt_reply(reply, default))
    }
}

/// An empty reply to a pre-filled prompt keeps the pre-filled value.
fn prompt_reply(reply: String, default: Option<&str>) -> String {
    match default {
        Some(d) if reply.is_empty() => d.to_string(),
        _ => reply,
    }
}

/// Answers from command-line flags first, falling back to another dialog for
/// anything not given.
pub struct PresetDialog<D> {
    data: Option<String>,
    user: Option<String>,
    assume_yes: bool,
    fallback: D,
}

impl<D: Dialog> PresetDialog<D> {
    pub fn new(fallback: D) -> Self {
        Self {
            data: None,
            user: None,
            assume_yes: false,
            fallback,
        }
    }

    pub fn data(mut self, data: Option<String>) -> Self {
        self.data = data;
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }
}

#[async_trait]
impl<D: Dialog> Dialog for PresetDialog<D> {
    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        self.fallback.confirm(message).await
    }

    async fn prompt(&self, field: Field, message: &str, default: Option<&str>) -> Option<String> {
        let preset = match field {
            Field::Data => &self.data,
            Field::User => &self.user,
        };
        match preset {
            Some(value) => Some(value.clone()),
            None => self.fallback.prompt(field, message, default).await,
        }
    }
}
