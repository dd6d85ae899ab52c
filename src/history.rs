use reedline::{
    FileBackedHistory, History, HistoryItem, ReedlineError, SearchDirection, SearchQuery,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("could not open history {path}: {source}")]
    History {
        path: PathBuf,
        #[source]
        source: ReedlineError,
    },
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Line history for recall plus the chat id of the last persistent run.
///
/// The history file is reedline's format and is trimmed to `capacity` entries
/// on every write. The session file is not locked: two processes may race on
/// it and the last writer wins.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    history_path: PathBuf,
    session_path: PathBuf,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(history_path: PathBuf, session_path: PathBuf, capacity: usize) -> Self {
        HistoryStore {
            history_path,
            session_path,
            capacity: capacity.max(1),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Loads the file, merging in whatever other processes wrote since.
    fn open_history(&self) -> Result<FileBackedHistory, PersistenceError> {
        FileBackedHistory::with_file(self.capacity, self.history_path.clone()).map_err(|source| {
            PersistenceError::History {
                path: self.history_path.clone(),
                source,
            }
        })
    }

    /// Appends one entry and writes it through to disk.
    pub fn append(&self, entry: &str) -> Result<(), PersistenceError> {
        let mut history = self.open_history()?;
        history
            .save(HistoryItem::from_command_line(entry))
            .map_err(|source| PersistenceError::History {
                path: self.history_path.clone(),
                source,
            })?;
        history.sync().map_err(|source| PersistenceError::Write {
            path: self.history_path.clone(),
            source,
        })
    }

    /// Oldest first, at most `capacity` of the most recent entries.
    pub fn load(&self) -> Result<Vec<String>, PersistenceError> {
        let history = self.open_history()?;
        let items = history
            .search(SearchQuery::everything(SearchDirection::Forward, None))
            .map_err(|source| PersistenceError::History {
                path: self.history_path.clone(),
                source,
            })?;
        Ok(items.into_iter().map(|item| item.command_line).collect())
    }

    pub fn save_session(&self, chat_id: &str) -> Result<(), PersistenceError> {
        fs::write(&self.session_path, format!("{}\n", chat_id)).map_err(|source| {
            PersistenceError::Write {
                path: self.session_path.clone(),
                source,
            }
        })
    }

    /// The chat id saved by the last persistent run, if any.
    pub fn load_session(&self) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(&self.session_path) {
            Ok(contents) => {
                let chat_id = contents.trim();
                Ok(if chat_id.is_empty() {
                    None
                } else {
                    Some(chat_id.to_string())
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Read {
                path: self.session_path.clone(),
                source,
            }),
        }
    }
}
