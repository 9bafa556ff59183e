use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::error::RepositoryError;
use super::game_ledger::GameLedger;
use super::types::{GameId, UserId};

/// Persisted form of every game a user takes part in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDocument {
    pub user_id: UserId,
    pub games: Vec<GameLedger>,
}

/// Durable storage for ledgers.
///
/// `save_game` is called with the fully applied next state of a ledger before
/// that state becomes visible; an error means the mutation is discarded.
pub trait LedgerRepository: Send + Sync {
    fn load_all(&self) -> Result<Vec<UserDocument>, RepositoryError>;

    fn save_game(&self, user_id: UserId, ledger: &GameLedger) -> Result<(), RepositoryError>;
}

/// Keeps documents in memory; nothing survives the process
#[derive(Default)]
pub struct MemoryRepository {
    documents: Mutex<HashMap<UserId, BTreeMap<GameId, GameLedger>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerRepository for MemoryRepository {
    fn load_all(&self) -> Result<Vec<UserDocument>, RepositoryError> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents
            .iter()
            .map(|(user_id, games)| UserDocument {
                user_id: *user_id,
                games: games.values().cloned().collect(),
            })
            .collect())
    }

    fn save_game(&self, user_id: UserId, ledger: &GameLedger) -> Result<(), RepositoryError> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents
            .entry(user_id)
            .or_default()
            .insert(ledger.game_id(), ledger.clone());
        Ok(())
    }
}

/// One `user-<id>.json` document per user inside a directory.
///
/// Documents are rewritten through a temporary file and a rename so a crash
/// mid-write never leaves a truncated document behind.
pub struct JsonFileRepository {
    dir: PathBuf,
    // Serializes read-modify-write of a user document across ledgers
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn document_path(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("user-{}.json", user_id))
    }

    fn read_document(path: &Path) -> Result<UserDocument, RepositoryError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl LedgerRepository for JsonFileRepository {
    fn load_all(&self) -> Result<Vec<UserDocument>, RepositoryError> {
        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_document = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("user-") && name.ends_with(".json"));
            if is_document {
                documents.push(Self::read_document(&path)?);
            }
        }
        documents.sort_by_key(|doc| doc.user_id);
        tracing::info!(
            dir = %self.dir.display(),
            users = documents.len(),
            "Loaded ledger documents"
        );
        Ok(documents)
    }

    fn save_game(&self, user_id: UserId, ledger: &GameLedger) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.document_path(user_id);
        let mut document = if path.exists() {
            Self::read_document(&path)?
        } else {
            UserDocument {
                user_id,
                games: Vec::new(),
            }
        };

        match document
            .games
            .iter_mut()
            .find(|game| game.game_id() == ledger.game_id())
        {
            Some(game) => *game = ledger.clone(),
            None => document.games.push(ledger.clone()),
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&document)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
