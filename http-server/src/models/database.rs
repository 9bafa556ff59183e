use ledger::types::{GameId, UserId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Game, User};

// Simple in-memory storage for accounts, sessions and the game catalog
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    pub accounts: Arc<Mutex<HashMap<String, User>>>,
    pub games: Arc<Mutex<HashMap<GameId, Game>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // Stable user id derived from the email, so persisted ledgers find their
    // owner again after a restart
    fn user_id_for_email(email: &str) -> UserId {
        let mut hasher = Sha256::new();
        hasher.update(email.trim().to_lowercase().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        UserId::from_be_bytes(bytes)
    }

    // Session id is the hash of the login credentials
    pub fn session_id_for(email: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(email.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    // Get or create a user account with a specific session_id
    pub fn get_or_create_account_with_session(&self, email: &str, session_id: &str) -> User {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(user) = accounts.get(session_id) {
            return user.clone();
        }

        let new_user = User {
            user_id: Self::user_id_for_email(email),
            session_id: session_id.to_string(),
            email: email.to_string(),
        };

        tracing::info!(user_id = new_user.user_id, "Created account");
        accounts.insert(session_id.to_string(), new_user.clone());
        new_user
    }

    // Get user by session ID
    pub fn get_user_by_session_id(&self, session_id: &str) -> Option<User> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts.get(session_id).cloned()
    }

    pub fn user_exists(&self, user_id: UserId) -> bool {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts.values().any(|user| user.user_id == user_id)
    }

    /// Records a new game. Returns `false`, leaving the catalog alone, if the
    /// id is already taken.
    pub fn insert_game(&self, game: Game) -> bool {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        if games.contains_key(&game.id) {
            return false;
        }
        games.insert(game.id, game);
        true
    }

    pub fn remove_game(&self, game_id: GameId) -> Option<Game> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.remove(&game_id)
    }

    /// Adds players to a known game, skipping those already enrolled
    pub fn enroll_players(&self, game_id: GameId, players: &[UserId]) -> Option<Game> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        let game = games.get_mut(&game_id)?;
        for player in players {
            if !game.players.contains(player) {
                game.players.push(*player);
            }
        }
        Some(game.clone())
    }

    pub fn get_game(&self, game_id: GameId) -> Option<Game> {
        let games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.get(&game_id).cloned()
    }
}
