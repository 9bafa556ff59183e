use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use ledger::LedgerError;
use ledger::types::{GameId, LedgerSummary, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::AppError, middleware::AuthUser, models::Game};

// Create game request
#[derive(Deserialize)]
pub struct CreateGameRequest {
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub starting_budget: Decimal,
    /// Other users enrolled alongside the creator
    #[serde(default)]
    pub player_ids: Vec<UserId>,
    /// Lets a client pick the id of a new game; ids already in the catalog
    /// are refused
    pub game_id: Option<GameId>,
}

// Create game response
#[derive(Serialize)]
pub struct CreateGameResponse {
    pub success: bool,
    pub message: String,
    pub game: Game,
    pub summary: LedgerSummary,
    /// Players that already had a ledger for this game
    pub skipped_players: Vec<UserId>,
    /// Players whose ledger could not be created; the game exists without them
    pub failed_players: Vec<UserId>,
}

// One game of a user with its current ledger summary
#[derive(Serialize)]
pub struct GameOverview {
    pub game_id: GameId,
    pub game: Option<Game>,
    pub summary: LedgerSummary,
}

#[derive(Serialize)]
pub struct GamesResponse {
    pub success: bool,
    pub games: Vec<GameOverview>,
}

#[derive(Serialize)]
pub struct GameSummaryResponse {
    pub success: bool,
    pub game_id: GameId,
    pub summary: LedgerSummary,
}

// Get all games of a user
pub async fn list_games(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<GamesResponse>, AppError> {
    auth.ensure_owner(user_id)?;

    let games = state
        .games
        .games_for_user(user_id)
        .into_iter()
        .map(|(game_id, summary)| GameOverview {
            game_id,
            game: state.storage.get_game(game_id),
            summary,
        })
        .collect();

    Ok(Json(GamesResponse {
        success: true,
        games,
    }))
}

// Create a game and a ledger for the creator and every enrolled player
pub async fn create_game(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<UserId>,
    Json(payload): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<CreateGameResponse>), AppError> {
    auth.ensure_owner(user_id)?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Game name is required".to_string()));
    }
    if let (Some(start), Some(end)) = (payload.start, payload.end) {
        if end < start {
            return Err(AppError::BadRequest(
                "Game end must not be before its start".to_string(),
            ));
        }
    }

    let game_id = payload.game_id.unwrap_or_else(Uuid::new_v4);
    let game = Game {
        id: game_id,
        name: name.to_string(),
        start: payload.start,
        end: payload.end,
        created_by: user_id,
        players: vec![user_id],
        starting_budget: payload.starting_budget,
    };
    if !state.storage.insert_game(game.clone()) {
        return Err(AppError::Conflict(format!("Game {} already exists", game_id)));
    }

    // Without the creator's ledger there is no game
    let summary = match state
        .games
        .create_ledger(user_id, game_id, payload.starting_budget)
    {
        Ok(summary) => summary,
        Err(e) => {
            state.storage.remove_game(game_id);
            return Err(e.into());
        }
    };

    let mut seen = vec![user_id];
    let mut enrolled = Vec::new();
    let mut skipped_players = Vec::new();
    let mut failed_players = Vec::new();
    for player_id in payload.player_ids {
        if seen.contains(&player_id) {
            continue;
        }
        seen.push(player_id);
        if !state.storage.user_exists(player_id) {
            tracing::warn!(player_id, %game_id, "Enrolling player without a known account");
        }
        match state
            .games
            .create_ledger(player_id, game_id, payload.starting_budget)
        {
            Ok(_) => enrolled.push(player_id),
            Err(LedgerError::DuplicateGame { .. }) => skipped_players.push(player_id),
            Err(e) => {
                tracing::warn!(player_id, %game_id, error = %e, "Failed to enroll player");
                failed_players.push(player_id);
            }
        }
    }

    let game = state
        .storage
        .enroll_players(game_id, &enrolled)
        .unwrap_or(game);

    tracing::info!(
        user_id,
        %game_id,
        players = game.players.len(),
        failed = failed_players.len(),
        "Game created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateGameResponse {
            success: true,
            message: "Game created".to_string(),
            game,
            summary,
            skipped_players,
            failed_players,
        }),
    ))
}

// Get budget, number of transactions and number of coins held in a game
pub async fn get_game(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, game_id)): Path<(UserId, GameId)>,
) -> Result<Json<GameSummaryResponse>, AppError> {
    auth.ensure_owner(user_id)?;

    let summary = state.games.summary(user_id, game_id)?;
    Ok(Json(GameSummaryResponse {
        success: true,
        game_id,
        summary,
    }))
}
