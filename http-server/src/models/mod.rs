mod database;
mod game;
mod user;

pub use database::InMemoryStorage;
pub use game::Game;
pub use user::{AuthenticatedUser, User};
