pub mod coins;
pub mod games;
pub mod markets;
pub mod users;
