mod connection;
mod shared;

pub use connection::{Connection, ConnectionKey, Credentials, InvalidConnectionKeyError};
pub use shared::entity::{InvalidIDError, UserId};
