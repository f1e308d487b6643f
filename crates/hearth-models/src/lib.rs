pub mod room;
pub mod user;
pub mod wire;

pub use room::Room;
pub use user::User;
pub use wire::{ClientMessage, HistoryMessage, ServerMessage};
