//! # Autopost Channels
//!
//! Transport implementations behind the engine's boundary traits. The engine
//! only ever sees classified `SendOutcome`s; everything Bot-API-specific
//! lives here.

pub mod notify;
pub mod telegram;

pub use notify::TelegramNotify;
pub use telegram::TelegramSender;
