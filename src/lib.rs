pub mod calendar;
pub mod catalog;
pub mod config;
pub mod episodes;
pub mod error;
pub mod http;
pub mod identity;
pub mod models;
pub mod notifications;
pub mod recommend;
pub mod session;
pub mod store;
pub mod sync;
pub mod watchlist;

pub use error::{Error, Result};
pub use session::Session;
