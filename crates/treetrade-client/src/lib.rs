pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod inbox;
pub mod lifecycle;
pub mod listings;
pub mod live;
pub mod map;
pub mod messaging;
pub mod session;
pub mod transcript;
pub mod upload;

pub use app::Marketplace;
pub use backend::{Backend, LocalBackend};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind, Result};
pub use session::{AdminStore, Session};
