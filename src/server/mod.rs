pub mod access;
mod admin;
pub mod compress;
pub mod dto;
pub mod events;
mod login;
pub mod response;
mod router;
mod sync;
pub mod validation;
pub mod wiki;

pub use admin::admin_router;
pub use login::login_router;
pub use router::{AppState, create_router};
pub use sync::sync_router;
