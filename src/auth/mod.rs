mod password;
mod session;

pub use password::{
    PasswordHasherConfig, decode_finish_blob, encode_finish_blob, generate_exchange_nonce,
};
pub use session::{
    AuthError, AuthUser, RequireAdmin, SESSION_COOKIE, cookie_value, session_clear_cookie,
    session_set_cookie,
};
