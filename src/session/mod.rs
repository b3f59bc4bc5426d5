//! Session state and cookie storage.

pub mod cookies;
pub mod state;

pub use cookies::{read_cookie, CookieJar};
pub use state::{Session, SessionStore, SessionView};
