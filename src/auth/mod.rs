pub mod password;
pub mod principal;
pub mod session;
pub mod tokens;

pub use principal::{CurrentUser, Principal};
