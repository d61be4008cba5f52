pub mod api;
pub mod cache;

pub use api::{AccountsApi, HttpAccountsApi, TokenGetter};
pub use cache::{AccountCache, AccountEvent, AccountPatch, AccountUpdates, FETCH_COOLDOWN};
