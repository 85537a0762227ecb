//! Marketplace API module for the Birii client
//!
//! Thin wrappers over the listing, category and conversation endpoints.
//! Payloads stay as JSON values; every call goes through the request
//! pipeline and so shares the session's token refresh.

mod categories;
mod conversations;
mod items;
mod pagination;

pub use categories::{CategoriesApi, CATEGORIES_PATH};
pub use conversations::{ConversationsApi, CONVERSATIONS_PATH};
pub use items::{ItemsApi, ITEMS_PATH};
pub use pagination::{Page, Paginator, DEFAULT_PAGE_SIZE};
