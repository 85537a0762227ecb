pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod storage;

pub use error::{ClientError, ErrorInfo, RefreshError, StorageError};
pub type Result<T> = std::result::Result<T, ClientError>;
pub use config::Settings;

pub use api::{CategoriesApi, ConversationsApi, ItemsApi, Page, Paginator};
pub use http::{ApiRequest, ApiResponse, FileUpload, FormData, RequestPipeline};
pub use session::{
    Credentials, LogoutReason, Registration, SessionEvent, SessionManager, SessionPhase,
    SessionState, TokenPair, UserProfile,
};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
