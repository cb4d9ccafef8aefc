pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod report;
pub mod service;
pub mod session_cookie;
pub mod summarizer;

pub use config::Config;
pub use error::AppError;
pub use llm::{LanguageModel, OpenRouterModel, TimeoutModel};
pub use models::*;
pub use service::{AppState, build_router, create_app};
pub use session_cookie::CookieSigner;
