pub mod article;
pub mod error;

pub use article::{ArticleRecord, SummaryResult};
pub use error::{ErrorCategory, ErrorClassifier, GistError, ProviderError, Result, ResultExt};
