pub mod config;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod prober;
pub mod registry;
pub mod sites;
pub mod traits;
pub mod url_patterns;
pub mod utils;

pub use config::Config;
pub use error::{ChapterError, ErrorKind, Result, ScrapeError};
pub use gateway::FetchGateway;
pub use models::{ChapterResult, RunStatus, ScrapeEvent, ScrapeReport, ScrapedImage, SequentialPattern};
pub use orchestrator::{ScrapeHandle, ScrapeOptions, ScrapeRequest, Scraper};
pub use url_patterns::UrlPatternManager;
