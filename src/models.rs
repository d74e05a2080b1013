use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChapterError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sequential,
    Discovered,
}

/// An image confirmed to exist. `url` is the identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapedImage {
    pub url: String,
    pub file_type: String,
    pub alt_text: String,
    pub source_kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ScrapedImage {
    pub fn new(url: String, source_kind: SourceKind, alt_text: Option<String>, size: Option<u64>) -> Self {
        let file_type = file_extension(&url).unwrap_or_default();
        let alt_text = alt_text
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| file_stem(&url));
        Self {
            url,
            file_type,
            alt_text,
            source_kind,
            size,
        }
    }
}

/// Zero-padded incrementing filenames: `{base_path}{n:0pad_width}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequentialPattern {
    pub base_path: String,
    pub extension: String,
    pub pad_width: usize,
}

impl SequentialPattern {
    pub fn candidate(&self, index: u32) -> String {
        format!(
            "{}{:0width$}.{}",
            self.base_path,
            index,
            self.extension,
            width = self.pad_width
        )
    }

    pub fn candidates(&self, range: std::ops::Range<u32>) -> Vec<String> {
        range.map(|i| self.candidate(i)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterResult {
    pub chapter_number: u32,
    pub resolved_url: String,
    pub success: bool,
    pub image_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChapterError>,
    pub finished_at: DateTime<Utc>,
}

impl ChapterResult {
    pub fn succeeded(chapter_number: u32, resolved_url: String, image_count: usize) -> Self {
        Self {
            chapter_number,
            resolved_url,
            success: true,
            image_count,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(chapter_number: u32, resolved_url: String, image_count: usize, error: ChapterError) -> Self {
        Self {
            chapter_number,
            resolved_url,
            success: false,
            image_count,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStage {
    Loading,
    Scanning,
    Analyzing,
    Processing,
}

impl std::fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStage::Loading => write!(f, "loading"),
            ScrapeStage::Scanning => write!(f, "scanning"),
            ScrapeStage::Analyzing => write!(f, "analyzing"),
            ScrapeStage::Processing => write!(f, "processing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: ScrapeStage,
    pub chapter_number: u32,
    /// 1-based position of the chapter within the run.
    pub chapter_index: u32,
    pub chapter_count: u32,
    pub images_found: usize,
    pub candidates_checked: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every requested chapter was attempted.
    Completed,
    /// A failed chapter stopped a multi-chapter run.
    Halted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub images_found: usize,
    pub chapter_results: Vec<ChapterResult>,
    pub successful_chapters: Vec<u32>,
    pub failed_chapters: Vec<u32>,
}

/// Everything a run reports to its consumer. `Finished` is always last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScrapeEvent {
    Progress(ProgressUpdate),
    NewImage(ScrapedImage),
    ChapterFinished(ChapterResult),
    Finished(RunSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub status: RunStatus,
    pub images: Vec<ScrapedImage>,
    pub chapter_results: Vec<ChapterResult>,
}

impl ScrapeReport {
    pub fn successful_chapters(&self) -> Vec<u32> {
        self.chapter_results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.chapter_number)
            .collect()
    }

    pub fn failed_chapters(&self) -> Vec<u32> {
        self.chapter_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.chapter_number)
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            images_found: self.images.len(),
            chapter_results: self.chapter_results.clone(),
            successful_chapters: self.successful_chapters(),
            failed_chapters: self.failed_chapters(),
        }
    }
}

/// Lowercased extension of the URL path, ignoring query and fragment.
pub fn file_extension(url: &str) -> Option<String> {
    let path = strip_query(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn file_stem(url: &str) -> String {
    let path = strip_query(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name).to_string()
}

pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// `jpeg` and `jpg` name the same file type.
pub fn normalize_file_type(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext == "jpeg" {
        "jpg".to_string()
    } else {
        ext
    }
}
