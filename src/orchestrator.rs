//! Drives a scrape run chapter by chapter.
//!
//! `Idle -> LoadingChapter(n) -> SequentialScan | DiscoveryScan -> ChapterDone -> LoadingChapter(n+1) | Stopped`
//!
//! Every run owns its `seen_urls` set and chapter results; the gateway is the
//! only state shared with other runs. Events go out on one channel and the
//! last one is always `ScrapeEvent::Finished`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, ScraperConfig};
use crate::detector;
use crate::error::{ChapterError, Result, ScrapeError};
use crate::extractor::{self, Extractor};
use crate::gateway::FetchGateway;
use crate::models::{
    file_extension, normalize_file_type, ChapterResult, ProgressUpdate, RunStatus, ScrapeEvent, ScrapeReport,
    ScrapeStage, ScrapedImage, SequentialPattern, SourceKind,
};
use crate::prober::{ImageProber, MissTracker, ProbeHit, ProbeMode};
use crate::url_patterns::UrlPatternManager;
use crate::utils::HttpClient;

/// Runs with at least this many chapters never wait less than
/// [`LONG_RUN_MIN_INTERVAL`] between chapter fetches.
pub const LONG_RUN_CHAPTERS: u32 = 15;
pub const LONG_RUN_MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Decides whether a confirmed image is reported.
pub type ImageFilter = Arc<dyn Fn(&ScrapedImage) -> bool + Send + Sync>;

pub type EventSink = mpsc::UnboundedSender<ScrapeEvent>;

#[derive(Clone)]
pub struct ScrapeOptions {
    pub consecutive_miss_threshold: u32,
    pub chapter_count: u32,
    pub validate_images: bool,
    pub fetch_interval: Duration,
    pub filter: Option<ImageFilter>,
}

impl ScrapeOptions {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            consecutive_miss_threshold: config.consecutive_miss_threshold,
            chapter_count: config.chapter_count,
            validate_images: config.validate_images,
            fetch_interval: config.fetch_interval(),
            filter: None,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ScrapedImage) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// The inter-chapter wait actually used for this run.
    pub fn effective_fetch_interval(&self) -> Duration {
        if self.chapter_count >= LONG_RUN_CHAPTERS && self.fetch_interval < LONG_RUN_MIN_INTERVAL {
            LONG_RUN_MIN_INTERVAL
        } else {
            self.fetch_interval
        }
    }
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self::from_config(&ScraperConfig::default())
    }
}

impl fmt::Debug for ScrapeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeOptions")
            .field("consecutive_miss_threshold", &self.consecutive_miss_threshold)
            .field("chapter_count", &self.chapter_count)
            .field("validate_images", &self.validate_images)
            .field("fetch_interval", &self.fetch_interval)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub root_url: String,
    pub file_types: Vec<String>,
    pub options: ScrapeOptions,
}

impl ScrapeRequest {
    pub fn new(root_url: impl Into<String>, file_types: Vec<String>) -> Self {
        Self {
            root_url: root_url.into(),
            file_types,
            options: ScrapeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }
}

/// A run spawned on the runtime. `events` closes after `Finished`.
pub struct ScrapeHandle {
    pub events: mpsc::UnboundedReceiver<ScrapeEvent>,
    pub task: JoinHandle<Result<ScrapeReport>>,
}

/// Probe tuning that is fixed per scraper rather than per request.
#[derive(Debug, Clone)]
struct ScanSettings {
    batch_size: usize,
    probe_concurrency: usize,
    max_sequence_length: u32,
    load_timeout: Duration,
}

impl From<&ScraperConfig> for ScanSettings {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            probe_concurrency: config.probe_concurrency.max(1),
            max_sequence_length: config.max_sequence_length.max(1),
            load_timeout: config.load_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct Scraper {
    gateway: Arc<FetchGateway>,
    patterns: Arc<UrlPatternManager>,
    extractor: Arc<Extractor>,
    settings: ScanSettings,
}

/// Mutable state owned by one run.
struct RunState {
    root_url: String,
    file_types: HashSet<String>,
    options: ScrapeOptions,
    sink: EventSink,
    seen_urls: HashSet<String>,
    images: Vec<ScrapedImage>,
    chapter_results: Vec<ChapterResult>,
    candidates_checked: usize,
}

#[derive(Debug, Clone, Copy)]
struct ChapterPosition {
    number: u32,
    /// 1-based.
    index: u32,
}

impl RunState {
    fn send(&self, event: ScrapeEvent) {
        // A consumer that hung up does not stop the run.
        let _ = self.sink.send(event);
    }

    fn progress(&self, stage: ScrapeStage, chapter: ChapterPosition, message: impl Into<String>) {
        self.send(ScrapeEvent::Progress(ProgressUpdate {
            stage,
            chapter_number: chapter.number,
            chapter_index: chapter.index,
            chapter_count: self.options.chapter_count,
            images_found: self.images.len(),
            candidates_checked: self.candidates_checked,
            message: message.into(),
        }));
    }

    fn wants_file_type(&self, url: &str) -> bool {
        file_extension(url).is_some_and(|ext| self.file_types.contains(&normalize_file_type(&ext)))
    }

    /// Records a confirmed candidate and emits it unless the filter rejects it.
    fn confirm(&mut self, hit: ProbeHit, kind: SourceKind, alts: &HashMap<String, String>) -> bool {
        self.seen_urls.insert(hit.url.clone());
        let alt = alts.get(&hit.url).cloned();
        let image = ScrapedImage::new(hit.url, kind, alt, hit.content_length);

        if let Some(filter) = &self.options.filter {
            if !filter(&image) {
                debug!("[SCRAPER] filtered out {}", image.url);
                return false;
            }
        }

        self.send(ScrapeEvent::NewImage(image.clone()));
        self.images.push(image);
        true
    }

    fn report(&self, status: RunStatus) -> ScrapeReport {
        ScrapeReport {
            status,
            images: self.images.clone(),
            chapter_results: self.chapter_results.clone(),
        }
    }
}

impl Scraper {
    pub fn new(gateway: Arc<FetchGateway>, patterns: Arc<UrlPatternManager>, config: &ScraperConfig) -> Self {
        Self {
            gateway,
            patterns,
            extractor: Arc::new(Extractor::new(config.max_sequence_length)),
            settings: ScanSettings::from(config),
        }
    }

    /// Builds the reqwest transport, gateway and pattern manager described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = HttpClient::new(&config.gateway)?;
        let gateway = FetchGateway::from_config(Arc::new(client), &config.gateway);
        let patterns = match &config.patterns.file {
            Some(path) if std::path::Path::new(path).exists() => UrlPatternManager::load_file(path)?,
            Some(path) => {
                warn!("[SCRAPER] pattern file {} not found, using URL fallback only", path);
                UrlPatternManager::new()
            }
            None => UrlPatternManager::new(),
        };
        info!("[SCRAPER] loaded {} URL pattern(s)", patterns.len());
        Ok(Self::new(Arc::new(gateway), Arc::new(patterns), &config.scraper))
    }

    pub fn gateway(&self) -> &Arc<FetchGateway> {
        &self.gateway
    }

    pub fn patterns(&self) -> &UrlPatternManager {
        &self.patterns
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Spawns the run and hands back its event stream.
    pub fn start(&self, request: ScrapeRequest, cancel: CancellationToken) -> ScrapeHandle {
        let (sink, events) = mpsc::unbounded_channel();
        let scraper = self.clone();
        let task = tokio::spawn(async move { scraper.scrape(request, sink, cancel).await });
        ScrapeHandle { events, task }
    }

    /// Runs to completion, halting or cancellation. A single-chapter run
    /// whose chapter failed returns `ScrapeError::ChapterFailed`.
    pub async fn scrape(&self, request: ScrapeRequest, sink: EventSink, cancel: CancellationToken) -> Result<ScrapeReport> {
        let root = Url::parse(request.root_url.trim()).map_err(|_| ScrapeError::invalid_url(&request.root_url))?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(ScrapeError::invalid_url(&request.root_url));
        }
        let file_types: HashSet<String> = request
            .file_types
            .iter()
            .map(|t| normalize_file_type(t))
            .filter(|t| !t.is_empty())
            .collect();
        if file_types.is_empty() {
            return Err(ScrapeError::NoFileTypes);
        }

        let mut options = request.options;
        options.chapter_count = options.chapter_count.max(1);

        info!(
            "[SCRAPER] starting run at {} ({} chapter(s), types: {:?})",
            root,
            options.chapter_count,
            file_types
        );

        let mut run = RunState {
            root_url: root.to_string(),
            file_types,
            options,
            sink,
            seen_urls: HashSet::new(),
            images: Vec::new(),
            chapter_results: Vec::new(),
            candidates_checked: 0,
        };

        let status = match self.run_chapters(&mut run, &cancel).await {
            Ok(status) => status,
            Err(e) if e.is_cancelled() => {
                info!("[SCRAPER] run cancelled after {} image(s)", run.images.len());
                RunStatus::Cancelled
            }
            Err(e) => return Err(e),
        };

        let report = run.report(status);
        run.send(ScrapeEvent::Finished(report.summary()));
        info!(
            "[SCRAPER] run {:?}: {} image(s), chapters ok {:?}, failed {:?}",
            status,
            report.images.len(),
            report.successful_chapters(),
            report.failed_chapters()
        );

        if run.options.chapter_count == 1 {
            if let Some(ChapterResult {
                chapter_number,
                error: Some(error),
                ..
            }) = report.chapter_results.first()
            {
                return Err(ScrapeError::ChapterFailed {
                    chapter: *chapter_number,
                    error: error.clone(),
                });
            }
        }

        Ok(report)
    }

    async fn run_chapters(&self, run: &mut RunState, cancel: &CancellationToken) -> Result<RunStatus> {
        let prober = ImageProber::new(
            Arc::clone(&self.gateway),
            ProbeMode::from_validate_flag(run.options.validate_images),
        )
        .with_load_timeout(self.settings.load_timeout)
        .with_concurrency(self.settings.probe_concurrency);

        let interval = run.options.effective_fetch_interval();
        if interval != run.options.fetch_interval {
            warn!(
                "[SCRAPER] {} chapters requested, raising fetch interval from {:?} to {:?}",
                run.options.chapter_count, run.options.fetch_interval, interval
            );
        }

        let first_number = self.patterns.current_chapter_number(&run.root_url).unwrap_or(1);
        let chapter_count = run.options.chapter_count;

        for offset in 0..chapter_count {
            let chapter = ChapterPosition {
                number: first_number.saturating_add(offset),
                index: offset + 1,
            };

            if offset > 0 {
                run.progress(ScrapeStage::Loading, chapter, format!("waiting {:?} before next chapter", interval));
                sleep_or_cancel(interval, cancel).await?;
            }

            let chapter_url = if offset == 0 {
                Some(run.root_url.clone())
            } else {
                self.patterns.generate_chapter_url(&run.root_url, chapter.number)
            };

            let result = match chapter_url {
                Some(url) => self.scrape_chapter(run, &prober, chapter, url, cancel).await?,
                None => {
                    warn!("[SCRAPER] no URL for chapter {}", chapter.number);
                    ChapterResult::failed(chapter.number, String::new(), 0, ChapterError::NoChapterUrl)
                }
            };

            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            let failed = !result.success;
            run.chapter_results.push(result.clone());
            run.send(ScrapeEvent::ChapterFinished(result));

            if failed && chapter_count > 1 {
                warn!("[SCRAPER] chapter {} failed, stopping run", chapter.number);
                return Ok(RunStatus::Halted);
            }
        }

        Ok(RunStatus::Completed)
    }

    async fn scrape_chapter(
        &self,
        run: &mut RunState,
        prober: &ImageProber,
        chapter: ChapterPosition,
        url: String,
        cancel: &CancellationToken,
    ) -> Result<ChapterResult> {
        run.progress(ScrapeStage::Loading, chapter, format!("loading {}", url));
        info!("📖 [SCRAPER] chapter {} at {}", chapter.number, url);

        let page = self.gateway.get(&url, cancel).await?;
        if let Some(error) = ChapterError::from_page_status(page.status, &page.body) {
            warn!("[SCRAPER] chapter {} page unusable: {}", chapter.number, error);
            return Ok(ChapterResult::failed(chapter.number, url, 0, error));
        }

        run.progress(ScrapeStage::Analyzing, chapter, "looking for image patterns");
        let discovered = self.extractor.extract(&page.body, &url, false);
        let alts = extractor::alt_texts(&page.body, &url);

        let pattern = detector::detect(discovered.iter().map(String::as_str))
            .filter(|p| run.file_types.contains(&normalize_file_type(&p.extension)));

        let emitted = match pattern {
            Some(pattern) => {
                let start = match detector::lowest_index(discovered.iter().map(String::as_str), &pattern) {
                    Some(0) => 0,
                    _ => 1,
                };
                info!(
                    "[SCRAPER] sequential scan {}{{n:0{}}}.{} from {}",
                    pattern.base_path, pattern.pad_width, pattern.extension, start
                );
                self.sequential_scan(run, prober, chapter, &pattern, start, &alts, cancel)
                    .await?
            }
            None => {
                info!("[SCRAPER] no usable pattern, probing {} discovered URL(s)", discovered.len());
                self.discovery_scan(run, prober, chapter, discovered, &alts, cancel)
                    .await?
            }
        };

        if emitted == 0 {
            return Ok(ChapterResult::failed(chapter.number, url, 0, ChapterError::NoImages));
        }
        info!("✅ [SCRAPER] chapter {}: {} image(s)", chapter.number, emitted);
        Ok(ChapterResult::succeeded(chapter.number, url, emitted))
    }

    #[allow(clippy::too_many_arguments)]
    async fn sequential_scan(
        &self,
        run: &mut RunState,
        prober: &ImageProber,
        chapter: ChapterPosition,
        pattern: &SequentialPattern,
        start: u32,
        alts: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let ceiling = start.saturating_add(self.settings.max_sequence_length);
        let step = u32::try_from(self.settings.batch_size).unwrap_or(u32::MAX);
        let mut tracker = MissTracker::new(run.options.consecutive_miss_threshold);
        let mut emitted = 0;
        let mut next = start;

        while next < ceiling {
            let end = next.saturating_add(step).min(ceiling);
            let batch = pattern.candidates(next..end);
            next = end;

            match self
                .probe_unseen(run, prober, chapter, batch, SourceKind::Sequential, alts, cancel)
                .await?
            {
                Some((confirmed, batch_emitted)) => {
                    emitted += batch_emitted;
                    if tracker.record(confirmed) {
                        debug!("[SCRAPER] {} consecutive empty batches, scan done at {}", tracker.misses(), next);
                        break;
                    }
                }
                None => continue,
            }
        }

        Ok(emitted)
    }

    async fn discovery_scan(
        &self,
        run: &mut RunState,
        prober: &ImageProber,
        chapter: ChapterPosition,
        discovered: Vec<String>,
        alts: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let candidates: Vec<String> = discovered
            .into_iter()
            .filter(|url| run.wants_file_type(url))
            .collect();
        let mut tracker = MissTracker::new(run.options.consecutive_miss_threshold);
        let mut emitted = 0;

        for batch in candidates.chunks(self.settings.batch_size) {
            if let Some((confirmed, batch_emitted)) = self
                .probe_unseen(run, prober, chapter, batch.to_vec(), SourceKind::Discovered, alts, cancel)
                .await?
            {
                emitted += batch_emitted;
                if tracker.record(confirmed) {
                    break;
                }
            }
        }

        Ok(emitted)
    }

    /// Probes the batch members not yet seen in this run. Returns
    /// `(confirmed, emitted)`, or `None` when every member was already seen.
    #[allow(clippy::too_many_arguments)]
    async fn probe_unseen(
        &self,
        run: &mut RunState,
        prober: &ImageProber,
        chapter: ChapterPosition,
        batch: Vec<String>,
        kind: SourceKind,
        alts: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Option<(usize, usize)>> {
        let batch: Vec<String> = batch.into_iter().filter(|url| !run.seen_urls.contains(url)).collect();
        if batch.is_empty() {
            return Ok(None);
        }

        run.progress(
            ScrapeStage::Scanning,
            chapter,
            format!("checking {} candidate(s)", batch.len()),
        );

        let mut emitted = 0;
        let outcome = prober
            .probe_batch(&batch, cancel, |hit| {
                if run.confirm(hit, kind, alts) {
                    emitted += 1;
                }
            })
            .await?;

        if let Some(failed) = outcome.first_failure.clone() {
            run.seen_urls.insert(failed);
        }
        run.candidates_checked += outcome.checked();

        run.progress(
            ScrapeStage::Processing,
            chapter,
            format!("{} of {} confirmed", outcome.confirmed, batch.len()),
        );
        Ok(Some((outcome.confirmed, emitted)))
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ScrapeError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
        _ = tokio::time::sleep(duration) => {}
    }
    if cancel.is_cancelled() {
        return Err(ScrapeError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RetryPolicy;
    use crate::traits::{FetchRequest, FetchResponse, Method, Transport, TransportError};
    use std::sync::Mutex;

    /// In-memory site: pages answer GET with HTML, images answer with 200.
    #[derive(Default)]
    struct FakeSite {
        pages: HashMap<String, String>,
        images: HashSet<String>,
        requests: Mutex<Vec<(Method, String)>>,
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl FakeSite {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn images<I: IntoIterator<Item = String>>(mut self, urls: I) -> Self {
            self.images.extend(urls);
            self
        }

        /// Cancels `token` as soon as `url` is requested.
        fn cancel_on(mut self, url: &str, token: CancellationToken) -> Self {
            self.cancel_on = Some((url.to_string(), token));
            self
        }

        fn count(&self, method: Method, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, u)| *m == method && u == url)
                .count()
        }

        fn requested(&self, url: &str) -> bool {
            self.requests.lock().unwrap().iter().any(|(_, u)| u == url)
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeSite {
        async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, TransportError> {
            self.requests.lock().unwrap().push((request.method, request.url.clone()));
            if let Some((url, token)) = &self.cancel_on {
                if *url == request.url {
                    token.cancel();
                }
            }
            if let Some(html) = self.pages.get(&request.url) {
                return Ok(FetchResponse::new(200, html.clone()));
            }
            if self.images.contains(&request.url) {
                let body = if request.method == Method::Get { "img" } else { "" };
                return Ok(FetchResponse {
                    status: 200,
                    body: body.to_string(),
                    content_length: Some(1000),
                });
            }
            Ok(FetchResponse::new(404, ""))
        }
    }

    fn cdn_pages(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
        range.map(|i| format!("https://cdn.example/c1/{:03}.jpg", i)).collect()
    }

    fn scraper(site: FakeSite) -> (Scraper, Arc<FakeSite>) {
        let site = Arc::new(site);
        let gateway = Arc::new(FetchGateway::new(site.clone(), RetryPolicy::default()));
        let scraper = Scraper::new(gateway, Arc::new(UrlPatternManager::new()), &ScraperConfig::default());
        (scraper, site)
    }

    fn request(url: &str, chapters: u32) -> ScrapeRequest {
        let options = ScrapeOptions {
            chapter_count: chapters,
            fetch_interval: Duration::ZERO,
            ..ScrapeOptions::default()
        };
        ScrapeRequest::new(url, vec!["jpg".to_string()]).with_options(options)
    }

    async fn run(scraper: &Scraper, request: ScrapeRequest) -> (Result<ScrapeReport>, Vec<ScrapeEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = scraper.scrape(request, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn emitted_urls(events: &[ScrapeEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ScrapeEvent::NewImage(img) => Some(img.url.clone()),
                _ => None,
            })
            .collect()
    }

    const CHAPTER_ONE: &str = r#"<div class="reader">
        <img src="https://cdn.example/c1/001.jpg" alt="Page 1">
        <img src="https://cdn.example/c1/002.jpg">
    </div>"#;

    #[tokio::test]
    async fn sequential_scan_stops_after_consecutive_misses() {
        let site = FakeSite::default()
            .page("https://site.example/manga/chapter-1", CHAPTER_ONE)
            .images(cdn_pages(1..=7))
            // past the gap: two empty batches must stop the scan first
            .images(cdn_pages(21..=23));
        let (scraper, site) = scraper(site);

        let (result, events) = run(&scraper, request("https://site.example/manga/chapter-1", 1)).await;
        let report = result.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(emitted_urls(&events), cdn_pages(1..=7));
        assert_eq!(report.images[0].alt_text, "Page 1");
        assert_eq!(report.images[0].source_kind, SourceKind::Sequential);
        assert_eq!(report.images[1].size, Some(1000));
        assert_eq!(report.successful_chapters(), vec![1]);
        // batches 1-5, 6-10 (hit 6,7), 11-15 miss, 16-20 miss -> stop
        assert!(!site.requested("https://cdn.example/c1/021.jpg"));
        assert!(matches!(events.last(), Some(ScrapeEvent::Finished(s)) if s.images_found == 7));
    }

    #[tokio::test]
    async fn discovery_scan_filters_file_types() {
        let html = r#"<img src="/img/cover.jpg"><img src="/img/extra.png"><img src="/img/missing.jpg">
            <img src="/img/after.jpg">"#;
        let site = FakeSite::default()
            .page("https://site.example/read/7", html)
            .images(
                ["cover.jpg", "extra.png", "after.jpg"]
                    .iter()
                    .map(|n| format!("https://site.example/img/{}", n)),
            );
        let (scraper, site) = scraper(site);

        let (result, events) = run(&scraper, request("https://site.example/read/7", 1)).await;
        let report = result.unwrap();

        // missing.jpg ends the batch; after.jpg is never included
        assert_eq!(emitted_urls(&events), vec!["https://site.example/img/cover.jpg"]);
        assert_eq!(report.images[0].source_kind, SourceKind::Discovered);
        assert!(!site.requested("https://site.example/img/extra.png"));
        assert_eq!(report.chapter_results[0].chapter_number, 7);
    }

    #[tokio::test]
    async fn failed_chapter_halts_multi_chapter_run() {
        let site = FakeSite::default()
            .page("https://site.example/manga/chapter-1", CHAPTER_ONE)
            .images(cdn_pages(1..=3));
        let (scraper, site) = scraper(site);

        let (result, events) = run(&scraper, request("https://site.example/manga/chapter-1", 3)).await;
        let report = result.unwrap();

        assert_eq!(report.status, RunStatus::Halted);
        assert_eq!(report.successful_chapters(), vec![1]);
        assert_eq!(report.failed_chapters(), vec![2]);
        assert_eq!(report.chapter_results[1].error, Some(ChapterError::NotFound));
        assert!(!site.requested("https://site.example/manga/chapter-3"));

        let finished = events
            .iter()
            .filter(|e| matches!(e, ScrapeEvent::ChapterFinished(_)))
            .count();
        assert_eq!(finished, 2);
        assert!(matches!(events.last(), Some(ScrapeEvent::Finished(s)) if s.status == RunStatus::Halted));
    }

    #[tokio::test]
    async fn single_failed_chapter_is_an_error() {
        let (scraper, _) = scraper(FakeSite::default());
        let (result, events) = run(&scraper, request("https://site.example/manga/chapter-4", 1)).await;

        match result {
            Err(ScrapeError::ChapterFailed { chapter, error }) => {
                assert_eq!(chapter, 4);
                assert_eq!(error, ChapterError::NotFound);
            }
            other => panic!("expected chapter failure, got {:?}", other.map(|r| r.status)),
        }
        assert!(matches!(events.last(), Some(ScrapeEvent::Finished(_))));
    }

    #[tokio::test]
    async fn images_are_not_probed_twice_across_chapters() {
        let site = FakeSite::default()
            .page(
                "https://site.example/read/1",
                r#"<img src="/shared/cover.jpg"><img src="/c1/page-a.jpg">"#,
            )
            .page(
                "https://site.example/read/2",
                r#"<img src="/shared/cover.jpg"><img src="/c2/page-b.jpg">"#,
            )
            .images(
                ["shared/cover.jpg", "c1/page-a.jpg", "c2/page-b.jpg"]
                    .iter()
                    .map(|p| format!("https://site.example/{}", p)),
            );
        let (scraper, site) = scraper(site);

        let (result, events) = run(&scraper, request("https://site.example/read/1", 2)).await;
        let report = result.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(
            emitted_urls(&events),
            vec![
                "https://site.example/shared/cover.jpg",
                "https://site.example/c1/page-a.jpg",
                "https://site.example/c2/page-b.jpg",
            ]
        );
        assert_eq!(site.count(Method::Head, "https://site.example/shared/cover.jpg"), 1);
        assert_eq!(report.chapter_results[1].image_count, 1);
    }

    #[tokio::test]
    async fn filtered_images_still_count_as_hits() {
        let site = FakeSite::default()
            .page("https://site.example/manga/chapter-1", CHAPTER_ONE)
            .images(cdn_pages(1..=4));
        let (scraper, _) = scraper(site);
        let mut req = request("https://site.example/manga/chapter-1", 1);
        req.options = req.options.with_filter(|img| !img.url.ends_with("002.jpg"));

        let (result, events) = run(&scraper, req).await;
        let report = result.unwrap();

        let mut expected = cdn_pages(1..=4);
        expected.remove(1);
        assert_eq!(emitted_urls(&events), expected);
        assert_eq!(report.chapter_results[0].image_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_interval_ends_run() {
        let site = FakeSite::default()
            .page("https://site.example/manga/chapter-1", CHAPTER_ONE)
            .images(cdn_pages(1..=2));
        let (scraper, site) = scraper(site);
        let mut req = request("https://site.example/manga/chapter-1", 2);
        req.options.fetch_interval = Duration::from_secs(15);

        let cancel = CancellationToken::new();
        let mut handle = scraper.start(req, cancel.clone());

        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            if matches!(event, ScrapeEvent::ChapterFinished(_)) {
                cancel.cancel();
            }
            events.push(event);
        }
        let report = handle.task.await.unwrap().unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.chapter_results.len(), 1);
        assert!(!site.requested("https://site.example/manga/chapter-2"));
        assert!(matches!(events.last(), Some(ScrapeEvent::Finished(s)) if s.status == RunStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancelling_mid_batch_stops_emission() {
        let cancel = CancellationToken::new();
        let site = FakeSite::default()
            .page("https://site.example/manga/chapter-1", CHAPTER_ONE)
            .images(cdn_pages(1..=10))
            .cancel_on("https://cdn.example/c1/006.jpg", cancel.clone());
        let (scraper, site) = scraper(site);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = scraper
            .scrape(request("https://site.example/manga/chapter-1", 1), tx, cancel)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(report.status, RunStatus::Cancelled);
        // 006 answered 200 but arrived after the cancel
        assert_eq!(emitted_urls(&events), cdn_pages(1..=5));
        assert_eq!(report.images.len(), 5);
        assert!(report.chapter_results.is_empty());
        assert!(!events.iter().any(|e| matches!(e, ScrapeEvent::ChapterFinished(_))));
        assert!(!site.requested("https://cdn.example/c1/011.jpg"));
        assert!(matches!(events.last(), Some(ScrapeEvent::Finished(s)) if s.status == RunStatus::Cancelled));
    }

    #[tokio::test]
    async fn rejects_bad_requests_before_any_request() {
        let (scraper, site) = scraper(FakeSite::default());

        let (result, events) = run(&scraper, request("not a url", 1)).await;
        assert!(matches!(result, Err(ScrapeError::InvalidUrl(_))));
        assert!(events.is_empty());

        let no_types = ScrapeRequest::new("https://site.example/read/1", vec![" ".to_string()]);
        let (result, _) = run(&scraper, no_types).await;
        assert!(matches!(result, Err(ScrapeError::NoFileTypes)));
        assert!(site.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn long_runs_wait_at_least_thirty_seconds() {
        let options = ScrapeOptions {
            chapter_count: 20,
            fetch_interval: Duration::from_secs(10),
            ..ScrapeOptions::default()
        };
        assert_eq!(options.effective_fetch_interval(), LONG_RUN_MIN_INTERVAL);

        let short = ScrapeOptions {
            chapter_count: 3,
            fetch_interval: Duration::from_secs(10),
            ..ScrapeOptions::default()
        };
        assert_eq!(short.effective_fetch_interval(), Duration::from_secs(10));
    }
}
