use std::io::Write;

use chapterscan::config::Config;
use chapterscan::url_patterns::UrlPatternManager;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

const PATTERNS: &str = "\
# reader sites
url=https://reader.example.com/series/solo-leveling/chapter-12/
config=https://reader.example.com/series/{*}/chapter-{n}/

url=https://www.comics.example.org/view?id=500&c=3
config=/view?id={series}&c={n}
series=500
lang=en
";

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = assert_ok!(NamedTempFile::new());
    assert_ok!(file.write_all(contents.as_bytes()));
    file
}

#[test]
fn pattern_file_round_trip() {
    let source = write_temp(PATTERNS);
    let manager = assert_ok!(UrlPatternManager::load_file(source.path()));
    assert_eq!(manager.len(), 2);

    assert_eq!(
        manager
            .generate_chapter_url("https://reader.example.com/series/solo-leveling/chapter-12/", 13)
            .as_deref(),
        Some("https://reader.example.com/series/solo-leveling/chapter-13/")
    );
    assert_eq!(
        manager
            .generate_chapter_url("https://comics.example.org/view?id=500&c=3", 4)
            .as_deref(),
        Some("https://comics.example.org/view?id=500&c=4")
    );

    let saved = assert_ok!(NamedTempFile::new());
    assert_ok!(manager.save_file(saved.path()));
    let reloaded = assert_ok!(UrlPatternManager::load_file(saved.path()));

    assert_eq!(reloaded.export_to_env_format(), manager.export_to_env_format());
    let comics = reloaded.get("comics.example.org").map(|c| c.variable_bindings.len());
    assert_eq!(comics, Some(2));
}

#[test]
fn broken_pattern_file_reports_line() {
    let source = write_temp("url=https://a.example/1\nconfig=/c/{n}\n\nlang=en\n");
    let err = assert_err!(UrlPatternManager::load_file(source.path()));
    assert!(err.to_string().contains("line 4"), "{}", err);
}

#[test]
fn configured_pattern_file_is_used_by_scraper() {
    let source = write_temp(PATTERNS);
    let mut config = Config::default();
    config.patterns.file = Some(source.path().to_string_lossy().into_owned());

    let scraper = assert_ok!(chapterscan::Scraper::from_config(&config));
    assert_eq!(scraper.patterns().len(), 2);
    assert_eq!(
        scraper
            .patterns()
            .current_chapter_number("https://reader.example.com/series/solo-leveling/chapter-40/"),
        Some(40)
    );
}
