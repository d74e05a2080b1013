use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::models::{strip_query, SequentialPattern};

pub const DEFAULT_PAD_WIDTH: usize = 3;

fn numbered_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*/)(\d{2,4})\.([A-Za-z0-9]+)$").expect("numbered file regex"))
}

struct Group {
    base_path: String,
    extension: String,
    numbers: BTreeSet<u32>,
    max_width: usize,
}

impl Group {
    fn has_consecutive_pair(&self) -> bool {
        self.numbers.iter().any(|n| self.numbers.contains(&(n + 1)))
    }

    fn pattern(&self) -> SequentialPattern {
        SequentialPattern {
            base_path: self.base_path.clone(),
            extension: self.extension.clone(),
            pad_width: if self.max_width > 0 { self.max_width } else { DEFAULT_PAD_WIDTH },
        }
    }
}

/// Groups numbered filenames by `(path, extension)` in first-seen order.
fn group_urls<'a, I>(urls: I) -> Vec<Group>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for url in urls {
        let Some(caps) = numbered_file_regex().captures(strip_query(url)) else {
            continue;
        };
        let base_path = caps[1].to_string();
        let digits = &caps[2];
        let extension = caps[3].to_string();
        let Ok(number) = digits.parse::<u32>() else {
            continue;
        };

        let slot = *index.entry((base_path.clone(), extension.clone())).or_insert_with(|| {
            groups.push(Group {
                base_path,
                extension,
                numbers: BTreeSet::new(),
                max_width: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.numbers.insert(number);
        group.max_width = group.max_width.max(digits.len());
    }

    groups
}

/// The first `(path, extension)` group holding at least one `n, n+1` pair.
pub fn detect<'a, I>(urls: I) -> Option<SequentialPattern>
where
    I: IntoIterator<Item = &'a str>,
{
    let pattern = group_urls(urls)
        .into_iter()
        .find(Group::has_consecutive_pair)
        .map(|g| g.pattern());
    if let Some(p) = &pattern {
        debug!("[DETECTOR] sequential pattern {}{{{}}}.{}", p.base_path, p.pad_width, p.extension);
    }
    pattern
}

/// Every qualifying pattern, in first-discovery order.
pub fn detect_all<'a, I>(urls: I) -> Vec<SequentialPattern>
where
    I: IntoIterator<Item = &'a str>,
{
    group_urls(urls)
        .into_iter()
        .filter(Group::has_consecutive_pair)
        .map(|g| g.pattern())
        .collect()
}

/// Smallest index observed for `pattern` among `urls`.
pub fn lowest_index<'a, I>(urls: I, pattern: &SequentialPattern) -> Option<u32>
where
    I: IntoIterator<Item = &'a str>,
{
    urls.into_iter()
        .filter_map(|url| numbered_file_regex().captures(strip_query(url)))
        .filter(|caps| caps[1] == pattern.base_path && caps[3] == pattern.extension)
        .filter_map(|caps| caps[2].parse::<u32>().ok())
        .min()
}
