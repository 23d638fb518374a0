//! In-document full text search.
//!
//! Text is split into runs of Unicode word characters (`\w+`) and
//! lower-cased; there is no stemming. A query is tokenized the same way.
//! Unquoted queries need every token on the same page. A query wrapped in
//! double quotes needs the tokens next to each other, in order.

use crate::error::Result;
use lectern_storage::ContentIdentity;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};
use tokio::sync::OnceCell;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static regex"));

/// Characters of surrounding text kept on each side of a match.
const SNIPPET_CONTEXT: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    /// 1-based.
    pub page: usize,
    /// The match with some surrounding text, on a single line.
    pub snippet: String,
    /// Byte offsets of the match within the page text.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Occurrence {
    page: usize,
    /// Token number within the page.
    position: usize,
    start: usize,
    end: usize,
}

struct Token {
    text: String,
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> impl Iterator<Item = Token> + '_ {
    WORD.find_iter(text).map(|m| Token { text: m.as_str().to_lowercase(), start: m.start(), end: m.end() })
}

#[derive(Debug, PartialEq, Eq)]
enum Query {
    All(Vec<String>),
    Phrase(Vec<String>),
}

impl Query {
    fn parse(query: &str) -> Self {
        let query = query.trim();
        let words = |text: &str| tokenize(text).map(|token| token.text).collect();
        match query.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
            Some(inner) => Self::Phrase(words(inner)),
            None => Self::All(words(query)),
        }
    }
}

/// Inverted index over the text of one document version. Never modified
/// after it is built.
pub struct SearchIndex {
    pages: Vec<String>,
    postings: HashMap<String, Vec<Occurrence>>,
}

impl SearchIndex {
    /// Index `pages`; the first entry is page 1.
    pub fn build(pages: Vec<String>) -> Self {
        let mut postings: HashMap<String, Vec<Occurrence>> = HashMap::new();
        for (index, text) in pages.iter().enumerate() {
            for (position, token) in tokenize(text).enumerate() {
                let occurrence = Occurrence { page: index + 1, position, start: token.start, end: token.end };
                postings.entry(token.text).or_default().push(occurrence);
            }
        }
        Self { pages, postings }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Matches ordered by page, then by offset. Queries without any word
    /// characters match nothing.
    pub fn search(&self, query: &str) -> Vec<SearchMatch> {
        let spans = match Query::parse(query) {
            Query::All(tokens) => self.all_of(&tokens),
            Query::Phrase(tokens) => self.phrase(&tokens),
        };
        spans.into_iter().map(|(page, start, end)| self.to_match(page, start, end)).collect()
    }

    fn occurrences(&self, token: &str) -> &[Occurrence] {
        self.postings.get(token).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every occurrence of every token, on pages that contain all of them.
    fn all_of(&self, tokens: &[String]) -> BTreeSet<(usize, usize, usize)> {
        let distinct: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
        let Some(pages) = distinct
            .iter()
            .map(|token| self.occurrences(token).iter().map(|o| o.page).collect::<BTreeSet<_>>())
            .reduce(|a, b| a.intersection(&b).copied().collect())
        else {
            return BTreeSet::new();
        };
        distinct
            .iter()
            .flat_map(|token| self.occurrences(token))
            .filter(|o| pages.contains(&o.page))
            .map(|o| (o.page, o.start, o.end))
            .collect()
    }

    fn phrase(&self, tokens: &[String]) -> BTreeSet<(usize, usize, usize)> {
        let Some((first, rest)) = tokens.split_first() else {
            return BTreeSet::new();
        };
        let following: Vec<HashMap<(usize, usize), &Occurrence>> = rest
            .iter()
            .map(|token| self.occurrences(token).iter().map(|o| ((o.page, o.position), o)).collect())
            .collect();
        let mut spans = BTreeSet::new();
        'start: for head in self.occurrences(first) {
            let mut end = head.end;
            for (offset, occurrences) in following.iter().enumerate() {
                match occurrences.get(&(head.page, head.position + offset + 1)) {
                    Some(next) => end = next.end,
                    None => continue 'start,
                }
            }
            spans.insert((head.page, head.start, end));
        }
        spans
    }

    fn to_match(&self, page: usize, start: usize, end: usize) -> SearchMatch {
        let text = &self.pages[page - 1];
        let from = floor_boundary(text, start.saturating_sub(SNIPPET_CONTEXT));
        let to = ceil_boundary(text, (end + SNIPPET_CONTEXT).min(text.len()));
        let snippet = text[from..to].split_whitespace().collect::<Vec<_>>().join(" ");
        SearchMatch { page, snippet, start, end }
    }
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

type Slot = Arc<OnceCell<Arc<SearchIndex>>>;

/// The most recently used indexes, keyed by content identity.
///
/// Concurrent requests for an index that is not built yet share a single
/// build. A failed build leaves nothing behind, so the next request tries
/// again.
pub struct SearchIndexes {
    slots: Mutex<LruCache<ContentIdentity, Slot>>,
}

impl SearchIndexes {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { slots: Mutex::new(LruCache::new(capacity)) }
    }

    pub async fn get_or_build<F, Fut>(&self, identity: &ContentIdentity, build: F) -> Result<Arc<SearchIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchIndex>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(identity) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Slot::default();
                    slots.put(identity.clone(), slot.clone());
                    slot
                },
            }
        };
        let index = slot
            .get_or_try_init(|| async {
                let index = build().await?;
                tracing::debug!(hash = %identity, pages = index.page_count(), "Built search index");
                Ok::<_, crate::error::Error>(Arc::new(index))
            })
            .await?;
        Ok(index.clone())
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn index(pages: &[&str]) -> SearchIndex {
        SearchIndex::build(pages.iter().map(|p| p.to_string()).collect())
    }

    fn fox() -> SearchIndex {
        let mut pages = vec![""; 8];
        pages[2] = "the quick brown fox";
        pages[6] = "a quick fox jumps";
        index(&pages)
    }

    fn pages(matches: &[SearchMatch]) -> Vec<usize> {
        matches.iter().map(|m| m.page).collect::<BTreeSet<_>>().into_iter().collect()
    }

    #[test]
    fn all_tokens_must_share_a_page() {
        let matches = fox().search("quick fox");
        assert_eq!(pages(&matches), vec![3, 7]);
        let spans: Vec<_> = matches.iter().map(|m| (m.page, m.start, m.end)).collect();
        assert_eq!(spans, vec![(3, 4, 9), (3, 16, 19), (7, 2, 7), (7, 8, 11)]);
    }

    #[test]
    fn quoted_queries_match_phrases() {
        let matches = fox().search("\"quick fox\"");
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].page, matches[0].start, matches[0].end), (7, 2, 11));
        assert_eq!(matches[0].snippet, "a quick fox jumps");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\"\"")]
    #[case("?!")]
    #[case("quick wolf")]
    #[case("\"fox quick\"")]
    fn queries_without_matches(#[case] query: &str) {
        assert!(fox().search(query).is_empty());
    }

    #[rstest]
    #[case("QUICK", 2)]
    #[case("Fox", 2)]
    #[case("\"Brown FOX\"", 1)]
    fn matching_ignores_case(#[case] query: &str, #[case] expected: usize) {
        assert_eq!(fox().search(query).len(), expected);
    }

    #[test]
    fn repeated_query_tokens_do_not_repeat_matches() {
        let matches = index(&["fox and fox"]).search("fox fox");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn phrases_do_not_span_pages() {
        assert!(index(&["ends with quick", "fox starts here"]).search("\"quick fox\"").is_empty());
    }

    #[test]
    fn snippets_are_trimmed_to_nearby_text() {
        let text = format!("{}needle{}", "é ".repeat(30), " tail\nline".repeat(10));
        let matches = index(&[text.as_str()]).search("needle");
        assert_eq!(matches.len(), 1);
        let snippet = &matches[0].snippet;
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with('é'));
        assert!(snippet.matches('é').count() < 30);
        assert!(!snippet.contains('\n'));
        assert!(snippet.chars().count() < text.chars().count());
        assert_eq!(&text[matches[0].start..matches[0].end], "needle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_searches_build_once() {
        let indexes = Arc::new(SearchIndexes::new(4));
        let builds = Arc::new(AtomicUsize::new(0));
        let identity = lectern_storage::identify(b"doc");
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (indexes, builds, identity) = (indexes.clone(), builds.clone(), identity.clone());
            tasks.push(tokio::spawn(async move {
                indexes
                    .get_or_build(&identity, || async {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(SearchIndex::build(vec!["shared text".to_string()]))
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut built = Vec::new();
        for task in tasks {
            built.push(task.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(built.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn failed_builds_are_retried() {
        let indexes = SearchIndexes::new(4);
        let identity = lectern_storage::identify(b"doc");
        let failed = indexes
            .get_or_build(&identity, || async {
                Err(exn::Exn::from(ErrorKind::DecodeFailure("broken".to_string())))
            })
            .await;
        assert!(failed.is_err());
        let index = indexes
            .get_or_build(&identity, || async { Ok(SearchIndex::build(vec!["fine".to_string()])) })
            .await
            .unwrap();
        assert_eq!(index.search("fine").len(), 1);
    }

    #[tokio::test]
    async fn least_recently_used_indexes_are_dropped() {
        let indexes = SearchIndexes::new(2);
        for n in 0u8..3 {
            indexes
                .get_or_build(&lectern_storage::identify([n]), || async { Ok(SearchIndex::build(Vec::new())) })
                .await
                .unwrap();
        }
        assert_eq!(indexes.len(), 2);
    }
}
