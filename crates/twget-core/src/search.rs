use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::error::{BoxError, Error, Result};
use crate::media::Tweet;
use crate::session::{Authenticator, StoredCookie};
use crate::snowflake;
use crate::window::{query_day, WindowBoundary};

/// Filters of one media search, rendered as `key:value` terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    filters: BTreeMap<&'static str, String>,
}

impl SearchQuery {
    pub fn for_account(account: &str, window: &WindowBoundary) -> Self {
        let mut filters = BTreeMap::new();
        filters.insert("from", account.to_string());
        filters.insert("filter", "media".to_string());
        if let Some(since) = &window.since {
            filters.insert("since", since.clone());
        }
        if let Some(until) = &window.until {
            filters.insert("until", until.clone());
        }
        Self { filters }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    fn day(&self, key: &str) -> Option<NaiveDate> {
        self.get(key).and_then(query_day)
    }
}

impl std::fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms: Vec<String> = self
            .filters
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}:{v}"))
            .collect();
        f.write_str(&terms.join(" "))
    }
}

pub type TweetStream<'a> = Box<dyn Iterator<Item = Result<Tweet>> + 'a>;

/// Produces the tweets matching a query, newest first, at most `limit` of them.
///
/// The stream is consumed once. An `Err` item ends the search.
pub trait SearchSource {
    fn search(&mut self, query: &SearchQuery, limit: usize) -> TweetStream<'_>;
}

/// Searches a JSON-lines export of tweet records (one [`Tweet`] per line).
///
/// The `from`, `since` and `until` filters are applied locally; tweet days come
/// from the tweet id. `until` is exclusive.
pub struct FeedSearch {
    path: PathBuf,
    cookies: Vec<StoredCookie>,
}

impl FeedSearch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cookies: Vec::new(),
        }
    }
}

fn matches(query: &SearchQuery, since: Option<NaiveDate>, until: Option<NaiveDate>, tweet: &Tweet) -> Result<bool> {
    if let Some(from) = query.get("from") {
        if !tweet.username.eq_ignore_ascii_case(from) {
            return Ok(false);
        }
    }
    let day = snowflake::decode(&tweet.id)?.date_naive();
    Ok(since.map_or(true, |s| day >= s) && until.map_or(true, |u| day < u))
}

impl SearchSource for FeedSearch {
    fn search(&mut self, query: &SearchQuery, limit: usize) -> TweetStream<'_> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => return Box::new(std::iter::once(Err(Error::Search(e.into())))),
        };
        let query = query.clone();
        let (since, until) = (query.day("since"), query.day("until"));
        let mut failed = false;

        let stream = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(i, line)| {
                if failed {
                    return None;
                }
                let parsed = line
                    .map_err(BoxError::from)
                    .and_then(|l| {
                        if l.trim().is_empty() {
                            return Ok(None);
                        }
                        serde_json::from_str::<Tweet>(&l)
                            .map(Some)
                            .map_err(|e| format!("line {}: {e}", i + 1).into())
                    })
                    .map_err(Error::Search)
                    .and_then(|t| match t {
                        Some(t) => Ok(matches(&query, since, until, &t)?.then_some(t)),
                        None => Ok(None),
                    });
                match parsed {
                    Ok(t) => t.map(Ok),
                    Err(e) => {
                        failed = true;
                        Some(Err(e))
                    }
                }
            })
            .take(limit);
        Box::new(stream)
    }
}

/// A local export needs no login; cookies are only carried for downloads.
impl Authenticator for FeedSearch {
    fn requires_login(&self) -> bool {
        false
    }

    fn is_logged_in(&self) -> bool {
        true
    }

    fn login(&mut self, _username: &str, _password: &str) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn cookies(&self) -> Vec<StoredCookie> {
        self.cookies.clone()
    }

    fn set_cookies(&mut self, cookies: Vec<StoredCookie>) {
        self.cookies = cookies;
    }
}
