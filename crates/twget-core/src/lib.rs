pub mod archive;
pub mod error;
pub mod fetch;
pub mod media;
pub mod mp4;
pub mod search;
pub mod session;
pub mod snowflake;
pub mod window;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use archive::{ArchiveState, ArchivedAt};
pub use error::{Error, Result};
pub use fetch::{FetchPipeline, HttpTransport, Transport};
pub use media::{MediaDescriptor, MediaKind, Tweet};
pub use search::{FeedSearch, SearchQuery, SearchSource};
pub use session::{establish_session, Authenticator, CredentialPrompt, SessionStore, StoredCookie};
pub use window::{RunMode, WindowBoundary};

/// Default for `--limit`.
pub const DEFAULT_LIMIT: usize = i32::MAX as usize;

/// Settings shared by every account of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Root directory; each account is archived under `<output>/<account>`
    pub output: PathBuf,
    pub mode: RunMode,
    /// Maximum number of tweets to search per account
    pub limit: usize,
}

impl RunOptions {
    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.output.join(account)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReport {
    pub account: String,
    pub window: WindowBoundary,
    pub tweets: u64,
    pub retweets_skipped: u64,
    pub downloaded: u64,
    pub already_archived: u64,
}

/// Archive the media of one account into `dir`, which must already exist.
pub fn process_account<S, T>(
    options: &RunOptions,
    account: &str,
    dir: &Path,
    search: &mut S,
    transport: &T,
) -> Result<AccountReport>
where
    S: SearchSource + ?Sized,
    T: Transport + ?Sized,
{
    // scanned once, before this account writes anything
    let state = if options.mode.needs_scan() {
        archive::scan(dir)?
    } else {
        ArchiveState::default()
    };
    let window = window::plan(&options.mode, &state);
    let query = SearchQuery::for_account(account, &window);
    tracing::debug!(%account, %query, "searching");

    let mut report = AccountReport {
        account: account.to_string(),
        window,
        ..Default::default()
    };
    let pipeline = FetchPipeline::new(dir, transport);

    for tweet in search.search(&query, options.limit) {
        let tweet = tweet?;
        report.tweets += 1;
        if tweet.is_retweet {
            report.retweets_skipped += 1;
            continue;
        }
        for m in tweet.media() {
            match pipeline.process(&m)? {
                Some(_) => report.downloaded += 1,
                None => report.already_archived += 1,
            }
        }
    }

    tracing::info!(
        %account,
        downloaded = report.downloaded,
        already_archived = report.already_archived,
        retweets_skipped = report.retweets_skipped,
        "account done"
    );
    Ok(report)
}

/// Process accounts one after another, stopping at the first error.
pub fn process_accounts<S, T>(
    options: &RunOptions,
    accounts: &[String],
    search: &mut S,
    transport: &T,
) -> Result<Vec<AccountReport>>
where
    S: SearchSource + ?Sized,
    T: Transport + ?Sized,
{
    let mut reports = Vec::with_capacity(accounts.len());
    for account in accounts {
        let dir = options.account_dir(account);
        fs::create_dir_all(&dir).map_err(|e| Error::Io {
            path: dir.clone(),
            source: e,
        })?;
        reports.push(process_account(options, account, &dir, search, transport)?);
    }
    Ok(reports)
}
