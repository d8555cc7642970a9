use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error, Result};

pub const APP_DIR: &str = "twget";
pub const COOKIES_FILENAME: &str = "cookies.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// A logged-in session with the platform.
pub trait Authenticator {
    /// `false` for backends that work without an account; saved cookies are
    /// still handed over, but nobody is prompted.
    fn requires_login(&self) -> bool {
        true
    }
    fn is_logged_in(&self) -> bool;
    fn login(&mut self, username: &str, password: &str) -> std::result::Result<(), BoxError>;
    fn cookies(&self) -> Vec<StoredCookie>;
    fn set_cookies(&mut self, cookies: Vec<StoredCookie>);
}

/// Asks the user for credentials.
pub trait CredentialPrompt {
    fn username(&mut self) -> io::Result<String>;
    /// Read without echo.
    fn password(&mut self) -> io::Result<String>;
}

/// Cookie jar persisted as JSON under the user's config directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// `<config dir>/twget`, e.g. `~/.config/twget` or
    /// `~/Library/Application Support/twget`.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|d| Self::at(d.join(APP_DIR)))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.dir.join(COOKIES_FILENAME)
    }

    /// Create the session directory, readable by the owner only.
    pub fn ensure_dir(&self) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir).map_err(|e| Error::io(&self.dir, e))
    }

    /// `Ok(None)` when no cookie file has been saved yet.
    pub fn load(&self) -> Result<Option<Vec<StoredCookie>>> {
        let path = self.cookie_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        let cookies = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::io(&path, e.into()))?;
        Ok(Some(cookies))
    }

    pub fn save(&self, cookies: &[StoredCookie]) -> Result<()> {
        let path = self.cookie_path();
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, cookies).map_err(|e| Error::io(&path, e.into()))?;
        writer.flush().map_err(|e| Error::io(&path, e))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Restore the saved session, or log in interactively if there is none or
/// it has expired. Must succeed before any account is processed.
pub fn establish_session<A, P>(auth: &mut A, store: &SessionStore, prompt: &mut P) -> Result<()>
where
    A: Authenticator + ?Sized,
    P: CredentialPrompt + ?Sized,
{
    if !auth.requires_login() {
        if let Some(cookies) = store.load()? {
            auth.set_cookies(cookies);
        }
        return Ok(());
    }

    store.ensure_dir()?;

    match store.load()? {
        None => return interactive_login(auth, store, prompt),
        Some(cookies) => auth.set_cookies(cookies),
    }

    if !auth.is_logged_in() {
        tracing::info!("saved session is no longer valid");
        return interactive_login(auth, store, prompt);
    }
    tracing::debug!("restored session from `{}`", store.cookie_path().display());
    Ok(())
}

fn interactive_login<A, P>(auth: &mut A, store: &SessionStore, prompt: &mut P) -> Result<()>
where
    A: Authenticator + ?Sized,
    P: CredentialPrompt + ?Sized,
{
    let prompt_err = |e: io::Error| Error::Session(format!("reading credentials: {e}"));
    let username = prompt.username().map_err(prompt_err)?;
    let password = prompt.password().map_err(prompt_err)?;

    auth.login(username.trim(), &password)
        .map_err(|e| Error::Session(format!("login failed: {e}")))?;
    if !auth.is_logged_in() {
        return Err(Error::Session("failed to login".into()));
    }

    if let Err(e) = store.save(&auth.cookies()) {
        tracing::warn!("failed to save cookie: {e}");
    }
    Ok(())
}
