use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use url::Url;

use crate::archive::ArchivedAt;
use crate::error::{BoxError, Error, Result};
use crate::media::{MediaDescriptor, MediaKind};
use crate::mp4;
use crate::session::StoredCookie;
use crate::snowflake;

/// Opens the body of a remote media object.
pub trait Transport {
    fn open(&self, url: &Url) -> std::result::Result<Box<dyn Read + '_>, BoxError>;
}

/// Blocking HTTP transport. No timeout beyond the client defaults, no retries.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    cookie_header: Option<String>,
}

impl HttpTransport {
    pub fn new(cookies: &[StoredCookie]) -> std::result::Result<Self, BoxError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("twget/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let cookie_header = if cookies.is_empty() {
            None
        } else {
            Some(
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        Ok(Self {
            client,
            cookie_header,
        })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &Url) -> std::result::Result<Box<dyn Read + '_>, BoxError> {
        let mut req = self.client.get(url.clone());
        if let Some(cookie) = &self.cookie_header {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        let resp = req.send()?.error_for_status()?;
        Ok(Box::new(resp))
    }
}

/// Ask the media host for the original resolution instead of the default size.
pub fn original_size_url(url: &Url) -> Url {
    let mut out = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "name")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    out.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("name", "orig");
    out
}

/// `<dir>/<id><ext>`, where `<ext>` is the extension of the last segment of
/// the percent-decoded URL path (with its dot).
pub fn target_path(dir: &Path, id: &str, url: &Url) -> PathBuf {
    let path = urlencoding::decode(url.path()).unwrap_or(Cow::Borrowed(url.path()));
    let last = path.rsplit('/').next().unwrap_or("");
    let ext = last.rfind('.').map(|i| &last[i..]).unwrap_or("");
    dir.join(format!("{id}{ext}"))
}

/// Downloads media into one account directory exactly once.
pub struct FetchPipeline<'a, T: Transport + ?Sized> {
    output_dir: &'a Path,
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> FetchPipeline<'a, T> {
    pub fn new(output_dir: &'a Path, transport: &'a T) -> Self {
        Self {
            output_dir,
            transport,
        }
    }

    /// Download, patch and stamp one media object.
    ///
    /// Returns `Ok(None)` when the target file already exists; nothing is
    /// transferred and the existing file is left as it is.
    pub fn process(&self, m: &MediaDescriptor) -> Result<Option<PathBuf>> {
        let ts = snowflake::decode(&m.id)?;

        let url = match m.kind {
            MediaKind::Photo => original_size_url(&m.url),
            MediaKind::Video => m.url.clone(),
        };

        let Some(path) = self.download(&m.id, &url)? else {
            return Ok(None);
        };

        if m.kind == MediaKind::Video {
            mp4::patch(&path, ts)?;
        }

        ArchivedAt::new(ts).stamp(&path)?;
        Ok(Some(path))
    }

    fn download(&self, id: &str, url: &Url) -> Result<Option<PathBuf>> {
        let path = target_path(self.output_dir, id, url);
        match path.try_exists() {
            Ok(true) => {
                tracing::info!("`{}` already exists", path.display());
                return Ok(None);
            }
            Ok(false) => {}
            Err(e) => return Err(Error::io(&path, e)),
        }

        tracing::info!("downloading `{}`", path.display());

        let transfer = |source: BoxError| Error::Transfer {
            url: url.to_string(),
            source,
        };
        let mut body = self.transport.open(url).map_err(transfer)?;

        // a failure past this point leaves a partial file behind
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut out = BufWriter::new(file);
        copy_body(&mut body, &mut out).map_err(|e| match e {
            CopyError::Read(e) => transfer(e.into()),
            CopyError::Write(e) => Error::io(&path, e),
        })?;
        out.flush().map_err(|e| Error::io(&path, e))?;

        Ok(Some(path))
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// `io::copy` that keeps network and disk failures apart.
fn copy_body(src: &mut dyn Read, dst: &mut dyn Write) -> std::result::Result<u64, CopyError> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        dst.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::scan;
    use crate::mp4::tests::minimal_mp4;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// In-memory transport that records every request.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub bodies: HashMap<String, Vec<u8>>,
        pub requests: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        pub fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Transport for FakeTransport {
        fn open(&self, url: &Url) -> std::result::Result<Box<dyn Read + '_>, BoxError> {
            self.requests.borrow_mut().push(url.to_string());
            match self.bodies.get(url.as_str()) {
                Some(b) => Ok(Box::new(io::Cursor::new(b.clone()))),
                None => Err(format!("404 for {url}").into()),
            }
        }
    }

    const PHOTO_ID: &str = "1656000000000000000";
    const VIDEO_ID: &str = "1656000000000000001";

    fn photo() -> MediaDescriptor {
        let url = Url::parse("https://pbs.example.com/media/abc.jpg").unwrap();
        MediaDescriptor::new(PHOTO_ID, url, MediaKind::Photo)
    }

    #[test]
    fn test_original_size_url() {
        let url = Url::parse("https://pbs.example.com/media/abc?format=jpg&name=small").unwrap();
        let orig = original_size_url(&url);
        assert_eq!(orig.as_str(), "https://pbs.example.com/media/abc?format=jpg&name=orig");

        let bare = Url::parse("https://pbs.example.com/media/abc.jpg").unwrap();
        assert_eq!(
            original_size_url(&bare).as_str(),
            "https://pbs.example.com/media/abc.jpg?name=orig"
        );
    }

    #[test]
    fn test_target_path_extension() {
        let dir = Path::new("/out/alice");
        let url = Url::parse("https://video.example.com/vid/1/pu/vid/720x1280/x.mp4?tag=12").unwrap();
        assert_eq!(target_path(dir, "42", &url), dir.join("42.mp4"));
        let no_ext = Url::parse("https://pbs.example.com/media/abc?format=jpg").unwrap();
        assert_eq!(target_path(dir, "42", &no_ext), dir.join("42"));
    }

    #[test]
    fn test_target_path_percent_encoded() {
        let dir = Path::new("/out/alice");
        let slash = Url::parse("https://video.example.com/vid/a.bin%2Fclip.mp4").unwrap();
        assert_eq!(target_path(dir, "42", &slash), dir.join("42.mp4"));
        let dot = Url::parse("https://pbs.example.com/media/abc%2Epng").unwrap();
        assert_eq!(target_path(dir, "42", &dot), dir.join("42.png"));
    }

    #[test]
    fn test_photo_downloaded_once() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::default()
            .with("https://pbs.example.com/media/abc.jpg?name=orig", b"jpegdata");
        let pipeline = FetchPipeline::new(dir.path(), &transport);

        let first = pipeline.process(&photo()).unwrap().unwrap();
        assert_eq!(first, dir.path().join(format!("{PHOTO_ID}.jpg")));
        assert_eq!(fs::read(&first).unwrap(), b"jpegdata");
        let stamped = scan(dir.path()).unwrap().newest.unwrap();

        assert_eq!(pipeline.process(&photo()).unwrap(), None);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(scan(dir.path()).unwrap().newest.unwrap(), stamped);
    }

    #[test]
    fn test_mtime_equals_derived_timestamp() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::default()
            .with("https://pbs.example.com/media/abc.jpg?name=orig", b"x");
        FetchPipeline::new(dir.path(), &transport).process(&photo()).unwrap();

        let state = scan(dir.path()).unwrap();
        let expected = snowflake::decode(PHOTO_ID).unwrap();
        assert_eq!(state.oldest.unwrap().timestamp(), expected);
        assert_eq!(state.newest.unwrap().timestamp(), expected);
    }

    #[test]
    fn test_video_is_patched() {
        let dir = tempdir().unwrap();
        let url = "https://video.example.com/ext_tw_video/1/pu/vid/clip.mp4";
        let transport = FakeTransport::default().with(url, &minimal_mp4());
        let m = MediaDescriptor::new(VIDEO_ID, Url::parse(url).unwrap(), MediaKind::Video);

        let path = FetchPipeline::new(dir.path(), &transport).process(&m).unwrap().unwrap();
        assert_eq!(transport.requests.borrow()[0], url);

        let ts = snowflake::decode(VIDEO_ID).unwrap();
        let mut expected = minimal_mp4();
        mp4::patch_bytes(&mut expected, ts).unwrap();
        assert_eq!(fs::read(&path).unwrap(), expected);
        assert_eq!(scan(dir.path()).unwrap().newest.unwrap().timestamp(), ts);
    }

    #[test]
    fn test_transfer_error_propagates() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::default();
        let err = FetchPipeline::new(dir.path(), &transport).process(&photo()).unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));
        assert!(!dir.path().join(format!("{PHOTO_ID}.jpg")).exists());
    }

    /// Hands out `part`, then fails as if the connection dropped.
    struct Interrupted;

    impl Transport for Interrupted {
        fn open(&self, _url: &Url) -> std::result::Result<Box<dyn Read + '_>, BoxError> {
            let broken = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
            Ok(Box::new((&b"part"[..]).chain(FailingRead(Some(broken)))))
        }
    }

    struct FailingRead(Option<io::Error>);

    impl Read for FailingRead {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(self.0.take().unwrap_or_else(|| io::ErrorKind::BrokenPipe.into()))
        }
    }

    #[test]
    fn test_broken_transfer_keeps_partial_file() {
        let dir = tempdir().unwrap();
        let err = FetchPipeline::new(dir.path(), &Interrupted).process(&photo()).unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));

        let path = dir.path().join(format!("{PHOTO_ID}.jpg"));
        assert_eq!(fs::read(&path).unwrap(), b"part");
        let newest = scan(dir.path()).unwrap().newest.unwrap();
        assert_ne!(newest.timestamp(), snowflake::decode(PHOTO_ID).unwrap());
    }

    #[test]
    fn test_invalid_id_before_transfer() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::default();
        let m = MediaDescriptor::new("not-a-number", photo().url, MediaKind::Photo);
        let err = FetchPipeline::new(dir.path(), &transport).process(&m).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_corrupt_video_is_left_in_place() {
        let dir = tempdir().unwrap();
        let url = "https://video.example.com/clip.mp4";
        let transport = FakeTransport::default().with(url, b"garbage");
        let m = MediaDescriptor::new(VIDEO_ID, Url::parse(url).unwrap(), MediaKind::Video);

        let err = FetchPipeline::new(dir.path(), &transport).process(&m).unwrap_err();
        assert!(matches!(err, Error::ContainerFormat { .. }));
        let path = dir.path().join(format!("{VIDEO_ID}.mp4"));
        assert_eq!(fs::read(path).unwrap(), b"garbage");
    }
}
