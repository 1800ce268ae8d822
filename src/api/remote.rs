//! Purpose: Fetch raw game-data CSV tables over HTTP.
//! Exports: `RemoteSource`, `DEFAULT_BASE_URL`.
//! Role: Fresh loader behind the cache; streams the response body into the row parser.
//! Invariants: Requests are `GET {base}/{version}/data/rawexd/{table}.csv`.
//! Invariants: The base URL path is kept; table segments are appended to it.
//! Invariants: Any non-2xx status or transport failure is a `NetworkFailure`.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::lines::LineReader;
use crate::core::model::{GameData, VersionedKey};
use crate::core::rows::parse_rows;

pub const DEFAULT_BASE_URL: &str = "https://raw.githubusercontent.com/Shiro-0xffffff/ffxiv-data";

type ApiResult<T> = Result<T, Error>;

#[derive(Clone)]
pub struct RemoteSource {
    inner: Arc<RemoteSourceInner>,
}

struct RemoteSourceInner {
    base_url: Url,
    agent: ureq::Agent,
}

impl RemoteSource {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        Self::with_connect_timeout(base_url, None)
    }

    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        connect_timeout: Option<Duration>,
    ) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = connect_timeout {
            builder = builder.timeout_connect(timeout);
        }
        Ok(Self {
            inner: Arc::new(RemoteSourceInner {
                base_url,
                agent: builder.build(),
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn table_url(&self, key: &VersionedKey) -> ApiResult<Url> {
        csv_url(&self.inner.base_url, key)
    }

    /// Issue the request and return the parsed header plus a lazy record stream.
    pub fn load_table(&self, key: &VersionedKey) -> ApiResult<GameData> {
        let url = self.table_url(key)?;
        tracing::debug!(key = %key, url = %url, "fetching table");
        let body = self.get(&url).map_err(|err| err.with_key(key))?;
        let (metadata, records) =
            parse_rows(LineReader::new(body)).map_err(|err| err.with_key(key))?;
        Ok(GameData {
            metadata,
            records: Box::new(records),
        })
    }

    fn get(&self, url: &Url) -> ApiResult<Box<dyn Read + Send + Sync + 'static>> {
        match self.inner.agent.get(url.as_str()).call() {
            Ok(resp) => Ok(resp.into_reader()),
            Err(ureq::Error::Status(code, resp)) => Err(Error::new(ErrorKind::NetworkFailure)
                .with_message(format!("HTTP {code} {}", resp.status_text()))
                .with_hint(status_hint(code))),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::NetworkFailure)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

fn status_hint(code: u16) -> &'static str {
    if code == 404 {
        "Check the game version and table name; both are case-sensitive."
    } else {
        "The data host rejected the request; retry later."
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("base url must use http or https scheme"));
    }
    if url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::Usage).with_message("base url cannot be a base"));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn csv_url(base_url: &Url, key: &VersionedKey) -> ApiResult<Url> {
    let file = format!("{}.csv", key.table());
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("base url cannot be a base")
        })?;
        path.pop_if_empty();
        path.extend([key.version(), "data", "rawexd", file.as_str()]);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BASE_URL, RemoteSource, csv_url, normalize_base_url};
    use crate::core::error::ErrorKind;
    use crate::core::model::VersionedKey;

    fn key() -> VersionedKey {
        VersionedKey::new("7.0", "Item").expect("key")
    }

    #[test]
    fn default_base_builds_raw_table_url() {
        let source = RemoteSource::new(DEFAULT_BASE_URL).expect("source");
        let url = source.table_url(&key()).expect("url");
        assert_eq!(
            url.as_str(),
            "https://raw.githubusercontent.com/Shiro-0xffffff/ffxiv-data/7.0/data/rawexd/Item.csv"
        );
    }

    #[test]
    fn base_path_is_kept_with_or_without_trailing_slash() {
        for raw in ["http://localhost:8080/mirror", "http://localhost:8080/mirror/"] {
            let base = normalize_base_url(raw.to_string()).expect("base");
            let url = csv_url(&base, &key()).expect("url");
            assert_eq!(
                url.as_str(),
                "http://localhost:8080/mirror/7.0/data/rawexd/Item.csv"
            );
        }
    }

    #[test]
    fn bare_host_gets_table_path() {
        let base = normalize_base_url("http://127.0.0.1:9000".to_string()).expect("base");
        let url = csv_url(&base, &key()).expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/7.0/data/rawexd/Item.csv");
    }

    #[test]
    fn table_names_are_percent_encoded() {
        let base = normalize_base_url("http://localhost".to_string()).expect("base");
        let key = VersionedKey::new("7.0", "Item Action").expect("key");
        let url = csv_url(&base, &key).expect("url");
        assert_eq!(url.path(), "/7.0/data/rawexd/Item%20Action.csv");
    }

    #[test]
    fn normalize_base_url_rejects_other_schemes() {
        let err = normalize_base_url("ftp://localhost/".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("not a url".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn normalize_base_url_drops_query() {
        let base = normalize_base_url("http://localhost/data?token=1#x".to_string()).expect("base");
        assert_eq!(base.as_str(), "http://localhost/data");
    }
}
