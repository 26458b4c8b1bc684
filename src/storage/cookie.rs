use super::StorageAdapter;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use std::sync::Arc;
use url::Url;

/// Client-visible cookies for one site, stored in a shared cookie jar.
///
/// The jar is the same one the HTTP client sends, so values written here ride
/// along with API requests. The server-set auth cookie lives in the same jar
/// but is never written through this adapter.
#[derive(Clone, Debug)]
pub struct CookieStorage {
    jar: Arc<Jar>,
    url: Url,
}

impl CookieStorage {
    #[must_use]
    pub fn new(jar: Arc<Jar>, url: Url) -> Self {
        Self { jar, url }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let header = self.jar.cookies(&self.url)?;
        let value = header.to_str().ok()?;
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            let val = parts.next().unwrap_or_default().trim();
            if name == key {
                return urlencoding::decode(val).ok().map(|v| v.into_owned());
            }
        }
        None
    }
}

#[async_trait]
impl StorageAdapter for CookieStorage {
    async fn get(&self, key: &str) -> Option<String> {
        self.lookup(key)
    }

    async fn set(&self, key: &str, value: &str) {
        let cookie = format!(
            "{key}={}; Path=/; SameSite=Lax",
            urlencoding::encode(value)
        );
        self.jar.add_cookie_str(&cookie, &self.url);
    }

    async fn remove(&self, key: &str) {
        let cookie = format!("{key}=; Path=/; SameSite=Lax; Max-Age=0");
        self.jar.add_cookie_str(&cookie, &self.url);
    }
}
