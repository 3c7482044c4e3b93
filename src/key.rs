use http::{header, header::HeaderName, request::Parts, Method};
use std::fmt::{self, Display};

/// Request fingerprint under which cache entries are stored.
///
/// Derived from the request authority, method, path and any configured
/// selected header fields. Equality is exact and the key is stable for the
/// lifetime of an entry; the backend uses it as its sole map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    authority: String,
    path: String,
    selected_headers: Vec<(String, String)>,
}

impl CacheKey {
    pub fn from_request(head: &Parts, key_headers: &[HeaderName]) -> Self {
        let authority = head
            .uri
            .authority()
            .map(|authority| authority.as_str().to_owned())
            .or_else(|| {
                head.headers
                    .get(header::HOST)
                    .and_then(|host| host.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_default();
        let path = head
            .uri
            .path_and_query()
            .map(|path| path.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());
        let selected_headers = key_headers
            .iter()
            .filter_map(|name| {
                head.headers
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        CacheKey {
            method: head.method.clone(),
            authority,
            path,
            selected_headers,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.method, self.authority, self.path)
    }
}
