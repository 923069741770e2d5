use std::path::PathBuf;

use bytes::Bytes;
use mlua::Value;

/// One request-environment entry or one response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered key/value pairs plus the raw request body, handed to the guest
/// application as its environment. The bridge only borrows it for the
/// duration of one call.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvironment {
    pairs: Vec<KeyValue>,
    body: Bytes,
}

impl RequestEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the environment with the usual CGI-style keys for an HTTP
    /// request line.
    pub fn http(method: &str, path: &str) -> Self {
        let (base, query) = match path.split_once('?') {
            Some((base, query)) => (base, query),
            None => (path, ""),
        };
        Self::new()
            .pair("REQUEST_METHOD", method)
            .pair("PATH_INFO", base)
            .pair("REQUEST_URI", path)
            .pair("QUERY_STRING", query)
            .pair("SERVER_PROTOCOL", "HTTP/1.1")
    }

    pub fn pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push(KeyValue::new(key, value));
        self
    }

    /// Add a request header under its CGI name (`HTTP_*`).
    pub fn header(self, name: &str, value: impl Into<String>) -> Self {
        let key = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
        self.pair(key, value)
    }

    /// Set the raw request body, keeping `CONTENT_LENGTH` in sync.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.pairs.retain(|kv| kv.key != "CONTENT_LENGTH");
        let length = self.body.len().to_string();
        self.pair("CONTENT_LENGTH", length)
    }

    pub fn pairs(&self) -> &[KeyValue] {
        &self.pairs
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.body
    }
}

/// Decoded application response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Buffered payload returned inline by the application.
    Inline(Bytes),
    /// Path to a file the caller is expected to stream itself.
    File(PathBuf),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Inline(Bytes::new())
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ResponseBody::File(_))
    }
}

/// Decoded application response.
///
/// Keeps the root guest value alive until released, so any guest
/// substructure the decoded fields came from stays valid in the meantime.
/// Dropping the response (or calling [`release`](Response::release)) lets
/// the guest collector reclaim it.
#[derive(Debug)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) headers: Vec<KeyValue>,
    pub(crate) body: ResponseBody,
    pub(crate) retained: Value,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[KeyValue] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|kv| kv.key == name)
            .map(|kv| kv.value.as_str())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn is_file(&self) -> bool {
        self.body.is_file()
    }

    /// The raw guest response value, alive as long as this response is.
    pub fn raw(&self) -> &Value {
        &self.retained
    }

    /// Drop the retained guest handle, allowing collection.
    pub fn release(self) {}

    pub fn into_owned(self) -> ResponseOwned {
        ResponseOwned::from(self)
    }
}

/// A response with every field moved into native memory, safe to hand to
/// another thread. Converting drops the retained guest handle.
#[derive(Debug, Clone)]
pub struct ResponseOwned {
    status: u16,
    headers: Vec<KeyValue>,
    body: ResponseBody,
}

impl From<Response> for ResponseOwned {
    fn from(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

impl ResponseOwned {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[KeyValue] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|kv| kv.key == name)
            .map(|kv| kv.value.as_str())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn is_file(&self) -> bool {
        self.body.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of<'a>(env: &'a RequestEnvironment, key: &str) -> Option<&'a str> {
        env.pairs()
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    #[test]
    fn http_builder_seeds_cgi_keys() {
        let env = RequestEnvironment::http("GET", "/users?page=2");
        assert_eq!(value_of(&env, "REQUEST_METHOD"), Some("GET"));
        assert_eq!(value_of(&env, "PATH_INFO"), Some("/users"));
        assert_eq!(value_of(&env, "REQUEST_URI"), Some("/users?page=2"));
        assert_eq!(value_of(&env, "QUERY_STRING"), Some("page=2"));
        assert_eq!(value_of(&env, "SERVER_PROTOCOL"), Some("HTTP/1.1"));
    }

    #[test]
    fn headers_get_cgi_names() {
        let env = RequestEnvironment::http("GET", "/").header("Content-Type", "text/plain");
        assert_eq!(value_of(&env, "HTTP_CONTENT_TYPE"), Some("text/plain"));
    }

    #[test]
    fn body_maintains_content_length() {
        let env = RequestEnvironment::http("POST", "/").body(Bytes::from_static(b"hello"));
        assert_eq!(value_of(&env, "CONTENT_LENGTH"), Some("5"));
        assert_eq!(env.raw_body().as_ref(), b"hello");

        // Replacing the body replaces the length too.
        let env = env.body(Bytes::from_static(b"hi"));
        assert_eq!(value_of(&env, "CONTENT_LENGTH"), Some("2"));
        let lengths = env
            .pairs()
            .iter()
            .filter(|kv| kv.key == "CONTENT_LENGTH")
            .count();
        assert_eq!(lengths, 1);
    }

    #[test]
    fn empty_body_is_inline() {
        assert!(!ResponseBody::empty().is_file());
        assert_eq!(ResponseBody::empty(), ResponseBody::Inline(Bytes::new()));
    }
}
