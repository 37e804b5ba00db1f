//! Redaction filters applied before matching and persistence

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::cassette::{Headers, RequestRecord, ResponseRecord};

/// Default replacement used by [`Filter::redacting`]
pub const DEFAULT_REPLACEMENT: &str = "Redacted";

/// Closure deciding a field's new value; `None` removes the field
pub type FieldFn = dyn Fn(&str, &str) -> Option<String> + Send + Sync;

/// Hook rewriting a whole request after the field rules ran
pub type RequestHook = dyn Fn(RequestRecord) -> RequestRecord + Send + Sync;

/// Hook rewriting a response before persistence; `None` discards it
pub type ResponseHook =
    dyn Fn(ResponseRecord, Option<Bytes>) -> Option<(ResponseRecord, Option<Bytes>)> + Send + Sync;

/// Rule applied to a single header or query parameter
#[derive(Clone)]
pub enum FilterRule {
    /// Delete the field
    Remove,
    /// Overwrite the field's value
    Replace(String),
    /// Compute the field's value from `(name, current value)`
    Closure(Arc<FieldFn>),
}

impl FilterRule {
    /// Build a [`FilterRule::Closure`]
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        Self::Closure(Arc::new(f))
    }

    fn apply(&self, name: &str, value: &str) -> Option<String> {
        match self {
            Self::Remove => None,
            Self::Replace(replacement) => Some(replacement.clone()),
            Self::Closure(f) => f(name, value),
        }
    }
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove => f.write_str("Remove"),
            Self::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Self::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

/// Rule-driven request and response redaction
///
/// Filtering is pure: it never touches the data delivered to the live caller.
#[derive(Clone, Default)]
pub struct Filter {
    /// Keyed by lower-cased header name
    header_rules: BTreeMap<String, FilterRule>,
    query_rules: BTreeMap<String, FilterRule>,
    /// Keyed by lower-cased header name
    response_header_rules: BTreeMap<String, FilterRule>,
    request_hook: Option<Arc<RequestHook>>,
    response_hook: Option<Arc<ResponseHook>>,
}

impl Filter {
    /// A filter that changes nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every listed request header and query parameter with `replacement`
    #[must_use]
    pub fn redacting<H, Q>(headers: H, query_parameters: Q, replacement: &str) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        let mut filter = Self::new();
        for name in headers {
            filter = filter.header(name, FilterRule::Replace(replacement.to_string()));
        }
        for name in query_parameters {
            filter = filter.query_parameter(name, FilterRule::Replace(replacement.to_string()));
        }
        filter
    }

    /// Add a request header rule
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, rule: FilterRule) -> Self {
        self.header_rules
            .insert(name.into().to_ascii_lowercase(), rule);
        self
    }

    /// Add a query parameter rule
    #[must_use]
    pub fn query_parameter(mut self, name: impl Into<String>, rule: FilterRule) -> Self {
        self.query_rules.insert(name.into(), rule);
        self
    }

    /// Add a response header rule
    #[must_use]
    pub fn response_header(mut self, name: impl Into<String>, rule: FilterRule) -> Self {
        self.response_header_rules
            .insert(name.into().to_ascii_lowercase(), rule);
        self
    }

    /// Set the hook run after the request field rules
    #[must_use]
    pub fn request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestRecord) -> RequestRecord + Send + Sync + 'static,
    {
        self.request_hook = Some(Arc::new(hook));
        self
    }

    /// Set the hook run after the response header rules
    #[must_use]
    pub fn response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(ResponseRecord, Option<Bytes>) -> Option<(ResponseRecord, Option<Bytes>)>
            + Send
            + Sync
            + 'static,
    {
        self.response_hook = Some(Arc::new(hook));
        self
    }

    /// Apply header rules, query rules and the request hook, in that order
    #[must_use]
    pub fn filter_request(&self, mut request: RequestRecord) -> RequestRecord {
        filter_headers(&mut request.headers, &self.header_rules);

        if !self.query_rules.is_empty() {
            if let Some(url) = filter_query(&request.url, &self.query_rules) {
                request.url = url;
            }
        }

        match &self.request_hook {
            Some(hook) => hook(request),
            None => request,
        }
    }

    /// Apply response header rules and the response hook
    ///
    /// Returns `None` when the hook discards the interaction.
    #[must_use]
    pub fn filter_response(
        &self,
        mut response: ResponseRecord,
        body: Option<Bytes>,
    ) -> Option<(ResponseRecord, Option<Bytes>)> {
        filter_headers(&mut response.headers, &self.response_header_rules);

        match &self.response_hook {
            Some(hook) => hook(response, body),
            None => Some((response, body)),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("header_rules", &self.header_rules)
            .field("query_rules", &self.query_rules)
            .field("response_header_rules", &self.response_header_rules)
            .field("request_hook", &self.request_hook.is_some())
            .field("response_hook", &self.response_hook.is_some())
            .finish()
    }
}

fn filter_headers(headers: &mut Headers, rules: &BTreeMap<String, FilterRule>) {
    for (key, rule) in rules {
        // rules are keyed lower-case; closures see the header's own spelling
        let Some((name, current)) = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(key))
            .map(|(n, v)| (n.to_string(), v.to_string()))
        else {
            continue;
        };
        match rule.apply(&name, &current) {
            Some(value) => {
                headers.insert(name, value);
            }
            None => {
                headers.remove(&name);
            }
        }
    }
}

/// Rewrite the matching query pairs of `url`
///
/// Returns `None` when nothing changed so untouched URLs stay byte-identical.
fn filter_query(url: &str, rules: &BTreeMap<String, FilterRule>) -> Option<String> {
    let (before_fragment, fragment) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };
    let (base, query) = before_fragment.split_once('?')?;

    let mut changed = false;
    let mut pairs = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode_component(raw_name);

        let Some(rule) = rules.get(&name) else {
            pairs.push(pair.to_string());
            continue;
        };

        changed = true;
        if let Some(value) = rule.apply(&name, &decode_component(raw_value)) {
            pairs.push(format!("{raw_name}={}", urlencoding::encode(&value)));
        }
    }

    if !changed {
        return None;
    }

    let mut filtered = base.to_string();
    if !pairs.is_empty() {
        filtered.push('?');
        filtered.push_str(&pairs.join("&"));
    }
    filtered.push_str(fragment);
    Some(filtered)
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestRecord {
        RequestRecord::get("https://api.example.com/items?token=abc&page=2#top")
            .with_header("Authorization", "secret")
            .with_header("Accept", "application/json")
    }

    #[test]
    fn test_no_rules_passes_through() {
        let original = request();
        assert_eq!(Filter::new().filter_request(original.clone()), original);
    }

    #[test]
    fn test_header_rules() {
        let filter = Filter::new()
            .header("authorization", FilterRule::Replace("REDACTED".to_string()))
            .header("Accept", FilterRule::Remove)
            .header("X-Missing", FilterRule::Replace("never".to_string()));

        let filtered = filter.filter_request(request());
        assert_eq!(filtered.headers.get("Authorization"), Some("REDACTED"));
        assert_eq!(filtered.headers.iter().next(), Some(("Authorization", "REDACTED")));
        assert!(!filtered.headers.contains("Accept"));
        assert!(!filtered.headers.contains("X-Missing"));
    }

    #[test]
    fn test_header_closure() {
        let filter = Filter::new().header(
            "Authorization",
            FilterRule::closure(|_, value| Some(format!("{}***", &value[..2]))),
        );
        let filtered = filter.filter_request(request());
        assert_eq!(filtered.headers.get("authorization"), Some("se***"));

        let filter = Filter::new().header("Authorization", FilterRule::closure(|_, _| None));
        let filtered = filter.filter_request(request());
        assert!(!filtered.headers.contains("Authorization"));
    }

    #[test]
    fn test_header_closure_sees_request_spelling() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let filter = Filter::new().header(
            "x-api-key",
            FilterRule::closure(move |name, value| {
                log.lock().unwrap().push(name.to_string());
                Some(value.to_uppercase())
            }),
        );

        let request = RequestRecord::get("https://api.example.com/").with_header("X-Api-Key", "abc");
        let filtered = filter.filter_request(request);

        assert_eq!(*seen.lock().unwrap(), ["X-Api-Key"]);
        assert_eq!(filtered.headers.iter().next(), Some(("X-Api-Key", "ABC")));
    }

    #[test]
    fn test_query_rules() {
        let filter = Filter::new().query_parameter("token", FilterRule::Replace("x y".to_string()));
        let filtered = filter.filter_request(request());
        assert_eq!(
            filtered.url,
            "https://api.example.com/items?token=x%20y&page=2#top"
        );

        let filter = Filter::new().query_parameter("token", FilterRule::Remove);
        let filtered = filter.filter_request(request());
        assert_eq!(filtered.url, "https://api.example.com/items?page=2#top");

        let filter = Filter::new()
            .query_parameter("token", FilterRule::Remove)
            .query_parameter("page", FilterRule::closure(|_, _| None));
        let filtered = filter.filter_request(request());
        assert_eq!(filtered.url, "https://api.example.com/items#top");
    }

    #[test]
    fn test_query_closure_receives_decoded_value() {
        let filter = Filter::new().query_parameter(
            "q",
            FilterRule::closure(|name, value| Some(format!("{name}:{}", value.len()))),
        );
        let filtered = filter.filter_request(RequestRecord::get("http://example.com/?q=a%20b+c"));
        assert_eq!(filtered.url, "http://example.com/?q=q%3A5");
    }

    #[test]
    fn test_unmatched_query_is_untouched() {
        let filter = Filter::new().query_parameter("secret", FilterRule::Remove);
        let url = "http://example.com/search?q=hello+world&x=%2F";
        let filtered = filter.filter_request(RequestRecord::get(url));
        assert_eq!(filtered.url, url);
    }

    #[test]
    fn test_request_hook_runs_last() {
        let filter = Filter::new()
            .header("Authorization", FilterRule::Replace("R".to_string()))
            .request_hook(|mut request| {
                assert_eq!(request.headers.get("Authorization"), Some("R"));
                request.url = request.url.replace("/items", "/things");
                request
            });
        let filtered = filter.filter_request(request());
        assert!(filtered.url.contains("/things"));
    }

    #[test]
    fn test_redacting_convenience() {
        let filter = Filter::redacting(["Authorization"], ["token"], DEFAULT_REPLACEMENT);
        let filtered = filter.filter_request(request());
        assert_eq!(filtered.headers.get("Authorization"), Some("Redacted"));
        assert!(filtered.url.contains("token=Redacted"));
    }

    #[test]
    fn test_response_filter() {
        let response = ResponseRecord::new("http://example.com", 200)
            .with_header("Set-Cookie", "session=1")
            .with_header("Content-Type", "text/plain");

        let filter = Filter::new().response_header("set-cookie", FilterRule::Remove);
        let (filtered, body) = filter
            .filter_response(response.clone(), Some(Bytes::from_static(b"hi")))
            .unwrap();
        assert!(!filtered.headers.contains("Set-Cookie"));
        assert_eq!(body, Some(Bytes::from_static(b"hi")));

        let filter = Filter::new().response_hook(|response, _| {
            (response.status != 200).then_some((response, None))
        });
        assert!(filter.filter_response(response, None).is_none());
    }
}
