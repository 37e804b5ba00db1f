//! Request to interaction matching

use std::collections::BTreeSet;

use url::form_urlencoded;
use url::Url;

use super::{Cassette, InteractionRecord, RequestRecord};
use crate::codec;

/// Per-session matching options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Headers used only to break ties between otherwise equal candidates
    pub headers_to_check: BTreeSet<String>,
    /// Query parameters excluded from URL comparison
    pub parameters_to_ignore: BTreeSet<String>,
    /// Compare URL paths only, ignoring scheme, host and query
    pub ignore_base_url: bool,
}

impl MatchPolicy {
    /// Create an empty policy: exact URL matching, no tie-break headers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tie-break header
    #[must_use]
    pub fn check_header(mut self, name: impl Into<String>) -> Self {
        self.headers_to_check.insert(name.into());
        self
    }

    /// Add a query parameter to ignore
    #[must_use]
    pub fn ignore_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters_to_ignore.insert(name.into());
        self
    }
}

impl Cassette {
    /// Find the interaction that should answer `request`
    ///
    /// Candidates must share the method, the URL (modulo ignored parameters)
    /// and the body. Among candidates the first one wins, unless a later one
    /// also agrees on every tie-break header.
    #[must_use]
    pub fn interaction_for(
        &self,
        request: &RequestRecord,
        policy: &MatchPolicy,
    ) -> Option<&InteractionRecord> {
        let mut candidates = self
            .interactions
            .iter()
            .filter(|i| i.request.method == request.method)
            .filter(|i| urls_equal(&i.request.url, &request.url, policy))
            .filter(|i| {
                codec::bodies_equal(
                    i.request.body.as_deref(),
                    &i.request.headers,
                    request.body.as_deref(),
                    &request.headers,
                )
            });

        let first = candidates.next()?;
        if policy.headers_to_check.is_empty() || headers_agree(first, request, policy) {
            return Some(first);
        }

        Some(
            candidates
                .find(|i| headers_agree(i, request, policy))
                .unwrap_or(first),
        )
    }
}

fn headers_agree(interaction: &InteractionRecord, request: &RequestRecord, policy: &MatchPolicy) -> bool {
    policy
        .headers_to_check
        .iter()
        .all(|name| interaction.request.headers.get(name) == request.headers.get(name))
}

/// Compare two URLs under the policy
pub(crate) fn urls_equal(stored: &str, incoming: &str, policy: &MatchPolicy) -> bool {
    if stored == incoming {
        return true;
    }

    let (Ok(stored), Ok(incoming)) = (Url::parse(stored), Url::parse(incoming)) else {
        return false;
    };

    if policy.ignore_base_url {
        return stored.path() == incoming.path();
    }

    canonical_url(&stored, &policy.parameters_to_ignore)
        == canonical_url(&incoming, &policy.parameters_to_ignore)
}

/// `scheme://host[:port]path[?query]` with ignored parameters removed
fn canonical_url(url: &Url, ignored: &BTreeSet<String>) -> String {
    let mut canonical = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{port}"));
    }
    canonical.push_str(url.path());

    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !ignored.contains(name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if !remaining.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(remaining)
            .finish();
        canonical.push('?');
        canonical.push_str(&query);
    }

    canonical
}
