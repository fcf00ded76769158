//! Blocking registry client and the [`RegistrySearch`] capability.

use std::sync::Arc;

use itertools::Itertools;
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{debug, instrument, warn};

use crate::{ObjectKind, Query, RateLimiter, RegistryConfig, RegistryError, Result};

/// Fields requested for parcel lookups, in response order.
pub const PARCEL_FIELDS: [&str; 7] = [
    "geom_wkt",
    "wojewodztwo",
    "powiat",
    "gmina",
    "obreb",
    "numer",
    "teryt",
];

/// Anything that can answer a registry query with raw response rows.
///
/// Implemented by [`UldkSearch`] (the HTTP client), by decorators such as
/// [`SearchLogger`](crate::SearchLogger), and by [`FnSearch`] for in-process fakes.
pub trait RegistrySearch: Send + Sync {
    fn search(&self, query: &Query) -> Result<Vec<String>>;

    /// Run a query that yields exactly one record and return that record.
    fn search_one(&self, query: &Query) -> Result<String> {
        self.search(query)?
            .into_iter()
            .next()
            .ok_or(RegistryError::EmptyResponse)
    }
}

impl<S: RegistrySearch + ?Sized> RegistrySearch for Arc<S> {
    fn search(&self, query: &Query) -> Result<Vec<String>> {
        (**self).search(query)
    }
}

impl<S: RegistrySearch + ?Sized> RegistrySearch for Box<S> {
    fn search(&self, query: &Query) -> Result<Vec<String>> {
        (**self).search(query)
    }
}

/// Adapts a closure into a [`RegistrySearch`].
#[derive(Debug, Clone)]
pub struct FnSearch<F>(pub F);

impl<F> RegistrySearch for FnSearch<F>
where
    F: Fn(&Query) -> Result<Vec<String>> + Send + Sync,
{
    fn search(&self, query: &Query) -> Result<Vec<String>> {
        (self.0)(query)
    }
}

pub const fn search_fn<F>(f: F) -> FnSearch<F>
where
    F: Fn(&Query) -> Result<Vec<String>> + Send + Sync,
{
    FnSearch(f)
}

/// HTTP client for one object kind and one set of requested fields.
#[derive(Debug, Clone)]
pub struct UldkSearch {
    client: Client,
    base_url: Url,
    object: ObjectKind,
    fields: Vec<String>,
    limiter: Arc<RateLimiter>,
}

impl UldkSearch {
    pub fn new<I, S>(
        config: &RegistryConfig,
        object: ObjectKind,
        fields: I,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url,
            object,
            fields: fields.into_iter().map(Into::into).collect(),
            limiter,
        })
    }

    /// Client for parcel lookups by id or point, requesting [`PARCEL_FIELDS`].
    pub fn parcels(config: &RegistryConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::new(config, ObjectKind::Parcel, PARCEL_FIELDS, limiter)
    }

    /// Client listing administrative units of `kind`, requesting `name|teryt` rows.
    pub fn admin_units(
        config: &RegistryConfig,
        kind: ObjectKind,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        Self::new(config, kind, [kind.as_str(), "teryt"], limiter)
    }

    pub const fn object(&self) -> ObjectKind {
        self.object
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn url(&self, query: &Query) -> Result<Url> {
        build_url(&self.base_url, self.object, &self.fields, query)
    }
}

impl RegistrySearch for UldkSearch {
    #[instrument(name = "Registry request", skip_all, fields(object = %self.object, query = %query), level = "debug")]
    fn search(&self, query: &Query) -> Result<Vec<String>> {
        let url = self.url(query)?;
        let waited = self.limiter.acquire();
        debug!(%url, waited_ms = waited.as_millis(), "Sending registry request");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(RegistryError::NoResponse)?
            .error_for_status()?;
        let body = response.text().map_err(RegistryError::NoResponse)?;
        let mut rows = parse_response(&body)?;
        if query.is_single() && rows.len() > 1 {
            warn!(
                rows = rows.len(),
                "Single-record query answered with several rows, keeping the first"
            );
            rows.truncate(1);
        }
        Ok(rows)
    }
}

/// Build the query URL: `obiekt`, `wynik`, optional `request`, then the query's own
/// parameter.
pub fn build_url(
    base: &Url,
    object: ObjectKind,
    fields: &[String],
    query: &Query,
) -> Result<Url> {
    let (name, value) = query.param();
    let mut params = vec![
        ("obiekt", object.as_str().to_string()),
        ("wynik", fields.iter().join(",")),
    ];
    if let Some(request) = query.request() {
        params.push(("request", request.to_string()));
    }
    params.push((name, value));
    Url::parse_with_params(base.as_str(), &params).map_err(|e| RegistryError::InvalidUrl(e.to_string()))
}

/// Split a response body into records.
///
/// The first line is the status; anything but `"0"` is a registry error carrying the
/// status verbatim. Trailing empty lines are dropped.
pub fn parse_response(body: &str) -> Result<Vec<String>> {
    let mut lines = body.split('\n').map(|line| line.trim_end_matches('\r'));
    let status = match lines.next() {
        Some(status) if !status.trim().is_empty() => status.trim(),
        _ => return Err(RegistryError::EmptyResponse),
    };
    if status != "0" {
        return Err(RegistryError::Registry(status.to_string()));
    }

    let mut rows: Vec<String> = lines.map(str::to_string).collect();
    while rows.last().is_some_and(String::is_empty) {
        rows.pop();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::UldkPoint;

    fn query_pairs(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn parcel_client() -> UldkSearch {
        UldkSearch::parcels(
            &RegistryConfig::default(),
            Arc::new(RateLimiter::uldk_default()),
        )
        .unwrap()
    }

    #[test]
    fn test_point_url() {
        let client = parcel_client();
        let url = client
            .url(&Query::Point(UldkPoint::new(500_000.0, 600_000.0, 2180)))
            .unwrap();
        let pairs = query_pairs(&url);

        assert_eq!(url.host_str(), Some("uldk.gugik.gov.pl"));
        assert_eq!(pairs["obiekt"], "dzialka");
        assert_eq!(pairs["wynik"], "geom_wkt,wojewodztwo,powiat,gmina,obreb,numer,teryt");
        assert_eq!(pairs["request"], "GetParcelByXY");
        assert_eq!(pairs["xy"], "500000,600000,2180");
    }

    #[test]
    fn test_id_url() {
        let client = parcel_client();
        let url = client.url(&Query::Id("141201_1.0001.1/2".into())).unwrap();
        let pairs = query_pairs(&url);
        assert_eq!(pairs["request"], "GetParcelById");
        assert_eq!(pairs["id"], "141201_1.0001.1/2");
    }

    #[test]
    fn test_admin_listing_url_has_no_request() {
        let client = UldkSearch::admin_units(
            &RegistryConfig::default(),
            ObjectKind::County,
            Arc::new(RateLimiter::uldk_default()),
        )
        .unwrap();
        let url = client.url(&Query::Teryt("02".into())).unwrap();
        let pairs = query_pairs(&url);

        assert_eq!(pairs["obiekt"], "powiat");
        assert_eq!(pairs["wynik"], "powiat,teryt");
        assert_eq!(pairs["teryt"], "02");
        assert!(!pairs.contains_key("request"));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = RegistryConfig {
            base_url: "not a url".into(),
            ..RegistryConfig::default()
        };
        let result = UldkSearch::parcels(&config, Arc::new(RateLimiter::uldk_default()));
        assert!(matches!(result, Err(RegistryError::InvalidUrl(_))));
    }

    #[test]
    fn test_parse_success_strips_trailing_line() {
        let rows = parse_response("0\nfirst|row\nsecond|row\n").unwrap();
        assert_eq!(rows, vec!["first|row", "second|row"]);
    }

    #[test]
    fn test_parse_crlf_body() {
        let rows = parse_response("0\r\na|b\r\n").unwrap();
        assert_eq!(rows, vec!["a|b"]);
    }

    #[test]
    fn test_parse_error_status_is_verbatim() {
        let err = parse_response("-1 brak wyników\n").unwrap_err();
        assert_eq!(err.status(), Some("-1 brak wyników"));
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(matches!(
            parse_response(""),
            Err(RegistryError::EmptyResponse)
        ));
    }

    #[test]
    fn test_search_one_on_empty_result() {
        let search = search_fn(|_q: &Query| Ok(Vec::new()));
        assert!(matches!(
            search.search_one(&Query::Id("x".into())),
            Err(RegistryError::EmptyResponse)
        ));
    }
}
