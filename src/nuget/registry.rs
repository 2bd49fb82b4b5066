use crate::error::{NugradeError, Result};
use crate::nuget::catalog::{CatalogEntry, PackageId};
use crate::nuget::version::SemanticVersion;
use crate::registry::RegistryClient;
use jiff::Timestamp;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_REGISTRATION_BASE: &str = "https://api.nuget.org/v3/registration5-gz-semver2";
const MAX_REGISTRATION_BYTES: usize = 20 * 1024 * 1024;

/// nuget.org stamps delisted versions with this publish year.
const DELISTED_PUBLISH_YEAR: i16 = 1900;

/// NuGet v3 registration client
pub struct NugetRegistry {
    client: Client,
    base_url: String,
}

impl NugetRegistry {
    pub fn with_base_url(base_url: &str, request_timeout: Duration) -> Result<Self> {
        Self::validate_registry_url(base_url)?;
        let client = Self::build_client(request_timeout)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch every published version of a package.
    ///
    /// Returns `Ok(None)` when the registry does not know the package. Registration pages
    /// that are not inlined in the index are fetched individually.
    pub fn fetch_versions(&self, id: &PackageId) -> Result<Option<Vec<CatalogEntry>>> {
        let index_url = format!("{}/{}/index.json", self.base_url, id.to_lowercase());

        let index: RegistrationIndex = match self.get_json(&index_url)? {
            Some(index) => index,
            None => return Ok(None),
        };

        let mut leaves = Vec::new();
        for page in index.items {
            match page.items {
                Some(items) => leaves.extend(items),
                None => match self.get_json::<RegistrationPage>(&page.id)? {
                    Some(fetched) => leaves.extend(fetched.items.unwrap_or_default()),
                    None => warn!(package = %id, page = %page.id, "Registration page missing"),
                },
            }
        }

        Ok(Some(entries_from_leaves(id, leaves)))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        debug!(url, "Fetching registration document");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| NugradeError::Registry(format!("{url}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(NugradeError::Registry(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let text = response
            .text()
            .map_err(|e| NugradeError::Registry(format!("{url}: {e}")))?;

        if text.len() > MAX_REGISTRATION_BYTES {
            return Err(NugradeError::Registry(format!(
                "Registration response from {url} exceeded 20MB limit"
            )));
        }

        Ok(Some(serde_json::from_str(&text)?))
    }

    fn build_client(request_timeout: Duration) -> Result<Client> {
        Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("nugrade/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(|e| NugradeError::Registry(e.to_string()))
    }

    pub(crate) fn validate_registry_url(url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|_| NugradeError::Config(format!("Invalid registry URL: {url}")))?;

        match parsed.scheme() {
            "https" | "http" => {}
            scheme => {
                return Err(NugradeError::Config(format!(
                    "Unsupported registry scheme: {scheme}"
                )));
            }
        }

        if let Some(host) = parsed.host_str() {
            if Self::is_private_host(host) {
                return Err(NugradeError::Config(format!(
                    "Registry host '{host}' is not allowed"
                )));
            }
        }

        Ok(())
    }

    fn is_private_host(host: &str) -> bool {
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            match ip {
                IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
                IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local(),
            }
        } else {
            false
        }
    }
}

impl RegistryClient for NugetRegistry {
    fn fetch_versions(&self, id: &PackageId) -> Result<Option<Vec<CatalogEntry>>> {
        NugetRegistry::fetch_versions(self, id)
    }
}

/// Convert raw registration leaves into typed catalog entries, dropping records whose
/// version or publish date cannot be parsed.
fn entries_from_leaves(id: &PackageId, leaves: Vec<RegistrationLeaf>) -> Vec<CatalogEntry> {
    leaves
        .into_iter()
        .filter_map(|leaf| match leaf.catalog_entry.into_entry(id) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(package = %id, error = %e, "Dropping unusable registry record");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    #[serde(default)]
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Deserialize)]
struct RegistrationLeaf {
    #[serde(rename = "catalogEntry")]
    catalog_entry: RawCatalogEntry,
}

#[derive(Debug, Deserialize)]
struct RawCatalogEntry {
    version: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    listed: Option<bool>,
}

impl RawCatalogEntry {
    fn into_entry(self, id: &PackageId) -> Result<CatalogEntry> {
        let version = SemanticVersion::parse(&self.version)?;

        let published_raw = self.published.ok_or_else(|| {
            NugradeError::Registry(format!("{} {} has no publish date", id, self.version))
        })?;
        let published: Timestamp = published_raw.parse().map_err(|e| {
            NugradeError::Registry(format!(
                "{} {} has invalid publish date '{}': {}",
                id, self.version, published_raw, e
            ))
        })?;

        let listed = self.listed.unwrap_or_else(|| {
            published.to_zoned(jiff::tz::TimeZone::UTC).year() != DELISTED_PUBLISH_YEAR
        });

        Ok(CatalogEntry::new(id.clone(), version, published, listed))
    }
}
