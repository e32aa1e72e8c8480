// Track artwork resolution
// Best-effort lookup of album artwork for a track's store reference

use crate::player::Track;
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::future::Future;

/// Outcome of asking the catalog service for access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied,
    Unavailable,
}

/// A song found in the catalog
#[derive(Debug, Clone)]
pub struct CatalogSong {
    pub id: u64,
    /// Artwork URL with `{w}` and `{h}` placeholders for the image size
    pub artwork_template: Option<String>,
}

impl CatalogSong {
    pub fn artwork_url(&self, width: u32, height: u32) -> Option<String> {
        self.artwork_template.as_ref().map(|template| {
            template
                .replace("{w}", &width.to_string())
                .replace("{h}", &height.to_string())
        })
    }
}

/// Music catalog that can look songs up by store identifier
pub trait Catalog: Send + Sync + 'static {
    /// Request access to the catalog
    fn authorize(&self) -> impl Future<Output = Authorization> + Send;

    /// Look up exactly one song by its identifier
    fn song(&self, id: u64) -> impl Future<Output = Result<Option<CatalogSong>>> + Send;
}

/// Extract the catalog identifier from a store reference.
///
/// We expect a format similar to `itmss://itunes.com/album?p=1525065667&i=1525065832`,
/// where `i` names the song.
pub fn catalog_id(remote_ref: &str) -> Option<u64> {
    let url = Url::parse(remote_ref).ok()?;
    let (_, value) = url.query_pairs().find(|(name, _)| name == "i")?;
    value.parse().ok()
}

/// Resolves square artwork URLs for tracks; never fails, only finds nothing
pub struct ArtworkResolver<C> {
    catalog: C,
    size: u32,
}

impl<C: Catalog> ArtworkResolver<C> {
    pub fn new(catalog: C, size: u32) -> Self {
        Self { catalog, size }
    }

    pub async fn resolve(&self, track: &Track) -> Option<String> {
        let Some(remote_ref) = track.remote_ref.as_deref() else {
            log::debug!("Track has no store reference; not going to try to fetch artwork.");
            return None;
        };

        match self.catalog.authorize().await {
            Authorization::Authorized => {}
            other => {
                log::debug!("Catalog access not granted ({:?}), skipping artwork", other);
                return None;
            }
        }

        let Some(id) = catalog_id(remote_ref) else {
            log::warn!("Could not find a song identifier in store reference {}", remote_ref);
            return None;
        };

        match self.catalog.song(id).await {
            Ok(Some(song)) => {
                let url = song.artwork_url(self.size, self.size);
                if url.is_none() {
                    log::debug!("Catalog song {} has no artwork", song.id);
                }
                url
            }
            Ok(None) => {
                log::debug!("Catalog has no song with id {}", id);
                None
            }
            Err(e) => {
                log::error!("Failed to obtain artwork for track {:?}: {:#}", track.title, e);
                None
            }
        }
    }
}

/// Catalog backed by the public iTunes lookup endpoint
pub struct ITunesCatalog {
    client: Client,
    lookup_url: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupItem {
    track_id: Option<u64>,
    artwork_url100: Option<String>,
}

impl ITunesCatalog {
    pub fn new(client: Client, lookup_url: String, enabled: bool) -> Self {
        Self {
            client,
            lookup_url,
            enabled,
        }
    }
}

impl Catalog for ITunesCatalog {
    async fn authorize(&self) -> Authorization {
        if !self.enabled {
            return Authorization::Denied;
        }
        if Url::parse(&self.lookup_url).is_err() {
            return Authorization::Unavailable;
        }
        Authorization::Authorized
    }

    async fn song(&self, id: u64) -> Result<Option<CatalogSong>> {
        let response = self
            .client
            .get(&self.lookup_url)
            .query(&[("id", id.to_string()), ("entity", "song".to_string()), ("limit", "1".to_string())])
            .send()
            .await
            .context("Failed to send catalog lookup request")?;

        if !response.status().is_success() {
            anyhow::bail!("Catalog lookup failed with status {}", response.status());
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .context("Failed to parse catalog lookup response")?;

        Ok(lookup.results.into_iter().next().map(|item| CatalogSong {
            id: item.track_id.unwrap_or(id),
            // The lookup hands out 100x100 thumbnails; the size is part of the path
            artwork_template: item
                .artwork_url100
                .map(|url| url.replace("100x100", "{w}x{h}")),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory catalog
    pub(crate) struct FakeCatalog {
        pub authorization: Authorization,
        pub song: Option<CatalogSong>,
        pub fail: bool,
        pub lookups: AtomicUsize,
    }

    impl Default for FakeCatalog {
        fn default() -> Self {
            Self {
                authorization: Authorization::Authorized,
                song: None,
                fail: false,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl FakeCatalog {
        pub fn with_artwork(template: &str) -> Self {
            Self {
                song: Some(CatalogSong {
                    id: 1525065832,
                    artwork_template: Some(template.to_string()),
                }),
                ..Self::default()
            }
        }
    }

    impl Catalog for FakeCatalog {
        async fn authorize(&self) -> Authorization {
            self.authorization
        }

        async fn song(&self, _id: u64) -> Result<Option<CatalogSong>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("catalog offline");
            }
            Ok(self.song.clone())
        }
    }

    const STORE_URL: &str = "itmss://itunes.com/album?p=1525065667&i=1525065832";

    fn track(remote_ref: Option<&str>) -> Track {
        Track::new("Song", Some("Band".to_string()), None, 180.0)
            .with_remote_ref(remote_ref.map(str::to_string))
    }

    #[test]
    fn catalog_id_reads_i_parameter() {
        assert_eq!(catalog_id(STORE_URL), Some(1525065832));
        assert_eq!(catalog_id("itmss://itunes.com/album?p=1525065667"), None);
        assert_eq!(catalog_id("itmss://itunes.com/album?i=abc"), None);
        assert_eq!(catalog_id("not a url"), None);
    }

    #[test]
    fn artwork_url_fills_in_size() {
        let song = CatalogSong {
            id: 1,
            artwork_template: Some("https://img.example/{w}x{h}bb.jpg".to_string()),
        };
        assert_eq!(
            song.artwork_url(512, 512).as_deref(),
            Some("https://img.example/512x512bb.jpg")
        );
    }

    #[tokio::test]
    async fn resolves_square_artwork() {
        let resolver = ArtworkResolver::new(FakeCatalog::with_artwork("https://img.example/{w}x{h}bb.jpg"), 512);
        assert_eq!(
            resolver.resolve(&track(Some(STORE_URL))).await.as_deref(),
            Some("https://img.example/512x512bb.jpg")
        );
    }

    #[tokio::test]
    async fn missing_reference_skips_the_catalog() {
        let resolver = ArtworkResolver::new(FakeCatalog::with_artwork("x"), 512);
        assert_eq!(resolver.resolve(&track(None)).await, None);
        assert_eq!(resolver.catalog.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_reference_yields_no_artwork() {
        let resolver = ArtworkResolver::new(FakeCatalog::with_artwork("x"), 512);
        let missing_i = track(Some("itmss://itunes.com/album?p=1525065667"));
        assert_eq!(resolver.resolve(&missing_i).await, None);
        assert_eq!(resolver.catalog.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn denied_authorization_yields_no_artwork() {
        let catalog = FakeCatalog {
            authorization: Authorization::Denied,
            ..FakeCatalog::with_artwork("x")
        };
        let resolver = ArtworkResolver::new(catalog, 512);
        assert_eq!(resolver.resolve(&track(Some(STORE_URL))).await, None);
    }

    #[tokio::test]
    async fn catalog_failures_and_misses_are_silent() {
        let failing = ArtworkResolver::new(
            FakeCatalog {
                fail: true,
                ..FakeCatalog::with_artwork("x")
            },
            512,
        );
        assert_eq!(failing.resolve(&track(Some(STORE_URL))).await, None);

        let empty = ArtworkResolver::new(FakeCatalog::default(), 512);
        assert_eq!(empty.resolve(&track(Some(STORE_URL))).await, None);

        let no_art = ArtworkResolver::new(
            FakeCatalog {
                song: Some(CatalogSong {
                    id: 1,
                    artwork_template: None,
                }),
                ..FakeCatalog::default()
            },
            512,
        );
        assert_eq!(no_art.resolve(&track(Some(STORE_URL))).await, None);
    }

    #[tokio::test]
    async fn disabled_itunes_catalog_denies_access() {
        let catalog = ITunesCatalog::new(Client::new(), "https://itunes.apple.com/lookup".to_string(), false);
        assert_eq!(catalog.authorize().await, Authorization::Denied);
    }
}
