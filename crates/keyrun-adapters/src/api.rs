//! Index calls that precede the leaderboard fan-out.

use keyrun_core::{Region, ShardTopology};
use keyrun_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;

use crate::auth::AccessToken;
use crate::endpoints::ApiEndpoints;
use crate::payload::{cluster_id_from_href, ClusterIndex, PeriodIndex};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("undecodable {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("cluster index for {region} lists no clusters")]
    EmptyIndex { region: Region },
    #[error("invalid API base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

pub fn parse_period_index(body: &[u8]) -> Result<u32, ApiError> {
    let index: PeriodIndex = serde_json::from_slice(body).map_err(|source| ApiError::Decode {
        what: "period index",
        source,
    })?;
    Ok(index.current_period.id)
}

/// Cluster ids from the index; hrefs that carry no id are skipped.
pub fn parse_cluster_index(body: &[u8]) -> Result<Vec<u32>, ApiError> {
    let index: ClusterIndex = serde_json::from_slice(body).map_err(|source| ApiError::Decode {
        what: "cluster index",
        source,
    })?;
    Ok(index
        .connected_realms
        .iter()
        .filter_map(|link| cluster_id_from_href(&link.href))
        .collect())
}

#[derive(Debug, Clone)]
pub struct GameDataApi {
    fetcher: HttpFetcher,
    endpoints: ApiEndpoints,
}

impl GameDataApi {
    pub fn new(fetcher: HttpFetcher, endpoints: ApiEndpoints) -> Self {
        Self { fetcher, endpoints }
    }

    pub fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub async fn current_period(
        &self,
        region: Region,
        token: &AccessToken,
    ) -> Result<u32, ApiError> {
        let url = self.endpoints.period_index_url(region, token);
        let response = self.fetcher.fetch_bytes(&url).await?;
        let period = parse_period_index(&response.body)?;
        debug!(%region, period, "resolved current period");
        Ok(period)
    }

    pub async fn cluster_index(
        &self,
        region: Region,
        token: &AccessToken,
    ) -> Result<Vec<u32>, ApiError> {
        let url = self.endpoints.cluster_index_url(region, token);
        let response = self.fetcher.fetch_bytes(&url).await?;
        let ids = parse_cluster_index(&response.body)?;
        if ids.is_empty() {
            return Err(ApiError::EmptyIndex { region });
        }
        debug!(%region, clusters = ids.len(), "resolved cluster index");
        Ok(ids)
    }

    /// Resolves `region`'s clusters into `topology` unless already present.
    pub async fn ensure_clusters(
        &self,
        topology: &mut ShardTopology,
        region: Region,
        token: &AccessToken,
    ) -> Result<(), ApiError> {
        if topology.contains_region(region) {
            return Ok(());
        }
        let ids = self.cluster_index(region, token).await?;
        topology.set_region(region, ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_index_reads_current_period() {
        let body = br#"{"periods":[{"id":775},{"id":776},{"id":777}],"current_period":{"id":777,"key":{"href":"x"}}}"#;
        assert_eq!(parse_period_index(body).unwrap(), 777);
        assert!(matches!(
            parse_period_index(br#"{"periods":[]}"#),
            Err(ApiError::Decode { .. })
        ));
    }

    #[test]
    fn cluster_index_collects_ids_from_hrefs() {
        let body = br#"{"connected_realms":[
            {"href":"https://us.api.blizzard.com/data/wow/connected-realm/11?namespace=dynamic-us"},
            {"href":"https://us.api.blizzard.com/data/wow/connected-realm/3694?namespace=dynamic-us"},
            {"href":"https://us.api.blizzard.com/data/wow/search"}
        ]}"#;
        assert_eq!(parse_cluster_index(body).unwrap(), vec![11, 3694]);
    }
}
