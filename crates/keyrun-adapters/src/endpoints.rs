//! URL construction for the index calls and the per-cluster leaderboard fan-out.

use std::collections::BTreeMap;

use keyrun_core::{Region, ShardTopology};
use reqwest::Url;

use crate::auth::AccessToken;
use crate::ApiError;

pub const DEFAULT_BASE_URL: &str = "https://{region}.api.blizzard.com";
pub const DEFAULT_LOCALE: &str = "en_US";

const REGION_PLACEHOLDER: &str = "{region}";

#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base_template: String,
    locale: String,
    bases: BTreeMap<Region, Url>,
}

impl ApiEndpoints {
    /// `base_template` may contain `{region}`, replaced by the region slug.
    pub fn new(
        base_template: impl Into<String>,
        locale: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let base_template = base_template.into().trim_end_matches('/').to_string();
        let mut bases = BTreeMap::new();
        for region in Region::ALL {
            let base = base_template.replace(REGION_PLACEHOLDER, region.slug());
            let url = Url::parse(&base).map_err(|err| ApiError::InvalidBaseUrl {
                url: base.clone(),
                reason: err.to_string(),
            })?;
            bases.insert(region, url);
        }
        Ok(Self {
            base_template,
            locale: locale.into(),
            bases,
        })
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn base_url(&self, region: Region) -> String {
        self.base_template.replace(REGION_PLACEHOLDER, region.slug())
    }

    fn dynamic_url(&self, region: Region, path: &str, token: &AccessToken) -> String {
        let mut url = self.bases[&region].clone();
        let full_path = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&full_path);
        url.query_pairs_mut()
            .append_pair("namespace", &format!("dynamic-{}", region.slug()))
            .append_pair("locale", &self.locale)
            .append_pair("access_token", token.as_str());
        url.into()
    }

    pub fn period_index_url(&self, region: Region, token: &AccessToken) -> String {
        self.dynamic_url(region, "/data/wow/mythic-keystone/period/index", token)
    }

    pub fn cluster_index_url(&self, region: Region, token: &AccessToken) -> String {
        self.dynamic_url(region, "/data/wow/connected-realm/index", token)
    }

    pub fn leaderboard_url(
        &self,
        region: Region,
        cluster_id: u32,
        activity_id: u32,
        period: u32,
        token: &AccessToken,
    ) -> String {
        self.dynamic_url(
            region,
            &format!(
                "/data/wow/connected-realm/{cluster_id}/mythic-leaderboard/{activity_id}/period/{period}"
            ),
            token,
        )
    }

    /// One leaderboard URL per cluster of `region`. Empty when the region's
    /// cluster index has not been resolved.
    pub fn leaderboard_urls(
        &self,
        topology: &ShardTopology,
        region: Region,
        activity_id: u32,
        period: u32,
        token: &AccessToken,
    ) -> Vec<String> {
        topology
            .clusters(region)
            .unwrap_or_default()
            .iter()
            .map(|cluster| self.leaderboard_url(region, cluster.id, activity_id, period, token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaderboard_url_carries_namespace_locale_and_token() {
        let endpoints = ApiEndpoints::new(DEFAULT_BASE_URL, DEFAULT_LOCALE).unwrap();
        let token = AccessToken::new("tok");
        assert_eq!(
            endpoints.leaderboard_url(Region::Eu, 1096, 375, 777, &token),
            "https://eu.api.blizzard.com/data/wow/connected-realm/1096/mythic-leaderboard/375/period/777?namespace=dynamic-eu&locale=en_US&access_token=tok"
        );
        assert_eq!(
            endpoints.period_index_url(Region::Kr, &token),
            "https://kr.api.blizzard.com/data/wow/mythic-keystone/period/index?namespace=dynamic-kr&locale=en_US&access_token=tok"
        );
    }

    #[test]
    fn fan_out_is_one_url_per_cluster() {
        let endpoints = ApiEndpoints::new("http://127.0.0.1:9000/", "en_GB").unwrap();
        let mut topology = ShardTopology::new();
        topology.set_region(Region::Us, [11, 3, 11]);
        let token = AccessToken::new("t");

        let urls = endpoints.leaderboard_urls(&topology, Region::Us, 380, 12, &token);
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("http://127.0.0.1:9000/data/wow/connected-realm/3/"));
        assert!(urls[1].contains("&locale=en_GB&"));

        assert!(endpoints
            .leaderboard_urls(&topology, Region::Tw, 380, 12, &token)
            .is_empty());
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let endpoints = ApiEndpoints::new("http://127.0.0.1:9000/api/", "en US").unwrap();
        let token = AccessToken::new("a+b/c=&d");

        let url = endpoints.cluster_index_url(Region::Tw, &token);
        assert_eq!(
            url,
            "http://127.0.0.1:9000/api/data/wow/connected-realm/index?namespace=dynamic-tw&locale=en+US&access_token=a%2Bb%2Fc%3D%26d"
        );

        let parsed = Url::parse(&url).unwrap();
        let token_param = parsed
            .query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned());
        assert_eq!(token_param.as_deref(), Some("a+b/c=&d"));
    }

    #[test]
    fn invalid_base_template_is_rejected() {
        assert!(matches!(
            ApiEndpoints::new("not a url/{region}", "en_US"),
            Err(ApiError::InvalidBaseUrl { .. })
        ));
    }
}
