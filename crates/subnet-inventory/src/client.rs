//! Inventory API client
//!
//! Talks to the subnet inventory endpoint: `/api/v1/subnets/` filtered by
//! account and region, paginated through `next` links.

use crate::error::InventoryError;
use crate::inventory_trait::SubnetInventory;
use crate::models::{CloudSubnet, PaginatedResponse};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Subnet inventory API client
#[derive(Debug)]
pub struct InventoryClient {
    client: Client,
    base_url: String,
    token: String,
    account: String,
    region: String,
}

impl InventoryClient {
    /// Create a new inventory client
    ///
    /// # Arguments
    /// * `base_url` - Inventory base URL (e.g., "http://inventory.infra:8080")
    /// * `token` - API token for authentication
    /// * `account` - Cloud account the tenant networks live in
    /// * `region` - Cloud region the tenant networks live in
    pub fn new(
        base_url: String,
        token: String,
        account: String,
        region: String,
    ) -> Result<Self, InventoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            account,
            region,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Query string selecting this client's account and region
    pub fn subnets_path(&self) -> String {
        format!(
            "/api/v1/subnets/?account={}&region={}",
            urlencoding::encode(&self.account),
            urlencoding::encode(&self.region)
        )
    }

    /// Validate the API token by making a simple authenticated request.
    ///
    /// # Returns
    /// * `Ok(())` - Token is valid and the inventory is reachable
    /// * `Err(InventoryError)` - Token is invalid or the inventory is unreachable
    pub async fn validate_token(&self) -> Result<(), InventoryError> {
        let url = format!("{}/api/v1/status/", self.base_url);
        debug!("Validating inventory token and connectivity");

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == 401 || status == 403 {
            return Err(InventoryError::Authentication(format!(
                "{} - {}",
                status, body
            )));
        }

        if !status.is_success() {
            return Err(InventoryError::Api(format!(
                "Failed to validate token: {} - {}",
                status, body
            )));
        }

        debug!("Token validated successfully");
        Ok(())
    }

    /// Fetch all pages of a paginated response
    async fn fetch_all_pages<T: for<'de> serde::Deserialize<'de>>(
        &self,
        mut url: String,
    ) -> Result<Vec<T>, InventoryError> {
        let mut all_results = Vec::new();

        loop {
            debug!("Fetching page: {}", url);

            let response = self
                .client
                .get(&url)
                .header("Authorization", self.auth_header())
                .header("Accept", "application/json")
                .send()
                .await?;

            let status = response.status();
            if status == 401 || status == 403 {
                let body = response.text().await.unwrap_or_default();
                return Err(InventoryError::Authentication(format!(
                    "{} - {}",
                    status, body
                )));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(InventoryError::Api(format!(
                    "Failed to fetch page: {} - {}",
                    status, body
                )));
            }

            let response_text = response.text().await?;
            let page: PaginatedResponse<T> = serde_json::from_str(&response_text)?;
            all_results.extend(page.results);

            match page.next {
                Some(next_url) => url = self.build_url(&next_url),
                None => break,
            }
        }

        Ok(all_results)
    }
}

#[async_trait::async_trait]
impl SubnetInventory for InventoryClient {
    async fn list_subnets(&self) -> Result<Vec<CloudSubnet>, InventoryError> {
        let url = self.build_url(&self.subnets_path());
        let subnets: Vec<CloudSubnet> = self.fetch_all_pages(url).await?;
        debug!(
            "Inventory returned {} subnets for {}/{}",
            subnets.len(),
            self.account,
            self.region
        );
        Ok(subnets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> InventoryClient {
        InventoryClient::new(
            "http://inventory.infra:8080/".to_string(),
            "secret".to_string(),
            "1234 5678".to_string(),
            "eu-central-1".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url(), "http://inventory.infra:8080");
    }

    #[test]
    fn test_subnets_path_encodes_filters() {
        assert_eq!(
            client().subnets_path(),
            "/api/v1/subnets/?account=1234%205678&region=eu-central-1"
        );
    }

    #[test]
    fn test_next_link_resolution() {
        let c = client();
        assert_eq!(
            c.build_url("/api/v1/subnets/?page=2"),
            "http://inventory.infra:8080/api/v1/subnets/?page=2"
        );
        assert_eq!(
            c.build_url("https://other/api/v1/subnets/?page=2"),
            "https://other/api/v1/subnets/?page=2"
        );
    }

    #[test]
    fn test_page_deserialization() {
        let body = r#"{
            "count": 2,
            "next": null,
            "results": [
                {"id": "subnet-1", "cidrBlock": "10.1.0.0/24", "vpcId": "vpc-1"},
                {"id": "subnet-2", "cidrBlock": "10.1.1.0/24", "state": "available"}
            ]
        }"#;
        let page: PaginatedResponse<CloudSubnet> = serde_json::from_str(body).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].cidr_block, "10.1.0.0/24");
        assert_eq!(page.results[1].state.as_deref(), Some("available"));
        assert!(page.next.is_none());
    }
}
