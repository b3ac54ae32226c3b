use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{MembershipOracle, MembershipScope};
use crate::config::MembershipConfig;
use crate::error::{PlaybookError, PlaybookResult};

/// Membership lookups against a Mattermost-compatible REST API.
///
/// `GET /api/v4/channels/{channel}/members/{user}` and
/// `GET /api/v4/teams/{team}/members/{user}`: 200 means member, 404 means not
/// a member, anything else is a dependency failure. Ids are sent as single
/// percent-encoded path segments.
pub struct HttpMembershipOracle {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpMembershipOracle {
    pub fn new(config: &MembershipConfig) -> PlaybookResult<Self> {
        if config.base_url.is_empty() {
            return Err(PlaybookError::InvalidConfigValue {
                key: "membership.base_url".to_string(),
                message: "required for the HTTP membership oracle".to_string(),
            });
        }

        let base_url = Url::parse(config.base_url.trim())
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| PlaybookError::InvalidConfigValue {
                key: "membership.base_url".to_string(),
                message: format!("'{}' is not an absolute base URL", config.base_url),
            })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| PlaybookError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn member_url(&self, user_id: &str, scope: &MembershipScope) -> PlaybookResult<Url> {
        let collection = match scope {
            MembershipScope::Channel(_) => "channels",
            MembershipScope::Team(_) => "teams",
        };
        for id in [scope.id(), user_id] {
            if id.is_empty() || id == "." || id == ".." {
                return Err(PlaybookError::invalid_field(
                    collection,
                    format!("'{}' cannot be looked up in the membership directory", id),
                ));
            }
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PlaybookError::Internal("membership base URL has no path".to_string()))?
            .pop_if_empty()
            .extend(["api", "v4", collection, scope.id(), "members", user_id]);
        Ok(url)
    }
}

#[async_trait]
impl MembershipOracle for HttpMembershipOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn is_member(&self, user_id: &str, scope: &MembershipScope) -> PlaybookResult<bool> {
        let url = self.member_url(user_id, scope)?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%scope, user_id, status = status.as_u16(), "Membership lookup");

        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            // Mattermost answers 403 when the caller cannot see a private channel.
            StatusCode::FORBIDDEN => Ok(false),
            other => {
                warn!(%scope, status = other.as_u16(), "Membership directory returned an error");
                Err(PlaybookError::membership_unavailable(format!(
                    "unexpected status {} for {}",
                    other, scope
                )))
            }
        }
    }
}
