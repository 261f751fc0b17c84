//! Microsoft Graph URL building.
//!
//! Group membership is listed through the beta endpoint because the v1.0
//! member lists omit service principals.

use url::Url;

use crate::error::AzureResult;

/// Graph API version segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphVersion {
    #[default]
    V1,
    Beta,
}

impl GraphVersion {
    fn segment(self) -> &'static str {
        match self {
            GraphVersion::V1 => "v1.0",
            GraphVersion::Beta => "beta",
        }
    }
}

/// Builds Graph request URLs with OData query options.
#[derive(Debug, Clone)]
pub struct GraphQuery {
    endpoint: String,
    version: GraphVersion,
    params: Vec<(String, String)>,
}

impl GraphQuery {
    /// `endpoint` is the Graph base endpoint without a version segment.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version: GraphVersion::V1,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn version(mut self, version: GraphVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn select(self, fields: &[&str]) -> Self {
        self.param("$select", fields.join(","))
    }

    #[must_use]
    pub fn top(self, page_size: u32) -> Self {
        self.param("$top", page_size.to_string())
    }

    #[must_use]
    pub fn filter(self, filter: impl Into<String>) -> Self {
        self.param("$filter", filter)
    }

    #[must_use]
    pub fn count(self) -> Self {
        self.param("$count", "true")
    }

    #[must_use]
    pub fn expand(self, relation: impl Into<String>) -> Self {
        self.param("$expand", relation)
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Builds the request URL for `path` segments under the configured
    /// version.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AzureError::Url`] when the endpoint is not
    /// a valid base URL.
    pub fn build(&self, path: &[&str]) -> AzureResult<String> {
        let mut url = Url::parse(&self.endpoint)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            segments.push(self.version.segment());
            for segment in path {
                segments.push(segment);
            }
        }
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    /// Resumes pagination: a non-empty `next_link` wins over a freshly
    /// built first-page URL.
    pub fn build_with_pagination(&self, path: &[&str], next_link: Option<&str>) -> AzureResult<String> {
        match next_link {
            Some(link) if !link.is_empty() => Ok(link.to_string()),
            _ => self.build(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_versioned_url_with_odata_params() {
        let url = GraphQuery::new("https://graph.microsoft.com")
            .select(&["id", "displayName"])
            .top(100)
            .build(&["groups"])
            .unwrap();
        assert_eq!(
            url,
            "https://graph.microsoft.com/v1.0/groups?%24select=id%2CdisplayName&%24top=100"
        );
    }

    #[test]
    fn beta_version_changes_segment() {
        let url = GraphQuery::new("https://graph.microsoft.com")
            .version(GraphVersion::Beta)
            .build(&["groups", "g1", "members"])
            .unwrap();
        assert_eq!(url, "https://graph.microsoft.com/beta/groups/g1/members");
    }

    #[test]
    fn filter_values_are_encoded() {
        let url = GraphQuery::new("https://graph.microsoft.com")
            .filter("(onPremisesSyncEnabled ne true)")
            .count()
            .build(&["groups"])
            .unwrap();
        assert!(url.contains("%24filter=%28onPremisesSyncEnabled+ne+true%29"));
        assert!(url.contains("%24count=true"));
    }

    #[test]
    fn next_link_wins_over_first_page() {
        let query = GraphQuery::new("https://graph.microsoft.com").top(50);
        let next = "https://graph.microsoft.com/v1.0/groups?$skiptoken=abc";
        assert_eq!(
            query.build_with_pagination(&["groups"], Some(next)).unwrap(),
            next
        );
        assert!(query
            .build_with_pagination(&["groups"], None)
            .unwrap()
            .starts_with("https://graph.microsoft.com/v1.0/groups?"));
    }
}
