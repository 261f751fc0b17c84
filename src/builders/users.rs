//! User sync.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::config::AzureConfig;
use crate::error::AzureResult;
use crate::graph_client::GraphClient;
use crate::model::{Entitlement, GraphMailboxSettings, GraphUser, Resource, ResourceKind};
use crate::orchestrator::GrantsPage;

const USER_SELECT: [&str; 11] = [
    "id",
    "displayName",
    "mail",
    "userPrincipalName",
    "jobTitle",
    "manager",
    "accountEnabled",
    "employeeType",
    "employeeHireDate",
    "employeeId",
    "department",
];

pub struct UsersBuilder {
    graph: Arc<GraphClient>,
    config: AzureConfig,
}

impl UsersBuilder {
    pub fn new(graph: Arc<GraphClient>, config: AzureConfig) -> Self {
        Self { graph, config }
    }

    /// Mailbox purposes other than a personal mailbox mark the account as
    /// a service account (rooms, equipment, shared mailboxes).
    async fn account_type(&self, user: &GraphUser) -> &'static str {
        if !self.config.mailbox_settings {
            return "human";
        }

        let url = match self
            .graph
            .query()
            .select(&["userPurpose"])
            .build(&["users", &user.id, "mailboxSettings"])
        {
            Ok(url) => url,
            Err(err) => {
                warn!(user_id = %user.id, %err, "error building mailboxSettings request");
                return "human";
            }
        };

        match self.graph.get::<GraphMailboxSettings>(&url).await {
            Ok(settings) => {
                let purpose = settings.user_purpose.unwrap_or_default().to_lowercase();
                match purpose.as_str() {
                    "room" | "equipment" | "shared" => "service",
                    _ => "human",
                }
            }
            Err(err) => {
                warn!(user_id = %user.id, %err, "error fetching mailboxSettings");
                "human"
            }
        }
    }

    fn user_resource(user: &GraphUser, account_type: &str) -> Resource {
        let display_name = user
            .display_name
            .clone()
            .or_else(|| user.user_principal_name.clone())
            .unwrap_or_else(|| user.id.clone());

        let mut resource = Resource::new(ResourceKind::User, &user.id, display_name)
            .with_profile_field("account_enabled", user.account_enabled)
            .with_profile_field("account_type", account_type);

        if let Some(email) = &user.email {
            resource = resource.with_profile_field("mail", email.clone());
        }
        if let Some(upn) = &user.user_principal_name {
            resource = resource.with_profile_field("user_principal_name", upn.clone());
        }
        if let Some(job_title) = &user.job_title {
            resource = resource.with_profile_field("job_title", job_title.clone());
        }
        if let Some(department) = &user.department {
            resource = resource.with_profile_field("department", department.clone());
        }
        if let Some(employee_id) = &user.employee_id {
            resource = resource.with_profile_field("employee_id", employee_id.clone());
        }
        if let Some(employee_type) = &user.employee_type {
            resource = resource.with_profile_field("employee_type", employee_type.clone());
        }
        if let Some(manager) = &user.manager {
            resource = resource.with_profile_field("manager_id", manager.id.clone());
            if let Some(email) = &manager.email {
                resource = resource.with_profile_field("manager_email", email.clone());
            }
        }
        resource
    }
}

#[async_trait]
impl ResourceSyncer for UsersBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::User
    }

    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let next_link = decode_list_token(cursor)?;
        let url = self
            .graph
            .query()
            .select(&USER_SELECT)
            .expand("manager($select=id,employeeId,mail,displayName)")
            .top(self.config.page_size)
            .build_with_pagination(&["users"], next_link.as_deref())?;

        let page = self.graph.get_list::<GraphUser>(&url).await?;

        let mut resources = Vec::with_capacity(page.value.len());
        for user in &page.value {
            let account_type = self.account_type(user).await;
            resources.push(Self::user_resource(user, account_type));
        }

        Ok(ResourcePage {
            resources,
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, _resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(Vec::new())
    }

    async fn grants(&self, _resource: &Resource, _cursor: &str) -> AzureResult<GrantsPage> {
        Ok(GrantsPage {
            grants: Vec::new(),
            next_cursor: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GraphManager;

    #[test]
    fn user_resource_maps_profile_fields() {
        let user = GraphUser {
            id: "u1".into(),
            display_name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            account_enabled: true,
            manager: Some(GraphManager {
                id: "m1".into(),
                email: Some("boss@example.com".into()),
                employee_id: None,
                display_name: None,
            }),
            ..GraphUser::default()
        };

        let resource = UsersBuilder::user_resource(&user, "human");
        assert_eq!(resource.kind, ResourceKind::User);
        assert_eq!(resource.display_name, "Ada");
        assert_eq!(resource.profile["mail"], "ada@example.com");
        assert_eq!(resource.profile["manager_id"], "m1");
        assert_eq!(resource.profile["account_type"], "human");
    }

    #[test]
    fn display_name_falls_back_to_upn_then_id() {
        let user = GraphUser {
            id: "u2".into(),
            user_principal_name: Some("u2@example.com".into()),
            ..GraphUser::default()
        };
        assert_eq!(UsersBuilder::user_resource(&user, "human").display_name, "u2@example.com");

        let bare = GraphUser {
            id: "u3".into(),
            ..GraphUser::default()
        };
        assert_eq!(UsersBuilder::user_resource(&bare, "human").display_name, "u3");
    }
}
