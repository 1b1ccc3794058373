use crate::bitbucket::WEBHOOK_PATH;

/// Maximum length of a webhook name accepted by the server, in UTF-16 code units.
const MAX_NAME_LENGTH: usize = 255;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("Orchestrator URL is missing")]
    MissingOrchestratorUrl,
    #[error("Webhook name is missing")]
    MissingName,
    #[error("Webhook name `{0}` is longer than {MAX_NAME_LENGTH} characters")]
    NameTooLong(String),
}

/// Describes the webhook that the orchestrator needs for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRegisterRequest {
    project_key: String,
    repository_slug: String,
    orchestrator_url: String,
    name: String,
    mirror: bool,
    trigger_on_push: bool,
    trigger_on_pr: bool,
}

impl WebhookRegisterRequest {
    pub fn builder(project_key: &str, repository_slug: &str) -> WebhookRegisterRequestBuilder {
        WebhookRegisterRequestBuilder {
            project_key: project_key.to_string(),
            repository_slug: repository_slug.to_string(),
            orchestrator_url: None,
            name: None,
            mirror: false,
            trigger_on_push: false,
            trigger_on_pr: false,
        }
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    pub fn repository_slug(&self) -> &str {
        &self.repository_slug
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mirror(&self) -> bool {
        self.mirror
    }

    pub fn trigger_on_push(&self) -> bool {
        self.trigger_on_push
    }

    pub fn trigger_on_pr(&self) -> bool {
        self.trigger_on_pr
    }

    /// URL to which the server delivers the events.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/{WEBHOOK_PATH}/trigger",
            self.orchestrator_url.trim_end_matches('/')
        )
    }
}

pub struct WebhookRegisterRequestBuilder {
    project_key: String,
    repository_slug: String,
    orchestrator_url: Option<String>,
    name: Option<String>,
    mirror: bool,
    trigger_on_push: bool,
    trigger_on_pr: bool,
}

impl WebhookRegisterRequestBuilder {
    pub fn orchestrator_url(mut self, url: &str) -> Self {
        self.orchestrator_url = Some(url.to_string());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn trigger_on_push(mut self, trigger: bool) -> Self {
        self.trigger_on_push = trigger;
        self
    }

    pub fn trigger_on_pr(mut self, trigger: bool) -> Self {
        self.trigger_on_pr = trigger;
        self
    }

    pub fn build(self) -> Result<WebhookRegisterRequest, InvalidRequest> {
        let orchestrator_url = self
            .orchestrator_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(InvalidRequest::MissingOrchestratorUrl)?;
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or(InvalidRequest::MissingName)?;
        if name.encode_utf16().count() > MAX_NAME_LENGTH {
            return Err(InvalidRequest::NameTooLong(name));
        }

        Ok(WebhookRegisterRequest {
            project_key: self.project_key,
            repository_slug: self.repository_slug,
            orchestrator_url,
            name,
            mirror: self.mirror,
            trigger_on_push: self.trigger_on_push,
            trigger_on_pr: self.trigger_on_pr,
        })
    }
}
