//! REST-backed criterion and result stores
//!
//! Every endpoint answers with the envelope
//! `{ "success": bool, "message": string, "result": T, "errorCode": string }`.
//! Evaluation kinds live under `/evaluation`, curation under `/curation`.

use std::time::Duration;

use async_trait::async_trait;
use curio_common::{AnalysisResult, CriterionState, JobKind, ProjectCriterion};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::{CriterionStore, ResultStore};

const USER_AGENT: &str = concat!("curio-sync/", env!("CARGO_PKG_VERSION"));

/// Response envelope shared by all endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct StateUpdate<'a> {
    id: &'a str,
    state: CriterionState,
}

/// Authenticated client for the console REST API
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl ApiClient {
    /// `api_base_url` is the server root; requests go to `<root>/api/...`
    pub fn new(api_base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: format!("{}/api", api_base_url.trim_end_matches('/')),
            access_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, url = %url, "API request");
        let builder = self.http_client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        let response = self.request(reqwest::Method::GET, path).query(query).send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Option<T>> {
        let mut builder = self.request(reqwest::Method::POST, path).query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiResponse<IgnoredAny>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or(body);
            return Err(SyncError::Store {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> = response.json().await?;
        if !envelope.success {
            let code = envelope.error_code.unwrap_or_default();
            let message = envelope.message.unwrap_or_default();
            return Err(SyncError::Store {
                status: status.as_u16(),
                message: format!("{} {}", code, message).trim().to_string(),
            });
        }
        Ok(envelope.result)
    }
}

/// Endpoint paths of one job kind
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    family: &'static str,
    criteria: &'static str,
    results: &'static str,
    delete_results: &'static str,
}

impl Endpoints {
    fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::PassEval => Self {
                family: "/evaluation",
                criteria: "/evaluation/pass_eval_criterias",
                results: "/evaluation/pass_eval_results_by_projectId",
                delete_results: "/evaluation/delete_pass_eval_results_by_prjCrtId",
            },
            JobKind::ScoreEval => Self {
                family: "/evaluation",
                criteria: "/evaluation/score_eval_criterias",
                results: "/evaluation/score_eval_results_by_projectId",
                delete_results: "/evaluation/delete_score_eval_results_by_prjCrtId",
            },
            JobKind::Tagging => Self {
                family: "/evaluation",
                criteria: "/evaluation/tagging_criterias",
                results: "/evaluation/tagging_results_by_projectId",
                delete_results: "/evaluation/delete_tagging_results_by_prjCrtId",
            },
            JobKind::Curation => Self {
                family: "/curation",
                criteria: "/curation/criterias",
                results: "/curation/curation_results_by_projectId",
                delete_results: "/curation/delete_curation_results_by_prjCrtId",
            },
        }
    }

    fn update_state(&self) -> String {
        format!("{}/updateProjectCriteriaState", self.family)
    }

    fn delete_criterion(&self) -> String {
        format!("{}/delete_project_criteria", self.family)
    }

    fn save_criterion(&self) -> String {
        format!("{}/save_project_criteria", self.family)
    }
}

/// Criterion and result store for one job kind over the REST API
#[derive(Clone)]
pub struct HttpStore {
    api: ApiClient,
    kind: JobKind,
    endpoints: Endpoints,
}

impl HttpStore {
    pub fn new(api: ApiClient, kind: JobKind) -> Self {
        Self {
            api,
            kind,
            endpoints: Endpoints::for_kind(kind),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

#[async_trait]
impl CriterionStore for HttpStore {
    async fn criteria_by_project(&self, project_id: &str) -> Result<Vec<ProjectCriterion>> {
        let criteria: Option<Vec<ProjectCriterion>> = self
            .api
            .get(self.endpoints.criteria, &[("projectId", project_id)])
            .await?;
        Ok(criteria.unwrap_or_default())
    }

    async fn update_state(&self, criteria_id: &str, state: CriterionState) -> Result<()> {
        let body = StateUpdate { id: criteria_id, state };
        self.api
            .post::<IgnoredAny, _>(&self.endpoints.update_state(), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_criterion(&self, criteria_id: &str) -> Result<()> {
        self.api
            .post::<IgnoredAny, ()>(
                &self.endpoints.delete_criterion(),
                &[("projectCriteriaId", criteria_id)],
                None,
            )
            .await?;
        Ok(())
    }

    async fn save_criterion(&self, criterion: &ProjectCriterion) -> Result<ProjectCriterion> {
        let saved: Option<ProjectCriterion> = self
            .api
            .post(&self.endpoints.save_criterion(), &[], Some(criterion))
            .await?;
        saved.ok_or_else(|| SyncError::Store {
            status: 200,
            message: "save_project_criteria returned no criterion".to_string(),
        })
    }
}

#[async_trait]
impl ResultStore for HttpStore {
    async fn results_by_project(&self, project_id: &str) -> Result<Vec<AnalysisResult>> {
        let results: Option<Vec<AnalysisResult>> = self
            .api
            .get(self.endpoints.results, &[("projectId", project_id)])
            .await?;
        Ok(results.unwrap_or_default())
    }

    async fn delete_results_by_criterion(&self, criteria_id: &str) -> Result<()> {
        self.api
            .post::<IgnoredAny, ()>(
                self.endpoints.delete_results,
                &[("projectCriteriaId", criteria_id)],
                None,
            )
            .await?;
        Ok(())
    }
}
