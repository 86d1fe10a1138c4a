// Project lookups and creation. Plain request/response calls on top of
// `ApiClient`, kept out of the scan pipeline.

use crate::api::{ApiClient, Payload};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Project as returned by `GET /api/project`. The service omits fields
/// freely, so everything has a default.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Project {
    pub project_name: String,
    pub owner: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub total_loc: Option<u64>,
    pub total_files: Option<u64>,
    pub open_issue: Option<u64>,
    pub closed_issue: Option<u64>,
    pub description: Option<String>,
    pub integrations: BTreeMap<String, Integration>,
    pub team: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

pub async fn get_project(client: &ApiClient, name: &str) -> Result<Project> {
    let path = format!("/api/project?key={}", urlencoding::encode(name));
    client.get(&path).await?.json()
}

/// Create an upload-type project. The response shape varies between
/// service versions, so it is returned untyped.
pub async fn create_project(client: &ApiClient, name: &str) -> Result<serde_json::Value> {
    let body = serde_json::json!({
        "project_name": name,
        "type": "upload",
        "branch": "",
    });
    let created = client.post("/api/project/add", Payload::Json(body)).await?.json()?;
    info!(project = name, "project.created");
    Ok(created)
}
