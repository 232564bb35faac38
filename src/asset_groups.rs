//! Asset groups (`asset_groups/v1`).
//!
//! Groups are dynamic: membership is defined by a device query. Creating
//! a group from a list of hostnames means OR-ing one `name.equals` clause
//! per host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::client::CbcClient;
use crate::error::CbcError;

const ASSET_GROUP_SERVICE: &str = "asset_groups/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct AssetGroupList {
    #[serde(default)]
    pub results: Vec<AssetGroup>,
    #[serde(default)]
    pub num_found: u64,
}

/// POST body for a new group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAssetGroup {
    pub name: String,
    pub description: String,
    pub member_type: String,
    pub query: String,
}

impl NewAssetGroup {
    /// A device group whose description is its name.
    pub fn devices(name: &str, query: String) -> Self {
        NewAssetGroup {
            name: name.to_string(),
            description: name.to_string(),
            member_type: "DEVICE".to_string(),
            query,
        }
    }
}

/// Builds `name.equals: "a" OR name.equals: "b"` from one hostname per
/// line. Surrounding whitespace is trimmed and blank lines are skipped.
///
/// # Errors
///
/// `CbcError::Config` if no hostnames remain.
pub fn hostname_query(hostnames: &str) -> crate::error::Result<String> {
    let clauses: Vec<String> = hostnames
        .lines()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| format!("name.equals: \"{}\"", h.replace('"', "\\\"")))
        .collect();
    if clauses.is_empty() {
        return Err(CbcError::Config("hostname list is empty".to_string()));
    }
    Ok(clauses.join(" OR "))
}

pub async fn list_asset_groups(client: &CbcClient) -> crate::error::Result<AssetGroupList> {
    let path = client.org_path(ASSET_GROUP_SERVICE, "groups");
    let list: AssetGroupList = client.get(&path).await?;
    info!(num_found = list.num_found, "asset groups listed");
    Ok(list)
}

pub async fn create_asset_group(
    client: &CbcClient,
    group: &NewAssetGroup,
) -> crate::error::Result<AssetGroup> {
    let path = client.org_path(ASSET_GROUP_SERVICE, "groups");
    let created: AssetGroup = client.post(&path, group).await?;
    info!(id = %created.id, name = %created.name, "asset group created");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_query_joins_with_or() {
        let q = hostname_query("host-a\nhost-b\nhost-c").unwrap();
        assert_eq!(
            q,
            r#"name.equals: "host-a" OR name.equals: "host-b" OR name.equals: "host-c""#
        );
    }

    #[test]
    fn hostname_query_skips_blank_lines_and_trailing_newline() {
        let q = hostname_query("  host-a \r\n\n\nhost-b\n").unwrap();
        assert_eq!(q, r#"name.equals: "host-a" OR name.equals: "host-b""#);
    }

    #[test]
    fn hostname_query_single_host() {
        assert_eq!(hostname_query("solo").unwrap(), r#"name.equals: "solo""#);
    }

    #[test]
    fn hostname_query_rejects_empty_input() {
        assert!(matches!(hostname_query("\n  \n"), Err(CbcError::Config(_))));
    }

    #[test]
    fn new_group_payload_shape() {
        let body = serde_json::to_value(NewAssetGroup::devices("Finance", "q".to_string())).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "Finance",
                "description": "Finance",
                "member_type": "DEVICE",
                "query": "q"
            })
        );
    }
}
