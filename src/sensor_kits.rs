//! Published sensor kits. Keyed by numeric org id; needs `X-Org`.

use serde_json::Value;

use crate::client::{CbcClient, org_scoped_path};

const KITS_SERVICE: &str = "appservices/v5";

/// Lists the sensor kits published for `deployment_type`
/// (`ENDPOINT`, `WORKLOAD`, ...).
pub async fn published_sensor_kits(
    client: &CbcClient,
    org_id: &str,
    deployment_type: &str,
) -> crate::error::Result<Value> {
    let path = org_scoped_path(KITS_SERVICE, org_id, "kits/published");
    client
        .get_query(&path, &[("deploymentType", deployment_type)])
        .await
}
