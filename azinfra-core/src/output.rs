//! The record handed to cluster creation once every resource exists.

use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::{error, info};

use crate::error::{Error, SerializeOutputSnafu, WriteOutputSnafu};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraOutput {
    #[serde(rename = "baseDomain")]
    pub base_domain: String,
    #[serde(rename = "publicZoneID")]
    pub public_zone_id: String,
    #[serde(rename = "privateZoneID")]
    pub private_zone_id: String,
    #[serde(rename = "region")]
    pub location: String,
    #[serde(rename = "resourceGroupName")]
    pub resource_group_name: String,
    #[serde(rename = "vnetID")]
    pub vnet_id: String,
    #[serde(rename = "vnetName")]
    pub vnet_name: String,
    #[serde(rename = "subnetID")]
    pub subnet_id: String,
    #[serde(rename = "bootImageID")]
    pub boot_image_id: String,
    #[serde(rename = "infraID")]
    pub infra_id: String,
    #[serde(rename = "machineIdentityID")]
    pub machine_identity_id: String,
    #[serde(rename = "securityGroupID")]
    pub security_group_id: String,
}

impl InfraOutput {
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).context(SerializeOutputSnafu)
    }
}

/// Writes `output` as YAML. If the write fails the serialized record is logged so the
/// identifiers are not lost.
pub fn write_output_file(output: &InfraOutput, path: &Path) -> Result<(), Error> {
    let serialized = output.to_yaml()?;
    if let Err(source) = std::fs::write(path, &serialized) {
        error!(
            output_file = %path.display(),
            data = %serialized,
            error = %source,
            "Writing output file failed"
        );
        return Err(source).context(WriteOutputSnafu { path });
    }
    info!(output_file = %path.display(), "Wrote infrastructure output");
    Ok(())
}
