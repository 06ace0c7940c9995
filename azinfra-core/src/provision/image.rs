//! Boot image pipeline: storage account, container, server side VHD copy, image registration.

use std::collections::BTreeMap;

use rand::Rng;
use snafu::{ResultExt, ensure};
use tracing::info;

use super::{Target, complete, required};
use crate::auth::SharedKeyCredential;
use crate::client::BlobTarget;
use crate::error::{
    CopyImageSnafu, CreateBlobContainerSnafu, CreateImageSnafu, CreateStorageAccountSnafu, Error,
    ListStorageKeysSnafu, NoStorageKeysSnafu, StorageAuthorizerSnafu, UntrustedImageSourceSnafu,
};
use crate::models::{
    Image, ImageOsDisk, ImageProperties, ImageStorageProfile, Sku, StorageAccountCreate,
};

/// Copies from anywhere else are rejected by the storage service with an opaque error.
pub const TRUSTED_IMAGE_PREFIX: &str = "https://rhcos.blob.core.windows.net";
pub const STORAGE_ACCOUNT_PREFIX: &str = "cluster";
pub const IMAGE_CONTAINER: &str = "vhd";
pub const IMAGE_BLOB: &str = "rhcos.x86_64.vhd";

const ACCOUNT_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const ACCOUNT_SUFFIX_LEN: usize = 5;

pub fn validate_image_source(url: &str) -> Result<(), Error> {
    ensure!(
        url.starts_with(TRUSTED_IMAGE_PREFIX),
        UntrustedImageSourceSnafu {
            url,
            prefix: TRUSTED_IMAGE_PREFIX,
        }
    );
    Ok(())
}

/// `cluster` plus five random characters. Collisions are not checked.
pub fn storage_account_name<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..ACCOUNT_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ACCOUNT_SUFFIX_ALPHABET.len());
            char::from(ACCOUNT_SUFFIX_ALPHABET[idx])
        })
        .collect();
    format!("{STORAGE_ACCOUNT_PREFIX}{suffix}")
}

pub fn storage_account_spec(location: &str) -> StorageAccountCreate {
    StorageAccountCreate {
        sku: Sku {
            name: Some("Premium_LRS".to_string()),
            tier: Some("Standard".to_string()),
        },
        kind: "StorageV2".to_string(),
        location: location.to_string(),
    }
}

/// Generalized Linux OS disk backed by `blob_uri`, Hyper-V generation 1.
pub fn image_spec(location: &str, blob_uri: &str) -> Image {
    Image {
        location: location.to_string(),
        properties: Some(ImageProperties {
            storage_profile: ImageStorageProfile {
                os_disk: ImageOsDisk {
                    os_type: "Linux".to_string(),
                    os_state: "Generalized".to_string(),
                    blob_uri: Some(blob_uri.to_string()),
                },
            },
            hyper_v_generation: Some("V1".to_string()),
            provisioning_state: None,
        }),
        ..Image::default()
    }
}

/// Runs the whole pipeline and returns the registered image's id.
pub async fn provision_image(target: &Target<'_>, source_url: &str) -> Result<String, Error> {
    // nothing remote happens for an untrusted source
    validate_image_source(source_url)?;

    let account = storage_account_name(&mut rand::rng());
    let created = complete(
        target.clients.storage.begin_create_storage_account(
            target.resource_group,
            &account,
            &storage_account_spec(target.location),
        ),
        target.cancel,
    )
    .await
    .context(CreateStorageAccountSnafu { name: &account })?;
    info!(
        name = %created.name.as_deref().unwrap_or(&account),
        "Successfully created storage account"
    );

    let container = target
        .clients
        .storage
        .create_blob_container(target.resource_group, &account, IMAGE_CONTAINER)
        .await
        .context(CreateBlobContainerSnafu {
            account: &account,
            name: IMAGE_CONTAINER,
        })?;
    info!(
        name = %container.name.as_deref().unwrap_or(IMAGE_CONTAINER),
        "Successfully created blob container"
    );

    let keys = target
        .clients
        .storage
        .list_keys(target.resource_group, &account)
        .await
        .context(ListStorageKeysSnafu { account: &account })?;
    let Some(key) = keys.keys.first().and_then(|k| k.value.as_deref()) else {
        return NoStorageKeysSnafu { account }.fail();
    };
    let credential = SharedKeyCredential::new(&account, key)
        .context(StorageAuthorizerSnafu { account: &account })?;

    let blob = BlobTarget {
        account: account.clone(),
        container: IMAGE_CONTAINER.to_string(),
        blob: IMAGE_BLOB.to_string(),
    };
    let metadata = BTreeMap::from([("source_uri".to_string(), source_url.to_string())]);
    info!(source = %source_url, "Uploading rhcos image");
    let copy = complete(
        target
            .clients
            .blob
            .begin_copy_from_url(&credential, &blob, source_url, &metadata),
        target.cancel,
    )
    .await
    .context(CopyImageSnafu { source_url })?;
    info!(url = %copy.url, "Successfully uploaded rhcos image");

    let blob_url = target.clients.blob.blob_url(&blob);
    let image = complete(
        target.clients.compute.begin_create_image(
            target.resource_group,
            IMAGE_BLOB,
            &image_spec(target.location, &blob_url),
        ),
        target.cancel,
    )
    .await
    .context(CreateImageSnafu { name: IMAGE_BLOB })?;
    let image_id = required(image.id.as_deref(), "image", IMAGE_BLOB, "id")?;
    info!(resource_id = %image_id, "Successfully created image");
    Ok(image_id)
}
