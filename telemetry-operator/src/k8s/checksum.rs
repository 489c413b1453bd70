//! Content fingerprint of the collector configuration.
//!
//! The fingerprint is stamped onto the pod template of the collector Deployment. Pods only read
//! their configuration & credentials on start, so any change to either has to change the pod
//! template in order to trigger a rollout.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use sha2::{Digest, Sha256};

/// Calculate the hex encoded SHA-256 fingerprint of the data of the given objects.
///
/// Objects are hashed ordered by name and data entries ordered by key, so the fingerprint only
/// depends on content. Every section of an object is prefixed by a tag, the object name and its
/// entry count, and every key & value is framed by its length. Moving bytes or entries between
/// objects, sections or adjacent entries therefore changes the fingerprint.
pub fn calculate(config_maps: &[&ConfigMap], secrets: &[&Secret]) -> String {
    let mut hasher = Sha256::new();

    let mut config_maps = config_maps.to_vec();
    config_maps.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    for config_map in config_maps {
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        let data: Vec<(&str, &[u8])> = config_map.data.iter().flatten().map(|(key, val)| (key.as_str(), val.as_bytes())).collect();
        update_section(&mut hasher, b"configmap.data", name, &data);
        let binary_data: Vec<(&str, &[u8])> =
            config_map.binary_data.iter().flatten().map(|(key, val)| (key.as_str(), val.0.as_slice())).collect();
        update_section(&mut hasher, b"configmap.binaryData", name, &binary_data);
    }

    let mut secrets = secrets.to_vec();
    secrets.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    for secret in secrets {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let data: Vec<(&str, &[u8])> = secret.data.iter().flatten().map(|(key, val)| (key.as_str(), val.0.as_slice())).collect();
        update_section(&mut hasher, b"secret.data", name, &data);
    }

    hex::encode(hasher.finalize())
}

/// Hash a tagged section of an object. Entries are expected in key order.
fn update_section(hasher: &mut Sha256, tag: &[u8], name: &str, entries: &[(&str, &[u8])]) {
    update_framed(hasher, tag);
    update_framed(hasher, name.as_bytes());
    hasher.update((entries.len() as u64).to_be_bytes());
    for (key, val) in entries.iter() {
        update_framed(hasher, key.as_bytes());
        update_framed(hasher, val);
    }
}

fn update_framed(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(data);
}
