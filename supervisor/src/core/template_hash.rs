use crate::core::cluster::WorkloadTemplate;
use crate::core::error::SupervisorError;

fn hex_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Change-detection hash of a workload template.
///
/// Digests of the structural template, the serialized resources and, when present and
/// non-empty, the additional config are concatenated in that order and hashed again.
/// Equal content gives an equal hash; nothing is normalized.
pub fn composite_hash(template: &WorkloadTemplate) -> Result<String, SupervisorError> {
    let structural = serde_json::to_vec(&(&template.image, &template.env))?;
    let resources = serde_json::to_string(&template.resources)?;

    let mut digests = hex_digest(&structural);
    digests.push_str(&hex_digest(resources.as_bytes()));

    if let Some(extra) = template.additional_config.as_ref().filter(|c| !c.is_empty()) {
        digests.push_str(&hex_digest(&serde_json::to_vec(extra)?));
    }

    Ok(hex_digest(digests.as_bytes()))
}
