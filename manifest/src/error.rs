#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest json: {0}")]
    Json(#[from] serde_json::Error),
}
