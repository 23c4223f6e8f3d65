use serde::Serialize;

// one persisted file, handed to the history once written
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub file_name: String,
    pub size: u64,
    pub timestamp: String,
    pub save_path: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub original_size: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

// response for the upload endpoint
#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    pub count: usize,
    pub files: Vec<UploadRecord>,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

// what the host shell sees about the listener
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    pub address: String,
    pub port: u16,
    pub url: String,
}
