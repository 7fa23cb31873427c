use serde::{Deserialize, Serialize};

/// Camera metadata returned by the `info` endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfoResponse {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub support_url: String,
    pub api_level: Vec<u32>,
    pub endpoints: Endpoints,
    pub gps: bool,
    pub gyro: bool,
    pub uptime: u64,
    pub api: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    pub http_port: u16,
    pub http_updates_port: u16,
}
