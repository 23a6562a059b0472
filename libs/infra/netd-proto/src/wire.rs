// [libs/infra/netd-proto/src/wire.rs]
//! Line-delimited JSON request/response envelopes, each carrying a
//! correlation id so a client can match responses out of order on a
//! shared connection (spec §4.3/§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestBody {
    CreateNetwork { lab_id: String },
    DestroyNetwork { lab_id: String },
    ListNetworks,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: String,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkAllocation {
    pub lab_id: String,
    pub bridge_name: String,
    pub tap_name: String,
    pub guest_ip: String,
    pub host_ip: String,
    pub netmask: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseBody {
    NetworkCreated(NetworkAllocation),
    NetworkDestroyed,
    Networks(Vec<NetworkAllocation>),
    Pong,
    Error { message: String },
}
