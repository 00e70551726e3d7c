//! Control-plane command builders and response readers.
//!
//! Every command is a single JSON object carrying `function`, a
//! correlation `ID`, and (after the handshake) the session `token`. The
//! matching response echoes the `ID` and carries `statusCode`, with 0
//! meaning success and `message` describing any failure.

use crate::error::{Error, Result};
use crate::meta::StreamMeta;
use crate::state;
use serde_json::{json, Value};
use std::collections::HashSet;

pub fn auth_password(id: u32, username: &str, password: &str) -> Value {
    json!({
        "function": "auth",
        "ID": id,
        "username": username,
        "password": password,
    })
}

pub fn auth_token(id: u32, token: &str) -> Value {
    json!({
        "function": "auth",
        "ID": id,
        "token": token,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn sender(
    id: u32,
    token: &str,
    client_ip: &str,
    workspace: &str,
    stream_type: &str,
    meta: &str,
    echo: bool,
    alert: bool,
    proto: &str,
) -> Value {
    json!({
        "function": "sender",
        "ID": id,
        "workspace": workspace,
        "IP": client_ip,
        "port": 0,
        "type": stream_type,
        "meta": meta,
        "echo": echo,
        "alert": alert,
        "token": token,
        "proto": proto,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn receiver(
    id: u32,
    token: &str,
    client_ip: &str,
    workspace: &str,
    types: &[String],
    meta: &str,
    echo: bool,
    alert: bool,
    proto: &str,
) -> Value {
    json!({
        "function": "receiver",
        "ID": id,
        "workspace": workspace,
        "IP": client_ip,
        "port": 0,
        "type": types,
        "meta": meta,
        "echo": echo,
        "alert": alert,
        "token": token,
        "proto": proto,
    })
}

/// Stream ids ride as decimal strings here; the server expects that
/// shape for subscription management.
pub fn subscribe(id: u32, token: &str, receiver_id: i32, sender_id: i32) -> Value {
    json!({
        "function": "subscribe",
        "ID": id,
        "receiverID": receiver_id.to_string(),
        "streamIDs": [sender_id.to_string()],
        "token": token,
    })
}

pub fn unsubscribe(id: u32, token: &str, receiver_id: i32, sender_id: i32) -> Value {
    json!({
        "function": "unsubscribe",
        "ID": id,
        "receiverID": receiver_id.to_string(),
        "streamIDs": [sender_id.to_string()],
        "token": token,
    })
}

pub fn disconnect(id: u32, token: &str, stream_id: i32) -> Value {
    json!({
        "function": "disconnect",
        "ID": id,
        "workWorkspaces": [],
        "types": [],
        "streamIDs": [stream_id],
        "token": token,
    })
}

pub fn list_streams(id: u32, token: &str, workspaces: &[String], types: &[String]) -> Value {
    json!({
        "function": "listStreams",
        "ID": id,
        "workspaces": workspaces,
        "types": types,
        "token": token,
    })
}

pub fn stream_info(id: u32, token: &str, stream_id: i32) -> Value {
    json!({
        "function": "streamInfo",
        "ID": id,
        "streamID": stream_id,
        "token": token,
    })
}

pub fn list_workspaces(id: u32, token: &str) -> Value {
    json!({
        "function": "listWorkspaces",
        "ID": id,
        "token": token,
    })
}

pub fn add_workspace(id: u32, token: &str, workspace: &str) -> Value {
    json!({
        "function": "addWorkspace",
        "ID": id,
        "workspace": workspace,
        "token": token,
    })
}

pub fn rm_workspace(id: u32, token: &str, workspace: &str) -> Value {
    json!({
        "function": "rmWorkspace",
        "ID": id,
        "workspace": workspace,
        "token": token,
    })
}

pub fn list_functions(id: u32, token: &str) -> Value {
    json!({
        "function": "listFunctions",
        "ID": id,
        "token": token,
    })
}

pub fn describe_function(id: u32, token: &str, name: &str) -> Value {
    json!({
        "function": "describeFunction",
        "ID": id,
        "functionName": name,
        "token": token,
    })
}

/// Checks the response envelope. An empty object means the control
/// channel shut down before the response arrived.
pub fn check_status(response: &Value) -> Result<()> {
    let object = response
        .as_object()
        .ok_or_else(|| Error::Comm("response is not a JSON object".into()))?;
    if object.is_empty() {
        return Err(Error::Comm("no response from server".into()));
    }
    match response.get("statusCode").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        Some(_) => {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error");
            Err(Error::Comm(message.to_string()))
        }
        None => Err(Error::Comm("response missing statusCode".into())),
    }
}

pub fn str_field(response: &Value, field: &str) -> Result<String> {
    response
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Comm(format!("response missing field: {}", field)))
}

pub fn int_field(response: &Value, field: &str) -> Result<i64> {
    response
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Comm(format!("response missing field: {}", field)))
}

/// Reads an array of strings such as `workspaceList` or `functionList`.
pub fn str_list_field(response: &Value, field: &str) -> Result<Vec<String>> {
    let items = response
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Comm(format!("response missing field: {}", field)))?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Reads `streamID` out of each element of a stream-list array.
pub fn stream_id_list(response: &Value, field: &str) -> Result<Vec<i32>> {
    let items = response
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Comm(format!("response missing field: {}", field)))?;
    Ok(items
        .iter()
        .filter_map(|item| item.get("streamID").and_then(Value::as_i64))
        .map(|id| id as i32)
        .collect())
}

/// Parses a `streamInfo` response body (the object under `info`) into a
/// metadata record. The `type` field may be a single string or an array.
pub fn parse_stream_info(response: &Value) -> Result<StreamMeta> {
    let info = response
        .get("info")
        .ok_or_else(|| Error::Comm("response missing field: info".into()))?;
    let proto = info
        .get("proto")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let direction = info
        .get("direction")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let types = match info.get("type") {
        Some(Value::String(one)) => vec![one.clone()],
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    Ok(StreamMeta {
        stream_id: int_field(info, "streamID")? as i32,
        state: state::from_proto(proto, direction == "source"),
        mtu: int_field(info, "MTU")? as i32,
        owner: info
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        workspace: info
            .get("workspace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        meta: info
            .get("meta")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        types,
        sources: HashSet::new(),
    })
}

/// Details from a `describeFunction` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub email: String,
    pub doc_href: String,
}

pub fn parse_function_info(response: &Value) -> Result<FunctionInfo> {
    let description = response
        .get("description")
        .ok_or_else(|| Error::Comm("response missing field: description".into()))?;
    let field = |name: &str| {
        description
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Ok(FunctionInfo {
        name: field("name"),
        description: field("description"),
        version: field("version"),
        author: field("author"),
        email: field("email"),
        doc_href: field("doc_href"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_command_shape() {
        let cmd = auth_password(7, "user", "pass");
        assert_eq!(cmd["function"], "auth");
        assert_eq!(cmd["ID"], 7);
        assert_eq!(cmd["username"], "user");
        let cmd = auth_token(8, "tok");
        assert_eq!(cmd["token"], "tok");
        assert!(cmd.get("username").is_none());
    }

    #[test]
    fn subscribe_carries_ids_as_strings() {
        let cmd = subscribe(3, "tok", 15, 42);
        assert_eq!(cmd["receiverID"], "15");
        assert_eq!(cmd["streamIDs"][0], "42");
    }

    #[test]
    fn disconnect_carries_ids_as_numbers() {
        let cmd = disconnect(3, "tok", 42);
        assert_eq!(cmd["streamIDs"][0], 42);
        assert!(cmd["workWorkspaces"].as_array().unwrap().is_empty());
    }

    #[test]
    fn status_check_paths() {
        assert!(check_status(&json!({"statusCode": 0})).is_ok());
        let err = check_status(&json!({"statusCode": 1, "message": "bad workspace"}));
        assert!(matches!(err, Err(Error::Comm(m)) if m == "bad workspace"));
        assert!(check_status(&json!({})).is_err());
        assert!(check_status(&Value::Null).is_err());
    }

    #[test]
    fn stream_info_parses_single_and_multi_type() {
        let single = json!({"info": {
            "streamID": 9, "proto": "udp", "direction": "source", "MTU": 1400,
            "user": "u", "workspace": "w", "meta": "m", "type": "audio",
        }});
        let meta = parse_stream_info(&single).unwrap();
        assert_eq!(meta.stream_id, 9);
        assert_eq!(meta.state, state::SEND_UDP);
        assert_eq!(meta.types, vec!["audio"]);

        let multi = json!({"info": {
            "streamID": 10, "proto": "tcp", "direction": "target", "MTU": 0,
            "type": ["a", "b"],
        }});
        let meta = parse_stream_info(&multi).unwrap();
        assert_eq!(meta.state, state::RECV_TCP);
        assert_eq!(meta.types, vec!["a", "b"]);
        assert_eq!(meta.owner, "");
    }

    #[test]
    fn stream_id_list_reads_sender_list() {
        let response = json!({"senderList": [
            {"streamID": 1}, {"streamID": 2}, {"streamID": 3},
        ]});
        assert_eq!(stream_id_list(&response, "senderList").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn function_info_tolerates_missing_fields() {
        let response = json!({"description": {"name": "auth", "version": "1"}});
        let info = parse_function_info(&response).unwrap();
        assert_eq!(info.name, "auth");
        assert_eq!(info.version, "1");
        assert_eq!(info.author, "");
    }
}
