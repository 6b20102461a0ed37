//! Backend HTTP API
//!
//! Every JSON endpoint answers with an envelope `{ code, msg, data }` (older
//! services send `errcode` instead of `code`). [`unwrap_envelope`] applies the
//! backend's rules; [`ApiClient`] wraps the endpoints and the streaming
//! completion call.

mod client;
mod types;

pub use client::ApiClient;
pub use types::{
    AuthInfo, AuthType, Conversation, ConversationList, CreatedConversation, Credentials,
    HistoryPage, LoginRequest, MessageExt, MessageItem, PageRequest,
};

use crate::error::{Error, Result};
use serde_json::Value;

/// Message for connection-level failures
pub const NETWORK_ERROR_MESSAGE: &str = "网络连接失败";

/// User-facing description of an HTTP status
#[must_use]
pub fn status_message(status: u16) -> String {
    match status {
        400 => "请求参数错误".to_string(),
        401 => "未授权，请重新登录".to_string(),
        403 => "拒绝访问".to_string(),
        404 => "请求资源不存在".to_string(),
        500 => "服务器内部错误".to_string(),
        other => format!("请求失败 ({other})"),
    }
}

/// Validate a response envelope and return its `data`
pub fn unwrap_envelope(mut body: Value) -> Result<Value> {
    let code = body
        .get("errcode")
        .and_then(Value::as_i64)
        .or_else(|| body.get("code").and_then(Value::as_i64));
    let msg = body.get("msg").and_then(Value::as_str).map(str::to_string);

    let (Some(code), Some(msg)) = (code, msg) else {
        return Err(Error::InvalidResponse(
            "响应数据格式错误，预期: {errcode/code: number, msg: string}".to_string(),
        ));
    };

    let mut data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    match code {
        0 | 200 => Ok(data),
        1 => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("new".to_string(), Value::Bool(true));
            }
            Ok(data)
        }
        401 | 1000 => Err(Error::Unauthorized(if msg.is_empty() {
            status_message(401)
        } else {
            msg
        })),
        code => Err(Error::Api {
            code,
            message: if msg.is_empty() {
                "请求失败".to_string()
            } else {
                msg
            },
        }),
    }
}
