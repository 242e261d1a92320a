//! MCP (Model Context Protocol) server for ltm.
//!
//! Exposes the memory operations as MCP tools over JSON-RPC 2.0 stdio.
//!
//! Protocol: both newline-delimited JSON and Content-Length framing are accepted.
//! Each reply uses the framing of the request it answers.

use crate::tools::{call_tool, find_tool, tool_descriptors, ToolContext};
use ltm_types::error::LtmResult;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

/// MCP protocol revision this server speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Largest accepted Content-Length body.
const MAX_MCP_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// How a message arrived, and how its reply is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Newline,
    ContentLength,
}

/// One message read off the wire. `body` is the parse result so malformed JSON can be
/// answered with a JSON-RPC parse error instead of closing the stream.
struct Incoming {
    framing: Framing,
    body: Result<Value, serde_json::Error>,
}

/// Run the MCP server over stdio until stdin closes.
pub fn run_mcp_server(ctx: &ToolContext) -> LtmResult<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = stdin.lock();
    let mut writer = stdout.lock();
    info!("MCP server listening on stdio");

    while let Some(incoming) = read_message(&mut reader)? {
        let response = match incoming.body {
            Ok(msg) => handle_message(ctx, &msg),
            Err(e) => {
                warn!(error = %e, "Discarding malformed JSON-RPC message");
                Some(jsonrpc_error(Value::Null, -32700, &format!("Parse error: {e}")))
            }
        };
        if let Some(resp) = response {
            write_message(&mut writer, &resp, incoming.framing)?;
        }
    }
    info!("stdin closed, MCP server exiting");
    Ok(())
}

/// Read the next JSON-RPC message. Returns `None` at end of input.
fn read_message(reader: &mut impl BufRead) -> io::Result<Option<Incoming>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !is_content_length(trimmed) {
            return Ok(Some(Incoming {
                framing: Framing::Newline,
                body: serde_json::from_str(trimmed),
            }));
        }
        break;
    }

    // Content-Length framed: headers until an empty line, then the body.
    let mut content_length = parse_content_length(line.trim());
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(None);
        }
        let trimmed = header.trim();
        if trimmed.is_empty() {
            break;
        }
        if is_content_length(trimmed) {
            content_length = parse_content_length(trimmed);
        }
    }

    if content_length > MAX_MCP_MESSAGE_SIZE {
        // Drain the oversized body to avoid stream desync
        let mut discard = [0u8; 4096];
        let mut remaining = content_length;
        while remaining > 0 {
            let to_read = remaining.min(discard.len());
            reader.read_exact(&mut discard[..to_read])?;
            remaining -= to_read;
        }
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("MCP message too large: {content_length} bytes (max {MAX_MCP_MESSAGE_SIZE})"),
        ));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    Ok(Some(Incoming {
        framing: Framing::ContentLength,
        body: serde_json::from_slice(&body),
    }))
}

fn is_content_length(header: &str) -> bool {
    header
        .get(..15)
        .is_some_and(|name| name.eq_ignore_ascii_case("content-length:"))
}

fn parse_content_length(header: &str) -> usize {
    header[15..].trim().parse().unwrap_or(0)
}

/// Write a JSON-RPC message using `framing`.
fn write_message(writer: &mut impl Write, msg: &Value, framing: Framing) -> io::Result<()> {
    let body = serde_json::to_string(msg).map_err(io::Error::other)?;
    match framing {
        Framing::Newline => writeln!(writer, "{body}")?,
        Framing::ContentLength => {
            write!(writer, "Content-Length: {}\r\n\r\n{}", body.len(), body)?
        }
    }
    writer.flush()
}

/// Handle a JSON-RPC message and return an optional response.
fn handle_message(ctx: &ToolContext, msg: &Value) -> Option<Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();
    debug!(method, "MCP request");

    match method {
        "initialize" => {
            let result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "ltm",
                    "version": env!("CARGO_PKG_VERSION")
                }
            });
            Some(jsonrpc_response(id?, result))
        }

        "notifications/initialized" => None, // Notification, no response

        "ping" => Some(jsonrpc_response(id?, json!({}))),

        "tools/list" => Some(jsonrpc_response(id?, json!({ "tools": tool_descriptors() }))),

        "tools/call" => {
            let params = &msg["params"];
            let tool_name = params["name"].as_str().unwrap_or("");
            if find_tool(tool_name).is_none() {
                return Some(jsonrpc_error(
                    id?,
                    -32602,
                    &format!("Unknown tool: {tool_name}"),
                ));
            }
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);

            match call_tool(ctx, tool_name, args) {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                    Some(jsonrpc_response(
                        id?,
                        json!({
                            "content": [{
                                "type": "text",
                                "text": text
                            }]
                        }),
                    ))
                }
                Err(e) => {
                    debug!(tool = tool_name, kind = e.kind(), error = %e, "Tool call failed");
                    let error = json!({ "error": e.kind(), "message": e.to_string() });
                    Some(jsonrpc_response(
                        id?,
                        json!({
                            "content": [{
                                "type": "text",
                                "text": error.to_string()
                            }],
                            "isError": true
                        }),
                    ))
                }
            }
        }

        _ => {
            // Unknown method
            id.map(|id| jsonrpc_error(id, -32601, &format!("Method not found: {method}")))
        }
    }
}

fn jsonrpc_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn jsonrpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    fn call(ctx: &ToolContext, id: i64, name: &str, arguments: Value) -> Value {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        });
        handle_message(ctx, &msg).unwrap()
    }

    fn text_payload(resp: &Value) -> Value {
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_handle_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {}
        });
        let resp = handle_message(&ctx, &msg).unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(resp["result"]["serverInfo"]["name"], "ltm");
    }

    #[test]
    fn test_handle_notifications_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let msg = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        assert!(handle_message(&ctx, &msg).is_none());
    }

    #[test]
    fn test_handle_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "unknown/method"
        });
        let resp = handle_message(&ctx, &msg).unwrap();
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[test]
    fn test_tools_list() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let msg = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" });
        let resp = handle_message(&ctx, &msg).unwrap();
        let tools = resp["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 12);
        assert!(tools.iter().any(|t| t["name"] == "get_related_tags"));
        assert!(tools.iter().all(|t| t["inputSchema"].is_object()));
    }

    #[test]
    fn test_tools_call_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let resp = call(
            &ctx,
            3,
            "store_memory",
            json!({ "title": "Tag overlap", "tags": ["x", "y"], "summary": "s", "content": "c" }),
        );
        assert!(resp["result"].get("isError").is_none());
        assert_eq!(text_payload(&resp)["id"], "tag-overlap");

        let resp = call(&ctx, 4, "query_memories", json!({ "tags": ["y"] }));
        let payload = text_payload(&resp);
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["memories"][0]["overlap"], 1);
    }

    #[test]
    fn test_tool_error_is_result_with_kind() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let resp = call(&ctx, 6, "get_memory", json!({ "id": "../etc/passwd" }));
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(text_payload(&resp)["error"], "invalid_identifier");

        let resp = call(&ctx, 7, "get_memory", json!({ "id": "missing" }));
        assert_eq!(text_payload(&resp)["error"], "not_found");
    }

    #[test]
    fn test_unknown_tool_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let resp = call(&ctx, 8, "drop_tables", json!({}));
        assert_eq!(resp["error"]["code"], -32602);
    }

    #[test]
    fn test_jsonrpc_response() {
        let resp = jsonrpc_response(json!(1), json!({"status": "ok"}));
        assert_eq!(resp["jsonrpc"], "2.0");
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["status"], "ok");
    }

    #[test]
    fn test_jsonrpc_error() {
        let resp = jsonrpc_error(json!(2), -32601, "Not found");
        assert_eq!(resp["jsonrpc"], "2.0");
        assert_eq!(resp["id"], 2);
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["error"]["message"], "Not found");
    }

    #[test]
    fn test_read_message_content_length() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut reader = io::BufReader::new(input.as_bytes());
        let incoming = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(incoming.framing, Framing::ContentLength);
        let msg = incoming.body.unwrap();
        assert_eq!(msg["method"], "initialize");
        assert_eq!(msg["id"], 1);
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_read_message_newline_delimited() {
        let input = "\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\nnot json\n";
        let mut reader = io::BufReader::new(input.as_bytes());
        let first = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(first.framing, Framing::Newline);
        assert_eq!(first.body.unwrap()["method"], "ping");
        let second = read_message(&mut reader).unwrap().unwrap();
        assert!(second.body.is_err());
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_write_message_matches_framing() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        let mut out = Vec::new();
        write_message(&mut out, &msg, Framing::Newline).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert!(!text.starts_with("Content-Length"));

        let mut out = Vec::new();
        write_message(&mut out, &msg, Framing::ContentLength).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Content-Length: "));
    }
}
