// SPDX-License-Identifier: MIT OR Apache-2.0
//! Newline-delimited JSON codec for [`RpcRequest`]/[`RpcResponse`] frames.

use crate::{ProtocolError, RpcRequest, RpcResponse};

/// Encode a request as a single newline-terminated JSON line.
pub fn encode_request(req: &RpcRequest) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(req)?;
    line.push('\n');
    Ok(line)
}

/// Encode a response as a single newline-terminated JSON line.
pub fn encode_response(resp: &RpcResponse) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(resp)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line (without its trailing newline) as a response.
pub fn decode_response(line: &str) -> Result<RpcResponse, ProtocolError> {
    if line.trim().is_empty() {
        return Err(ProtocolError::Malformed("empty line".to_string()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Decode one line (without its trailing newline) as a request.
pub fn decode_request(line: &str) -> Result<RpcRequest, ProtocolError> {
    if line.trim().is_empty() {
        return Err(ProtocolError::Malformed("empty line".to_string()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Decode a batch of newline-delimited response lines, skipping blanks.
/// Each non-blank line produces either a decoded response or a
/// [`ProtocolError`]; malformed lines never abort the batch.
pub fn decode_response_batch(input: &str) -> Vec<Result<RpcResponse, ProtocolError>> {
    input
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| decode_response(l.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn request_round_trips_through_one_line() {
        let req = RpcRequest::new("parse_tree", serde_json::json!({"root": "/mnt/work"}));
        let line = encode_request(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.lines().count(), 1);
        let back = decode_request(line.trim_end()).unwrap();
        assert_eq!(back.method, "parse_tree");
        assert_eq!(back.id, req.id);
    }

    #[test]
    fn response_round_trips() {
        let resp = RpcResponse::ok(Uuid::new_v4(), serde_json::json!({"ok": true}));
        let line = encode_response(&resp).unwrap();
        let back = decode_response(line.trim_end()).unwrap();
        assert!(back.is_ok());
    }

    #[test]
    fn decode_batch_skips_blank_lines_and_reports_malformed() {
        let input = "\n{not json}\n";
        let results = decode_response_batch(input);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn decode_empty_line_is_malformed() {
        let err = decode_response("").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }
}
