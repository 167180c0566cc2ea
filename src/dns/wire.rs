//! Shared DNS wire-format helpers built on `hickory-proto`.
//!
//! Only message construction/parsing is used here, not the rest of the
//! `hickory-resolver` stack — the upstream transports are plain
//! `Resolver` trait implementations, not a virtual connection, so there
//! is no need for the heavier resolver machinery.

use std::net::Ipv4Addr;
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};

use crate::error::{ProxyError, Result};

/// Build a wire-format DNS query for one `A` question, `RD=1`.
pub fn build_a_query(name: &str, id: u16) -> Result<Vec<u8>> {
    let qname = Name::from_str(name)
        .map_err(|e| ProxyError::Resolution(format!("invalid query name '{}': {}", name, e)))?;

    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(qname, RecordType::A));

    message
        .to_bytes()
        .map_err(|e| ProxyError::Resolution(format!("failed to encode DNS query: {}", e)))
}

/// Parse a wire-format DNS answer and return every `A` record found.
pub fn parse_a_answers(bytes: &[u8]) -> Result<Vec<Ipv4Addr>> {
    let message = Message::from_bytes(bytes)
        .map_err(|e| ProxyError::Resolution(format!("failed to decode DNS answer: {}", e)))?;

    if message.response_code() != ResponseCode::NoError {
        return Err(ProxyError::Resolution(format!(
            "upstream returned {:?}",
            message.response_code()
        )));
    }

    Ok(message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(addr)) => Some(Ipv4Addr::from(*addr)),
            _ => None,
        })
        .collect())
}

/// Build a synthetic wire-format answer carrying `addrs` for `qname`,
/// echoing `id`, used by the DNS listener when answering from the static
/// overlay or relaying an upstream result under a fixed TTL.
pub fn build_a_response(qname: &str, id: u16, addrs: &[Ipv4Addr], ttl: u32) -> Result<Vec<u8>> {
    let name = Name::from_str(qname)
        .map_err(|e| ProxyError::Resolution(format!("invalid response name '{}': {}", qname, e)))?;

    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Response);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.set_recursion_available(true);
    message.set_response_code(ResponseCode::NoError);
    message.add_query(Query::query(name.clone(), RecordType::A));

    for addr in addrs {
        message.add_answer(Record::from_rdata(name.clone(), ttl, RData::A(A(*addr))));
    }

    message
        .to_bytes()
        .map_err(|e| ProxyError::Resolution(format!("failed to encode DNS response: {}", e)))
}

/// Build a `NOERROR` answer with no records, echoing `qname`/`id` under
/// `qtype`: the answer for an `AAAA` query on a resolver that is
/// IPv4-only by design, rather than `NXDOMAIN` (the name does exist, it
/// just has no `AAAA` record here).
pub fn build_empty_response(qname: &str, id: u16, qtype: RecordType) -> Result<Vec<u8>> {
    let name = Name::from_str(qname)
        .map_err(|e| ProxyError::Resolution(format!("invalid response name '{}': {}", qname, e)))?;

    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Response);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.set_recursion_available(true);
    message.set_response_code(ResponseCode::NoError);
    message.add_query(Query::query(name, qtype));

    message
        .to_bytes()
        .map_err(|e| ProxyError::Resolution(format!("failed to encode DNS response: {}", e)))
}

/// Build an error response (e.g. `NXDOMAIN`/`SERVFAIL`/`FORMERR`) echoing
/// the original query id.
pub fn build_error_response(id: u16, code: ResponseCode) -> Vec<u8> {
    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Response);
    message.set_op_code(OpCode::Query);
    message.set_response_code(code);
    // Best-effort: a malformed query may not even decode enough to build
    // a faithful echo; an empty-question response is still a valid reply.
    message.to_bytes().unwrap_or_default()
}

/// Extract the query id, QNAME, and record type from a raw wire-format
/// query, without fully validating it. Used by the DNS listener to route
/// (and to special-case `AAAA`) before resolving.
pub fn peek_query_name(bytes: &[u8]) -> Result<(u16, String, RecordType)> {
    let message = Message::from_bytes(bytes)
        .map_err(|e| ProxyError::Protocol(format!("malformed DNS query: {}", e)))?;
    let id = message.id();
    let query = message
        .queries()
        .first()
        .ok_or_else(|| ProxyError::Protocol("DNS query has no question".to_string()))?;
    Ok((id, query.name().to_string(), query.query_type()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_round_trip_carries_name() {
        let bytes = build_a_query("example.com.", 0x1234).unwrap();
        let (id, name, qtype) = peek_query_name(&bytes).unwrap();
        assert_eq!(id, 0x1234);
        assert_eq!(name.trim_end_matches('.'), "example.com");
        assert_eq!(qtype, RecordType::A);
    }

    #[test]
    fn empty_response_carries_no_answers() {
        let bytes = build_empty_response("example.com.", 7, RecordType::AAAA).unwrap();
        let answers = parse_a_answers(&bytes).unwrap();
        assert!(answers.is_empty());
        let (id, _, qtype) = peek_query_name(&bytes).unwrap();
        assert_eq!(id, 7);
        assert_eq!(qtype, RecordType::AAAA);
    }

    #[test]
    fn response_round_trip_carries_address() {
        let addr = Ipv4Addr::new(93, 184, 216, 34);
        let bytes = build_a_response("example.com.", 7, &[addr], 300).unwrap();
        let answers = parse_a_answers(&bytes).unwrap();
        assert_eq!(answers, vec![addr]);
    }
}
