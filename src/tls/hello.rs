//! ClientHello reader & SNI parser (component A).
//!
//! Reads exactly the bytes of one TLS record carrying a ClientHello and
//! extracts the `server_name` extension, with no TLS termination anywhere
//! in the path: the raw record bytes are handed back to the caller so
//! they can be replayed verbatim to whatever destination the router picks.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::{ProxyError, Result};

/// TLS record type byte for a Handshake record.
const RECORD_TYPE_HANDSHAKE: u8 = 0x16;
/// Handshake message type byte for ClientHello.
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
/// TLS server_name extension type.
const EXT_TYPE_SERVER_NAME: u16 = 0x0000;
/// server_name_list entry type for a DNS hostname.
const NAME_TYPE_HOST_NAME: u8 = 0x00;

pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_SNIFF_BYTES: usize = 8192;

/// Reads one TLS record's worth of bytes from `stream`, bounded by
/// `max_bytes` and `sniff_timeout`. The first byte must be `0x16`
/// (Handshake); anything else, or an oversize record, is an error.
/// EOF before the declared record length is reached is not itself an
/// error — the caller gets back whatever was read, which `parse_sni`
/// will then find "Malformed" or `NotTls` as appropriate.
pub async fn read_client_hello<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_bytes: usize,
    sniff_timeout: Duration,
) -> Result<Vec<u8>> {
    let read = timeout(sniff_timeout, read_record(stream, max_bytes))
        .await
        .map_err(|_| ProxyError::Protocol("timed out waiting for ClientHello".into()))??;
    Ok(read)
}

async fn read_record<R: AsyncRead + Unpin>(stream: &mut R, max_bytes: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; max_bytes];
    let mut total = 0usize;

    while total < 5 {
        let n = stream.read(&mut buf[total..]).await.map_err(ProxyError::Network)?;
        if n == 0 {
            buf.truncate(total);
            return Ok(buf);
        }
        total += n;
    }

    if buf[0] != RECORD_TYPE_HANDSHAKE {
        buf.truncate(total);
        return Ok(buf);
    }

    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let want = 5 + record_len;
    if want > max_bytes {
        return Err(ProxyError::Protocol(format!(
            "too big handshake: {} bytes exceeds max_sniff_bytes {}",
            want, max_bytes
        )));
    }

    while total < want {
        let n = stream.read(&mut buf[total..want]).await.map_err(ProxyError::Network)?;
        if n == 0 {
            break;
        }
        total += n;
    }

    buf.truncate(total);
    Ok(buf)
}

/// Walks a ClientHello record and returns the lowercased `server_name`,
/// or `""` for anything that doesn't carry one — not TLS, no SNI
/// extension, or a bounds violation while parsing. Deliberately
/// defensive: malformed ClientHello behaves the same as no SNI, and
/// falls through to whatever default rule exists.
pub fn parse_sni(data: &[u8]) -> String {
    parse_sni_inner(data).unwrap_or_default()
}

fn parse_sni_inner(data: &[u8]) -> Option<String> {
    if data.len() < 9 || data[0] != RECORD_TYPE_HANDSHAKE {
        return None;
    }

    let handshake = &data[5..];
    if handshake.is_empty() || handshake[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    if handshake.len() < 4 {
        return None;
    }

    let client_hello = &handshake[4..];
    // client_version(2) + random(32)
    if client_hello.len() < 34 {
        return None;
    }
    let mut pos = 34;

    let session_id_len = *client_hello.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_suites_len = u16::from_be_bytes([*client_hello.get(pos)?, *client_hello.get(pos + 1)?]) as usize;
    pos += 2 + cipher_suites_len;

    let compression_len = *client_hello.get(pos)? as usize;
    pos += 1 + compression_len;

    if pos + 2 > client_hello.len() {
        // No extensions present at all.
        return None;
    }
    let extensions_len = u16::from_be_bytes([client_hello[pos], client_hello[pos + 1]]) as usize;
    pos += 2;

    let extensions_end = (pos + extensions_len).min(client_hello.len());

    while pos + 4 <= extensions_end {
        let ext_type = u16::from_be_bytes([client_hello[pos], client_hello[pos + 1]]);
        let ext_len = u16::from_be_bytes([client_hello[pos + 2], client_hello[pos + 3]]) as usize;
        pos += 4;

        if pos + ext_len > client_hello.len() {
            return None;
        }

        if ext_type == EXT_TYPE_SERVER_NAME {
            return parse_server_name_extension(&client_hello[pos..pos + ext_len]);
        }

        pos += ext_len;
    }

    None
}

fn parse_server_name_extension(ext: &[u8]) -> Option<String> {
    if ext.len() < 2 {
        return None;
    }
    let list_len = u16::from_be_bytes([ext[0], ext[1]]) as usize;
    if ext.len() < 2 + list_len {
        return None;
    }

    let mut pos = 2;
    let list_end = 2 + list_len;
    while pos + 3 <= list_end {
        let name_type = ext[pos];
        let name_len = u16::from_be_bytes([ext[pos + 1], ext[pos + 2]]) as usize;
        pos += 3;

        if pos + name_len > ext.len() {
            return None;
        }

        if name_type == NAME_TYPE_HOST_NAME {
            let name = std::str::from_utf8(&ext[pos..pos + name_len]).ok()?;
            return Some(name.to_ascii_lowercase().trim_end_matches('.').to_string());
        }

        pos += name_len;
    }

    None
}
