//! PostgreSQL frontend/backend protocol v3 message codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PgSyncError, ServerError};

pub const PROTOCOL_VERSION: i32 = 196608;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Descriptor for one column of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_mod: i32,
    pub format: i16,
}

/// A `LISTEN`-style server push.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

#[derive(Debug)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl(Vec<String>),
    Other(i32),
}

#[derive(Debug)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    BackendKeyData { process_id: i32, secret_key: i32 },
    ParameterStatus { name: String, value: String },
    ReadyForQuery { status: u8 },
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<String>>),
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ErrorResponse(ServerError),
    NoticeResponse(ServerError),
    NotificationResponse(Notification),
    ParameterDescription(Vec<u32>),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    Unknown { tag: u8 },
}

/// Parse one backend message from its tag and payload.
pub fn parse_backend_message(tag: u8, payload: Bytes) -> Result<BackendMessage, PgSyncError> {
    let mut buf = payload;
    let message = match tag {
        b'R' => {
            let code = buf.get_i32();
            let auth = match code {
                0 => AuthRequest::Ok,
                3 => AuthRequest::CleartextPassword,
                5 => {
                    let mut salt = [0u8; 4];
                    buf.copy_to_slice(&mut salt);
                    AuthRequest::Md5Password { salt }
                }
                10 => {
                    let mut mechanisms = Vec::new();
                    while buf.has_remaining() && buf.chunk()[0] != 0 {
                        mechanisms.push(read_cstr(&mut buf)?);
                    }
                    AuthRequest::Sasl(mechanisms)
                }
                other => AuthRequest::Other(other),
            };
            BackendMessage::Authentication(auth)
        }
        b'K' => BackendMessage::BackendKeyData {
            process_id: buf.get_i32(),
            secret_key: buf.get_i32(),
        },
        b'S' => BackendMessage::ParameterStatus {
            name: read_cstr(&mut buf)?,
            value: read_cstr(&mut buf)?,
        },
        b'Z' => BackendMessage::ReadyForQuery {
            status: buf.get_u8(),
        },
        b'T' => {
            let count = buf.get_i16();
            let mut fields = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                fields.push(FieldDescription {
                    name: read_cstr(&mut buf)?,
                    table_oid: buf.get_u32(),
                    column_attr: buf.get_i16(),
                    type_oid: buf.get_u32(),
                    type_len: buf.get_i16(),
                    type_mod: buf.get_i32(),
                    format: buf.get_i16(),
                });
            }
            BackendMessage::RowDescription(fields)
        }
        b'D' => {
            let count = buf.get_i16();
            let mut columns = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let len = buf.get_i32();
                if len < 0 {
                    columns.push(None);
                } else {
                    let raw = buf.copy_to_bytes(len as usize);
                    let text = String::from_utf8(raw.to_vec()).map_err(|_| {
                        PgSyncError::Wire("Non-UTF8 text in DataRow".to_string())
                    })?;
                    columns.push(Some(text));
                }
            }
            BackendMessage::DataRow(columns)
        }
        b'C' => BackendMessage::CommandComplete {
            tag: read_cstr(&mut buf)?,
        },
        b'I' => BackendMessage::EmptyQueryResponse,
        b'E' => BackendMessage::ErrorResponse(read_error_fields(&mut buf)?),
        b'N' => BackendMessage::NoticeResponse(read_error_fields(&mut buf)?),
        b'A' => BackendMessage::NotificationResponse(Notification {
            process_id: buf.get_i32(),
            channel: read_cstr(&mut buf)?,
            payload: read_cstr(&mut buf)?,
        }),
        b't' => {
            let count = buf.get_i16();
            let mut oids = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                oids.push(buf.get_u32());
            }
            BackendMessage::ParameterDescription(oids)
        }
        b'1' => BackendMessage::ParseComplete,
        b'2' => BackendMessage::BindComplete,
        b'3' => BackendMessage::CloseComplete,
        b'n' => BackendMessage::NoData,
        b's' => BackendMessage::PortalSuspended,
        other => BackendMessage::Unknown { tag: other },
    };
    Ok(message)
}

fn read_cstr(buf: &mut Bytes) -> Result<String, PgSyncError> {
    let chunk = buf.chunk();
    let end = chunk
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| PgSyncError::Wire("Unterminated string in message".to_string()))?;
    let text = String::from_utf8(chunk[..end].to_vec())
        .map_err(|_| PgSyncError::Wire("Non-UTF8 string in message".to_string()))?;
    buf.advance(end + 1);
    Ok(text)
}

fn read_error_fields(buf: &mut Bytes) -> Result<ServerError, PgSyncError> {
    let mut error = ServerError::default();
    while buf.has_remaining() {
        let code = buf.get_u8();
        if code == 0 {
            break;
        }
        let value = read_cstr(buf)?;
        match code {
            b'S' => error.severity = value,
            b'C' => error.sqlstate = value,
            b'M' => error.message = value,
            b'D' => error.detail = Some(value),
            b'H' => error.hint = Some(value),
            b'P' => error.position = value.parse().ok(),
            _ => {}
        }
    }
    Ok(error)
}

fn put_cstr(out: &mut BytesMut, text: &str) {
    out.put_slice(text.as_bytes());
    out.put_u8(0);
}

/// Frame a tagged message: tag byte, length, payload.
fn framed(tag: u8, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 5);
    out.put_u8(tag);
    out.put_i32(payload.len() as i32 + 4);
    out.put_slice(payload);
    out
}

pub fn startup_message(user: &str, database: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_i32(PROTOCOL_VERSION);
    put_cstr(&mut payload, "user");
    put_cstr(&mut payload, user);
    put_cstr(&mut payload, "database");
    put_cstr(&mut payload, database);
    put_cstr(&mut payload, "client_encoding");
    put_cstr(&mut payload, "UTF8");
    payload.put_u8(0);
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.put_i32(payload.len() as i32 + 4);
    out.put_slice(&payload);
    out
}

pub fn password_message(password: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    put_cstr(&mut payload, password);
    framed(b'p', &payload)
}

/// MD5 challenge response: `md5(md5(password + user) + salt)`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));
    let mut salted = format!("{inner:x}").into_bytes();
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}

pub fn query_message(sql: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    put_cstr(&mut payload, sql);
    framed(b'Q', &payload)
}

pub fn parse_message(statement: &str, sql: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    put_cstr(&mut payload, statement);
    put_cstr(&mut payload, sql);
    payload.put_i16(0);
    framed(b'P', &payload)
}

/// Bind with text-format parameters and text-format results.
pub fn bind_message(portal: &str, statement: &str, params: &[Option<String>]) -> BytesMut {
    let mut payload = BytesMut::new();
    put_cstr(&mut payload, portal);
    put_cstr(&mut payload, statement);
    payload.put_i16(0);
    payload.put_i16(params.len() as i16);
    for param in params {
        match param {
            None => payload.put_i32(-1),
            Some(text) => {
                payload.put_i32(text.len() as i32);
                payload.put_slice(text.as_bytes());
            }
        }
    }
    payload.put_i16(1);
    payload.put_i16(0);
    framed(b'B', &payload)
}

pub fn describe_portal(portal: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_u8(b'P');
    put_cstr(&mut payload, portal);
    framed(b'D', &payload)
}

pub fn describe_statement(statement: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_u8(b'S');
    put_cstr(&mut payload, statement);
    framed(b'D', &payload)
}

pub fn execute_message(portal: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    put_cstr(&mut payload, portal);
    payload.put_i32(0);
    framed(b'E', &payload)
}

pub fn sync_message() -> BytesMut {
    framed(b'S', &[])
}

pub fn terminate_message() -> BytesMut {
    framed(b'X', &[])
}

pub fn cancel_request(process_id: i32, secret_key: i32) -> BytesMut {
    let mut out = BytesMut::with_capacity(16);
    out.put_i32(16);
    out.put_i32(CANCEL_REQUEST_CODE);
    out.put_i32(process_id);
    out.put_i32(secret_key);
    out
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::{md5_password, parse_backend_message, BackendMessage};

    #[test]
    fn parse_ready_for_query_should_expose_status() {
        let message = parse_backend_message(b'Z', Bytes::from_static(b"I")).unwrap();
        let BackendMessage::ReadyForQuery { status } = message else {
            panic!("wrong message kind");
        };
        assert_eq!(b'I', status);
    }

    #[test]
    fn parse_error_response_should_collect_fields() {
        let raw = b"SERROR\0C42601\0Msyntax error\0P10\0\0";
        let message = parse_backend_message(b'E', Bytes::copy_from_slice(raw)).unwrap();
        let BackendMessage::ErrorResponse(error) = message else {
            panic!("wrong message kind");
        };
        assert_eq!("ERROR", error.severity);
        assert_eq!("42601", error.sqlstate);
        assert_eq!("syntax error", error.message);
        assert_eq!(Some(10), error.position);
    }

    #[test]
    fn parse_data_row_should_distinguish_null_from_empty() {
        let raw: &[u8] = &[
            0, 2, // two columns
            255, 255, 255, 255, // null
            0, 0, 0, 0, // empty string
        ];
        let message = parse_backend_message(b'D', Bytes::copy_from_slice(raw)).unwrap();
        let BackendMessage::DataRow(columns) = message else {
            panic!("wrong message kind");
        };
        assert_eq!(vec![None, Some(String::new())], columns);
    }

    #[test]
    fn md5_password_should_have_the_wire_shape() {
        // "md5" followed by 32 hex digits, deterministic per salt.
        let digest = md5_password("postgres", "secret", [1, 2, 3, 4]);
        assert!(digest.starts_with("md5"));
        assert_eq!(35, digest.len());
        assert!(digest[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, md5_password("postgres", "secret", [4, 3, 2, 1]));
    }
}
