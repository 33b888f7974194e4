//! 线协议报文模块
//!
//! 报文由 16 字节头 (长度、请求 id、应答 id、操作码, 均为小端 int32) 和
//! 操作体组成。支持 OP_MSG、旧式 OP_QUERY 命令与 OP_REPLY 应答。
//! 编码时回填总长度, 解码时校验长度上限与截断。

use crate::{DriverError, DriverResult};
use bytes::{BufMut, BytesMut};
use docwire_bson::io::{BinaryReader, BsonReader};
use docwire_bson::RawDocumentBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// 生成进程内递增的请求 id
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    Msg = 2013,
}

impl TryFrom<i32> for OpCode {
    type Error = DriverError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2013 => Ok(OpCode::Msg),
            other => Err(DriverError::UnknownOpCode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub const SIZE: usize = 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.message_length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code as i32);
    }

    /// # Brief
    /// 解析报文头并校验长度
    ///
    /// # Arguments
    /// * `data` - 至少 16 字节
    /// * `max_message_size` - 允许的最大报文长度
    pub fn decode(data: &[u8], max_message_size: usize) -> DriverResult<Self> {
        let mut cursor = Cursor::new(data);
        let message_length = cursor.read_i32()?;
        let request_id = cursor.read_i32()?;
        let response_to = cursor.read_i32()?;
        let op_code = OpCode::try_from(cursor.read_i32()?)?;

        if message_length < Self::SIZE as i32 {
            return Err(DriverError::Protocol(format!(
                "message length {} is smaller than the header",
                message_length
            )));
        }
        if message_length as usize > max_message_size {
            return Err(DriverError::MessageTooLarge {
                size: message_length as usize,
                max: max_message_size,
            });
        }

        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }
}

/// OP_MSG 标志位
pub mod msg_flags {
    pub const CHECKSUM_PRESENT: u32 = 1;
    pub const MORE_TO_COME: u32 = 1 << 1;
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;
    /// 未知的必需位 (0-15) 出现时必须拒绝报文
    pub(crate) const REQUIRED_MASK: u32 = 0xFFFF;
}

/// OP_MSG 的一个分段
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// kind 0: 命令主体
    Body(RawDocumentBuf),
    /// kind 1: 以标识符命名的文档序列
    Sequence {
        identifier: String,
        documents: Vec<RawDocumentBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpMsg {
    pub flags: u32,
    pub sections: Vec<Section>,
}

impl OpMsg {
    pub fn new(body: RawDocumentBuf) -> Self {
        Self {
            flags: 0,
            sections: vec![Section::Body(body)],
        }
    }

    /// 唯一的 kind 0 分段
    pub fn body(&self) -> DriverResult<&RawDocumentBuf> {
        let mut bodies = self.sections.iter().filter_map(|s| match s {
            Section::Body(body) => Some(body),
            Section::Sequence { .. } => None,
        });
        match (bodies.next(), bodies.next()) {
            (Some(body), None) => Ok(body),
            (None, _) => Err(DriverError::Protocol("OP_MSG has no body section".to_string())),
            (Some(_), Some(_)) => Err(DriverError::Protocol(
                "OP_MSG has more than one body section".to_string(),
            )),
        }
    }

    pub fn sequence(&self, identifier: &str) -> Option<&[RawDocumentBuf]> {
        self.sections.iter().find_map(|s| match s {
            Section::Sequence {
                identifier: id,
                documents,
            } if id == identifier => Some(documents.as_slice()),
            _ => None,
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> DriverResult<()> {
        if self.flags & msg_flags::CHECKSUM_PRESENT != 0 {
            return Err(DriverError::Protocol(
                "writing OP_MSG checksums is not supported".to_string(),
            ));
        }
        buf.put_u32_le(self.flags);
        for section in &self.sections {
            match section {
                Section::Body(body) => {
                    buf.put_u8(0);
                    buf.put_slice(body.as_bytes());
                }
                Section::Sequence {
                    identifier,
                    documents,
                } => {
                    buf.put_u8(1);
                    let start = buf.len();
                    buf.put_i32_le(0);
                    put_cstring(buf, identifier)?;
                    for doc in documents {
                        buf.put_slice(doc.as_bytes());
                    }
                    let size = to_i32(buf.len() - start)?;
                    buf[start..start + 4].copy_from_slice(&size.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn decode(data: &[u8]) -> DriverResult<Self> {
        let mut cursor = Cursor::new(data);
        let flags = cursor.read_u32()?;
        let unknown_required = flags & msg_flags::REQUIRED_MASK
            & !(msg_flags::CHECKSUM_PRESENT | msg_flags::MORE_TO_COME);
        if unknown_required != 0 {
            return Err(DriverError::Protocol(format!(
                "OP_MSG has unknown required flag bits 0x{:x}",
                unknown_required
            )));
        }

        // 校验和位于末尾 4 字节, 不参与分段解析
        let end = if flags & msg_flags::CHECKSUM_PRESENT != 0 {
            data.len()
                .checked_sub(4)
                .filter(|end| *end >= 4)
                .ok_or_else(|| truncated("OP_MSG checksum"))?
        } else {
            data.len()
        };
        let mut cursor = Cursor::new(&data[..end]);
        cursor.position = 4;

        let mut sections = Vec::new();
        while !cursor.is_empty() {
            match cursor.read_u8()? {
                0 => {
                    let size = cursor.peek_i32()?;
                    let bytes = cursor.take(checked_size(size, "body section")?)?;
                    sections.push(Section::Body(RawDocumentBuf::from_bytes(bytes.to_vec())?));
                }
                1 => {
                    let size = checked_size(cursor.peek_i32()?, "document sequence")?;
                    let section = cursor.take(size)?;
                    let mut inner = Cursor::new(section);
                    inner.position = 4;
                    let identifier = inner.read_cstring()?;
                    let documents = read_document_sequence(&section[inner.position..])?;
                    trace!("OP_MSG sequence {} with {} documents", identifier, documents.len());
                    sections.push(Section::Sequence {
                        identifier,
                        documents,
                    });
                }
                kind => {
                    return Err(DriverError::Protocol(format!(
                        "unknown OP_MSG section kind {}",
                        kind
                    )))
                }
            }
        }

        let msg = Self { flags, sections };
        msg.body()?;
        Ok(msg)
    }
}

/// 旧式查询报文, 仅用于对 `db.$cmd` 发送命令 (如初次握手)
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: u32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: RawDocumentBuf,
    pub return_fields_selector: Option<RawDocumentBuf>,
}

impl OpQuery {
    fn encode(&self, buf: &mut BytesMut) -> DriverResult<()> {
        buf.put_u32_le(self.flags);
        put_cstring(buf, &self.full_collection_name)?;
        buf.put_i32_le(self.number_to_skip);
        buf.put_i32_le(self.number_to_return);
        buf.put_slice(self.query.as_bytes());
        if let Some(selector) = &self.return_fields_selector {
            buf.put_slice(selector.as_bytes());
        }
        Ok(())
    }

    fn decode(data: &[u8]) -> DriverResult<Self> {
        let mut cursor = Cursor::new(data);
        let flags = cursor.read_u32()?;
        let full_collection_name = cursor.read_cstring()?;
        let number_to_skip = cursor.read_i32()?;
        let number_to_return = cursor.read_i32()?;
        let mut documents = read_document_sequence(cursor.rest())?.into_iter();
        let query = documents
            .next()
            .ok_or_else(|| DriverError::Protocol("OP_QUERY has no query document".to_string()))?;
        let return_fields_selector = documents.next();
        if documents.next().is_some() {
            return Err(DriverError::Protocol(
                "OP_QUERY has trailing documents".to_string(),
            ));
        }
        Ok(Self {
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query,
            return_fields_selector,
        })
    }
}

/// OP_REPLY 应答标志位
pub mod reply_flags {
    pub const CURSOR_NOT_FOUND: u32 = 1;
    pub const QUERY_FAILURE: u32 = 1 << 1;
    pub const AWAIT_CAPABLE: u32 = 1 << 3;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpReply {
    pub response_flags: u32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<RawDocumentBuf>,
}

impl OpReply {
    fn encode(&self, buf: &mut BytesMut) -> DriverResult<()> {
        buf.put_u32_le(self.response_flags);
        buf.put_i64_le(self.cursor_id);
        buf.put_i32_le(self.starting_from);
        buf.put_i32_le(to_i32(self.documents.len())?);
        for doc in &self.documents {
            buf.put_slice(doc.as_bytes());
        }
        Ok(())
    }

    fn decode(data: &[u8]) -> DriverResult<Self> {
        let mut cursor = Cursor::new(data);
        let response_flags = cursor.read_u32()?;
        let cursor_id = cursor.read_i64()?;
        let starting_from = cursor.read_i32()?;
        let number_returned = cursor.read_i32()?;
        let documents = read_document_sequence(cursor.rest())?;
        if documents.len() != number_returned.max(0) as usize {
            return Err(DriverError::Protocol(format!(
                "OP_REPLY announced {} documents but contains {}",
                number_returned,
                documents.len()
            )));
        }
        Ok(Self {
            response_flags,
            cursor_id,
            starting_from,
            number_returned,
            documents,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Msg(OpMsg),
    Query(OpQuery),
    Reply(OpReply),
}

impl Payload {
    pub fn op_code(&self) -> OpCode {
        match self {
            Payload::Msg(_) => OpCode::Msg,
            Payload::Query(_) => OpCode::Query,
            Payload::Reply(_) => OpCode::Reply,
        }
    }
}

/// 完整报文
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub response_to: i32,
    pub payload: Payload,
}

impl Message {
    /// 以新的请求 id 创建请求报文
    pub fn new(payload: Payload) -> Self {
        Self {
            request_id: next_request_id(),
            response_to: 0,
            payload,
        }
    }

    /// 创建对 `request_id` 的应答
    pub fn reply_to(request_id: i32, payload: Payload) -> Self {
        Self {
            request_id: next_request_id(),
            response_to: request_id,
            payload,
        }
    }

    pub fn op_code(&self) -> OpCode {
        self.payload.op_code()
    }

    /// # Brief
    /// 编码为字节, 先写占位长度再回填
    pub fn encode(&self) -> DriverResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(256);
        MessageHeader {
            message_length: 0,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: self.op_code(),
        }
        .encode(&mut buf);

        match &self.payload {
            Payload::Msg(msg) => msg.encode(&mut buf)?,
            Payload::Query(query) => query.encode(&mut buf)?,
            Payload::Reply(reply) => reply.encode(&mut buf)?,
        }

        let length = to_i32(buf.len())?;
        buf[0..4].copy_from_slice(&length.to_le_bytes());
        Ok(buf)
    }

    /// # Brief
    /// 从完整报文字节解码
    ///
    /// # Arguments
    /// * `data` - 包含报文头的完整报文
    /// * `max_message_size` - 允许的最大报文长度
    pub fn decode(data: &[u8], max_message_size: usize) -> DriverResult<Self> {
        if data.len() < MessageHeader::SIZE {
            return Err(truncated("message header"));
        }
        let header = MessageHeader::decode(data, max_message_size)?;
        let length = header.message_length as usize;
        if data.len() < length {
            return Err(truncated("message body"));
        }
        if data.len() > length {
            return Err(DriverError::Protocol(format!(
                "message length {} does not match the {} bytes received",
                length,
                data.len()
            )));
        }

        let body = &data[MessageHeader::SIZE..length];
        let payload = match header.op_code {
            OpCode::Msg => Payload::Msg(OpMsg::decode(body)?),
            OpCode::Query => Payload::Query(OpQuery::decode(body)?),
            OpCode::Reply => Payload::Reply(OpReply::decode(body)?),
        };

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            payload,
        })
    }
}

/// # Brief
/// 从异步流读取一个完整报文
///
/// # Arguments
/// * `reader` - 任意 `AsyncRead`
/// * `max_message_size` - 允许的最大报文长度, 超出时不读取报文体
pub async fn read_message<R>(reader: &mut R, max_message_size: usize) -> DriverResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MessageHeader::SIZE];
    reader.read_exact(&mut header).await?;
    let parsed = MessageHeader::decode(&header, max_message_size)?;

    let mut data = vec![0u8; parsed.message_length as usize];
    data[..MessageHeader::SIZE].copy_from_slice(&header);
    reader.read_exact(&mut data[MessageHeader::SIZE..]).await?;

    let message = Message::decode(&data, max_message_size)?;
    debug!(
        "Received {:?} message {} ({} bytes) in response to {}",
        message.op_code(),
        message.request_id,
        data.len(),
        message.response_to
    );
    Ok(message)
}

/// 把报文写入异步流并刷新
pub async fn write_message<W>(writer: &mut W, message: &Message) -> DriverResult<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = message.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    debug!(
        "Sent {:?} message {} ({} bytes)",
        message.op_code(),
        message.request_id,
        buf.len()
    );
    Ok(())
}

/// 读取首尾相接的顶层文档
fn read_document_sequence(data: &[u8]) -> DriverResult<Vec<RawDocumentBuf>> {
    let mut reader = BinaryReader::new(data);
    let mut documents = Vec::new();
    while !reader.is_at_end_of_file() {
        reader.read_bson_type()?;
        let bytes = reader.read_raw_document()?;
        documents.push(RawDocumentBuf::from_bytes(bytes)?);
    }
    Ok(documents)
}

fn put_cstring(buf: &mut BytesMut, value: &str) -> DriverResult<()> {
    if value.contains('\0') {
        return Err(DriverError::Protocol(format!(
            "'{}' contains a null byte",
            value.escape_default()
        )));
    }
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn to_i32(len: usize) -> DriverResult<i32> {
    i32::try_from(len)
        .map_err(|_| DriverError::Protocol(format!("length {} does not fit in an int32", len)))
}

fn checked_size(size: i32, what: &str) -> DriverResult<usize> {
    if size < 5 {
        return Err(DriverError::Protocol(format!("invalid {} size {}", what, size)));
    }
    Ok(size as usize)
}

fn truncated(what: &str) -> DriverError {
    DriverError::Protocol(format!("truncated {}", what))
}

/// 小端读取游标
struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    fn take(&mut self, n: usize) -> DriverResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| truncated("message"))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> DriverResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> DriverResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> DriverResult<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    fn read_u32(&mut self) -> DriverResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    fn read_i64(&mut self) -> DriverResult<i64> {
        self.read_array().map(i64::from_le_bytes)
    }

    fn peek_i32(&self) -> DriverResult<i32> {
        let bytes = self
            .data
            .get(self.position..self.position + 4)
            .ok_or_else(|| truncated("section size"))?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_cstring(&mut self) -> DriverResult<String> {
        let rest = self.rest();
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| DriverError::Protocol("unterminated C string".to_string()))?;
        let value = std::str::from_utf8(&rest[..nul])
            .map_err(|_| DriverError::Protocol("C string is not valid UTF-8".to_string()))?
            .to_string();
        self.position += nul + 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_bson::{doc, Document};

    fn raw(doc: &Document) -> RawDocumentBuf {
        RawDocumentBuf::from_document(doc).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let message = Message {
            request_id: 7,
            response_to: 3,
            payload: Payload::Msg(OpMsg::new(raw(&doc! { "ping": 1 }))),
        };
        let bytes = message.encode().unwrap();
        assert_eq!(&bytes[0..4], &(bytes.len() as i32).to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2013i32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0u32.to_le_bytes());
        assert_eq!(bytes[20], 0);
        assert_eq!(Message::decode(&bytes, 1024).unwrap(), message);
    }

    #[test]
    fn test_op_msg_with_sequence() {
        let msg = OpMsg {
            flags: msg_flags::EXHAUST_ALLOWED,
            sections: vec![
                Section::Body(raw(&doc! { "insert": "users", "$db": "app" })),
                Section::Sequence {
                    identifier: "documents".to_string(),
                    documents: vec![raw(&doc! { "_id": 1 }), raw(&doc! { "_id": 2 })],
                },
            ],
        };
        let message = Message::new(Payload::Msg(msg));
        let bytes = message.encode().unwrap();
        let decoded = Message::decode(&bytes, 1024).unwrap();
        let Payload::Msg(decoded_msg) = &decoded.payload else {
            panic!("expected OP_MSG");
        };
        assert_eq!(decoded_msg.body().unwrap().to_document().unwrap().get_str("insert"), Some("users"));
        let docs = decoded_msg.sequence("documents").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].to_document().unwrap(), doc! { "_id": 2 });
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_op_msg_checksum_is_skipped() {
        let message = Message::new(Payload::Msg(OpMsg::new(raw(&doc! { "ok": 1.0 }))));
        let mut bytes = message.encode().unwrap().to_vec();
        bytes[16] = msg_flags::CHECKSUM_PRESENT as u8;
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let length = bytes.len() as i32;
        bytes[0..4].copy_from_slice(&length.to_le_bytes());
        let decoded = Message::decode(&bytes, 1024).unwrap();
        let Payload::Msg(msg) = decoded.payload else {
            panic!("expected OP_MSG");
        };
        assert_eq!(msg.flags, msg_flags::CHECKSUM_PRESENT);
        assert_eq!(msg.sections.len(), 1);
    }

    #[test]
    fn test_op_msg_rejects_unknown_required_bits() {
        let message = Message::new(Payload::Msg(OpMsg {
            flags: 1 << 5,
            sections: vec![Section::Body(raw(&doc! { "a": 1 }))],
        }));
        let bytes = message.encode().unwrap();
        assert!(matches!(Message::decode(&bytes, 1024), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_op_query_round_trip() {
        let query = OpQuery {
            flags: 0,
            full_collection_name: "admin.$cmd".to_string(),
            number_to_skip: 0,
            number_to_return: -1,
            query: raw(&doc! { "hello": 1 }),
            return_fields_selector: Some(raw(&doc! { "ok": 1 })),
        };
        let message = Message::new(Payload::Query(query));
        let decoded = Message::decode(&message.encode().unwrap(), 1024).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_op_reply_documents() {
        let reply = OpReply {
            response_flags: reply_flags::AWAIT_CAPABLE,
            cursor_id: 42,
            starting_from: 0,
            number_returned: 2,
            documents: vec![raw(&doc! { "a": 1 }), raw(&doc! { "b": { "c": 2 } })],
        };
        let message = Message::reply_to(9, Payload::Reply(reply));
        let bytes = message.encode().unwrap();
        let decoded = Message::decode(&bytes, 1024).unwrap();
        assert_eq!(decoded.response_to, 9);
        assert_eq!(decoded, message);

        let mut wrong_count = bytes.to_vec();
        wrong_count[32..36].copy_from_slice(&3i32.to_le_bytes());
        assert!(matches!(Message::decode(&wrong_count, 1024), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_size_limits_and_truncation() {
        let message = Message::new(Payload::Msg(OpMsg::new(raw(&doc! { "x": "yyyyyyyy" }))));
        let bytes = message.encode().unwrap();
        assert!(matches!(
            Message::decode(&bytes, 20),
            Err(DriverError::MessageTooLarge { max: 20, .. })
        ));
        assert!(matches!(
            Message::decode(&bytes[..bytes.len() - 1], 1024),
            Err(DriverError::Protocol(_))
        ));
        assert!(matches!(Message::decode(&bytes[..10], 1024), Err(DriverError::Protocol(_))));

        let mut bad_opcode = bytes.to_vec();
        bad_opcode[12..16].copy_from_slice(&2010i32.to_le_bytes());
        assert!(matches!(Message::decode(&bad_opcode, 1024), Err(DriverError::UnknownOpCode(2010))));
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_async_read_write() {
        let first = Message::new(Payload::Msg(OpMsg::new(raw(&doc! { "ping": 1 }))));
        let second = Message::reply_to(
            first.request_id,
            Payload::Msg(OpMsg::new(raw(&doc! { "ok": 1.0 }))),
        );

        let mut buffer = Vec::new();
        write_message(&mut buffer, &first).await.unwrap();
        write_message(&mut buffer, &second).await.unwrap();

        let mut stream = buffer.as_slice();
        assert_eq!(read_message(&mut stream, 1024).await.unwrap(), first);
        assert_eq!(read_message(&mut stream, 1024).await.unwrap(), second);
        assert!(matches!(read_message(&mut stream, 1024).await, Err(DriverError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_from_chunked_stream() {
        let message = Message::new(Payload::Msg(OpMsg::new(raw(&doc! { "hello": 1 }))));
        let bytes = message.encode().unwrap();
        let mut mock = tokio_test::io::Builder::new()
            .read(&bytes[..5])
            .read(&bytes[5..17])
            .read(&bytes[17..])
            .build();
        assert_eq!(read_message(&mut mock, 1024).await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_oversized_header_stops_before_body() {
        let message = Message::new(Payload::Msg(OpMsg::new(raw(&doc! { "data": "0123456789" }))));
        let bytes = message.encode().unwrap();
        let mut mock = tokio_test::io::Builder::new().read(&bytes[..16]).build();
        assert!(matches!(
            read_message(&mut mock, 16).await,
            Err(DriverError::MessageTooLarge { .. })
        ));
    }
}
