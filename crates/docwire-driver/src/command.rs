//! 命令与应答模块
//!
//! 命令是普通的类映射类型, 经序列化注册表写成命令文档并附加 `$db`;
//! 应答文档先检查 `ok`, 再按需反序列化为类型化结构。

use crate::wire::{msg_flags, reply_flags, Message, OpMsg, OpQuery, Payload, Section};
use crate::{DriverError, DriverResult};
use docwire_bson::io::{BinaryWriter, NameValidation};
use docwire_bson::serialization::{BsonMapped, ClassMapBuilder, ClassMapped, SerializerRegistry};
use docwire_bson::{BsonValue, Document, RawDocumentBuf};
use tracing::{debug, warn};

/// OP_MSG 的 kind 1 分段内容
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    pub identifier: String,
    pub documents: Vec<RawDocumentBuf>,
}

/// 待发送的命令
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub database: String,
    pub body: Document,
    pub sequences: Vec<DocumentSequence>,
    /// 置位时服务端不返回应答
    pub more_to_come: bool,
}

impl CommandMessage {
    /// # Brief
    /// 通过注册表序列化类型化命令, 并追加 `$db`
    ///
    /// # Arguments
    /// * `database` - 目标数据库
    /// * `command` - 命令对象, 第一个元素为命令名
    /// * `registry` - 序列化注册表
    pub fn new<C: BsonMapped>(
        database: &str,
        command: &C,
        registry: &SerializerRegistry,
    ) -> DriverResult<Self> {
        let body = registry.to_document(command)?;
        Ok(Self::from_document(database, body))
    }

    pub fn from_document(database: &str, mut body: Document) -> Self {
        body.insert("$db", database);
        let message = Self {
            database: database.to_string(),
            body,
            sequences: Vec::new(),
            more_to_come: false,
        };
        debug!("Built command {} for database {}", message.name(), database);
        message
    }

    /// 命令名, 即主体的第一个元素名
    pub fn name(&self) -> &str {
        self.body.first().map(|(name, _)| name).unwrap_or_default()
    }

    pub fn with_sequence(mut self, identifier: impl Into<String>, documents: Vec<RawDocumentBuf>) -> Self {
        self.sequences.push(DocumentSequence {
            identifier: identifier.into(),
            documents,
        });
        self
    }

    /// 编码为 OP_MSG 请求
    pub fn to_message(&self) -> DriverResult<Message> {
        let mut sections = vec![Section::Body(RawDocumentBuf::from_document(&self.body)?)];
        sections.extend(self.sequences.iter().map(|s| Section::Sequence {
            identifier: s.identifier.clone(),
            documents: s.documents.clone(),
        }));
        let flags = if self.more_to_come {
            msg_flags::MORE_TO_COME
        } else {
            0
        };
        Ok(Message::new(Payload::Msg(OpMsg { flags, sections })))
    }

    /// # Brief
    /// 编码为发往 `<db>.$cmd` 的旧式 OP_QUERY
    ///
    /// 文档序列并入主体成为数组, `$db` 由集合名表达。
    pub fn to_query_message(&self) -> DriverResult<Message> {
        let mut body = self.body.clone();
        body.remove("$db");
        for sequence in &self.sequences {
            let documents = sequence
                .documents
                .iter()
                .map(|d| d.to_document().map(BsonValue::Document))
                .collect::<Result<Vec<_>, _>>()?;
            body.insert(sequence.identifier.as_str(), BsonValue::Array(documents));
        }
        Ok(Message::new(Payload::Query(OpQuery {
            flags: 0,
            full_collection_name: format!("{}.$cmd", self.database),
            number_to_skip: 0,
            number_to_return: -1,
            query: RawDocumentBuf::from_document(&body)?,
            return_fields_selector: None,
        })))
    }
}

/// 服务端应答
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    body: Document,
}

impl CommandReply {
    pub fn new(body: Document) -> Self {
        Self { body }
    }

    /// # Brief
    /// 从 OP_MSG 或 OP_REPLY 报文取出应答主体
    ///
    /// OP_REPLY 的 QueryFailure 位直接转换为命令错误。
    pub fn from_message(message: &Message) -> DriverResult<Self> {
        match &message.payload {
            Payload::Msg(msg) => Ok(Self::new(msg.body()?.to_document()?)),
            Payload::Reply(reply) => {
                let first = reply
                    .documents
                    .first()
                    .ok_or_else(|| DriverError::Protocol("OP_REPLY contains no documents".to_string()))?;
                let body = first.to_document()?;
                if reply.response_flags & reply_flags::QUERY_FAILURE != 0 {
                    return Err(command_error(&body, "$err"));
                }
                Ok(Self::new(body))
            }
            Payload::Query(_) => Err(DriverError::Protocol(
                "OP_QUERY is not a valid reply".to_string(),
            )),
        }
    }

    pub fn body(&self) -> &Document {
        &self.body
    }

    pub fn into_body(self) -> Document {
        self.body
    }

    /// `ok` 可能是 double、整数或布尔值
    pub fn is_ok(&self) -> bool {
        match self.body.get("ok") {
            Some(BsonValue::Boolean(ok)) => *ok,
            Some(value) => value.as_f64() == Some(1.0),
            None => false,
        }
    }

    /// `ok: 0` 时返回 `DriverError::Command`
    pub fn check(&self) -> DriverResult<()> {
        if self.is_ok() {
            return Ok(());
        }
        let err = command_error(&self.body, "errmsg");
        warn!("Command failed: {}", err);
        Err(err)
    }

    /// 检查成功后把整个主体反序列化为 `T`
    pub fn deserialize<T: BsonMapped>(&self, registry: &SerializerRegistry) -> DriverResult<T> {
        self.check()?;
        Ok(registry.from_document(&self.body)?)
    }

    /// 检查成功后读取 `cursor` 子文档
    pub fn cursor<T>(&self, registry: &SerializerRegistry) -> DriverResult<CursorReply<T>>
    where
        T: BsonMapped + Clone + PartialEq + Send + Sync,
    {
        self.check()?;
        let cursor = self
            .body
            .get_document("cursor")
            .ok_or_else(|| DriverError::Protocol("reply has no cursor document".to_string()))?;
        Ok(registry.from_document(cursor)?)
    }
}

fn command_error(body: &Document, message_field: &str) -> DriverError {
    DriverError::Command {
        code: body.get("code").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        code_name: body.get_str("codeName").unwrap_or_default().to_string(),
        message: body.get_str(message_field).unwrap_or_default().to_string(),
    }
}

/// 握手命令
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub hello: i32,
    pub client: Option<Document>,
    pub compression: Vec<String>,
    pub sasl_supported_mechs: Option<String>,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            hello: 1,
            client: None,
            compression: Vec::new(),
            sasl_supported_mechs: None,
        }
    }
}

impl Hello {
    /// 首次握手, 附带客户端元数据
    pub fn with_client_metadata(app_name: Option<&str>) -> Self {
        let mut client = Document::new();
        if let Some(name) = app_name {
            let mut application = Document::new();
            application.insert("name", name);
            client.insert("application", application);
        }
        let mut driver = Document::new();
        driver.insert("name", "docwire");
        driver.insert("version", crate::VERSION);
        client.insert("driver", driver);
        let mut os = Document::new();
        os.insert("type", std::env::consts::OS);
        os.insert("architecture", std::env::consts::ARCH);
        client.insert("os", os);
        Self {
            client: Some(client),
            ..Self::default()
        }
    }
}

impl ClassMapped for Hello {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("hello", |h| &h.hello, |h, v| h.hello = v);
        cm.map_member("client", |h| &h.client, |h, v| h.client = v)
            .ignore_if_default(true);
        cm.map_member("compression", |h| &h.compression, |h, v| h.compression = v)
            .ignore_if_default(true);
        cm.map_member(
            "saslSupportedMechs",
            |h| &h.sasl_supported_mechs,
            |h, v| h.sasl_supported_mechs = v,
        )
        .ignore_if_default(true);
    }
}

/// 握手应答中驱动关心的部分
#[derive(Debug, Clone, PartialEq)]
pub struct HelloReply {
    pub is_writable_primary: bool,
    pub max_bson_object_size: i32,
    pub max_message_size_bytes: i32,
    pub max_write_batch_size: i32,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub set_name: Option<String>,
    pub hosts: Vec<String>,
    pub logical_session_timeout_minutes: Option<i32>,
}

impl Default for HelloReply {
    fn default() -> Self {
        Self {
            is_writable_primary: false,
            max_bson_object_size: docwire_common::DEFAULT_MAX_DOCUMENT_SIZE as i32,
            max_message_size_bytes: crate::DEFAULT_MAX_MESSAGE_SIZE as i32,
            max_write_batch_size: 100_000,
            min_wire_version: 0,
            max_wire_version: 0,
            set_name: None,
            hosts: Vec::new(),
            logical_session_timeout_minutes: None,
        }
    }
}

impl ClassMapped for HelloReply {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member(
            "isWritablePrimary",
            |r| &r.is_writable_primary,
            |r, v| r.is_writable_primary = v,
        );
        cm.map_member(
            "maxBsonObjectSize",
            |r| &r.max_bson_object_size,
            |r, v| r.max_bson_object_size = v,
        );
        cm.map_member(
            "maxMessageSizeBytes",
            |r| &r.max_message_size_bytes,
            |r, v| r.max_message_size_bytes = v,
        );
        cm.map_member(
            "maxWriteBatchSize",
            |r| &r.max_write_batch_size,
            |r, v| r.max_write_batch_size = v,
        );
        cm.map_member("minWireVersion", |r| &r.min_wire_version, |r, v| r.min_wire_version = v);
        cm.map_member("maxWireVersion", |r| &r.max_wire_version, |r, v| r.max_wire_version = v);
        cm.map_member("setName", |r| &r.set_name, |r, v| r.set_name = v)
            .ignore_if_default(true);
        cm.map_member("hosts", |r| &r.hosts, |r, v| r.hosts = v)
            .ignore_if_default(true);
        cm.map_member(
            "logicalSessionTimeoutMinutes",
            |r| &r.logical_session_timeout_minutes,
            |r, v| r.logical_session_timeout_minutes = v,
        )
        .ignore_if_default(true);
        cm.set_ignore_extra_elements(true);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub ping: i32,
}

impl Default for Ping {
    fn default() -> Self {
        Self { ping: 1 }
    }
}

impl ClassMapped for Ping {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("ping", |p| &p.ping, |p, v| p.ping = v);
    }
}

/// 插入命令
///
/// 文档以 `documents` 序列发送, 发送前由注册表补全 id,
/// 并按存储规则校验元素名。
#[derive(Debug, Clone)]
pub struct Insert<T> {
    pub collection: String,
    pub documents: Vec<T>,
    pub ordered: bool,
    pub bypass_document_validation: Option<bool>,
}

impl<T: ClassMapped> Insert<T> {
    pub fn new(collection: impl Into<String>, documents: Vec<T>) -> Self {
        Self {
            collection: collection.into(),
            documents,
            ordered: true,
            bypass_document_validation: None,
        }
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// # Brief
    /// 补全文档 id 并构造命令
    ///
    /// 生成的 id 写回 `self.documents`, 调用方可随后读取。
    ///
    /// # Arguments
    /// * `database` - 目标数据库
    /// * `registry` - 序列化注册表
    pub fn to_command(
        &mut self,
        database: &str,
        registry: &SerializerRegistry,
    ) -> DriverResult<CommandMessage> {
        let mut generated = 0;
        for document in &mut self.documents {
            if registry.ensure_document_id(document, Some(self.collection.as_str()))? {
                generated += 1;
            }
        }
        if generated > 0 {
            debug!("Generated {} ids for insert into {}", generated, self.collection);
        }

        let documents = self
            .documents
            .iter()
            .map(|document| {
                let mut writer = BinaryWriter::new();
                writer.set_name_validation(NameValidation::Storage);
                registry.serialize(&mut writer, document)?;
                Ok(RawDocumentBuf::from_bytes(writer.into_vec())?)
            })
            .collect::<DriverResult<Vec<_>>>()?;

        let mut body = Document::new();
        body.insert("insert", self.collection.as_str());
        body.insert("ordered", self.ordered);
        if let Some(bypass) = self.bypass_document_validation {
            body.insert("bypassDocumentValidation", bypass);
        }
        Ok(CommandMessage::from_document(database, body).with_sequence("documents", documents))
    }
}

/// 单个文档的写错误
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteError {
    pub index: i32,
    pub code: i32,
    pub errmsg: String,
}

impl ClassMapped for WriteError {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("index", |e| &e.index, |e, v| e.index = v);
        cm.map_member("code", |e| &e.code, |e, v| e.code = v);
        cm.map_member("errmsg", |e| &e.errmsg, |e, v| e.errmsg = v);
        cm.set_ignore_extra_elements(true);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertReply {
    pub n: i32,
    pub write_errors: Vec<WriteError>,
}

impl InsertReply {
    /// 有写错误时返回第一个, 否则返回插入数量
    pub fn into_result(self) -> DriverResult<i32> {
        match self.write_errors.into_iter().next() {
            Some(e) => Err(DriverError::Write {
                index: e.index,
                code: e.code,
                message: e.errmsg,
            }),
            None => Ok(self.n),
        }
    }
}

impl ClassMapped for InsertReply {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("n", |r| &r.n, |r, v| r.n = v);
        cm.map_member("writeErrors", |r| &r.write_errors, |r, v| r.write_errors = v)
            .ignore_if_default(true);
        cm.set_ignore_extra_elements(true);
    }
}

/// 查询命令
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Find {
    pub collection: String,
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub batch_size: Option<i32>,
    pub single_batch: Option<bool>,
}

impl Find {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl ClassMapped for Find {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("collection", |f| &f.collection, |f, v| f.collection = v)
            .element_name("find");
        cm.map_member("filter", |f| &f.filter, |f, v| f.filter = v)
            .ignore_if_default(true);
        cm.map_member("sort", |f| &f.sort, |f, v| f.sort = v)
            .ignore_if_default(true);
        cm.map_member("projection", |f| &f.projection, |f, v| f.projection = v)
            .ignore_if_default(true);
        cm.map_member("skip", |f| &f.skip, |f, v| f.skip = v)
            .ignore_if_default(true);
        cm.map_member("limit", |f| &f.limit, |f, v| f.limit = v)
            .ignore_if_default(true);
        cm.map_member("batch_size", |f| &f.batch_size, |f, v| f.batch_size = v)
            .element_name("batchSize")
            .ignore_if_default(true);
        cm.map_member("single_batch", |f| &f.single_batch, |f, v| f.single_batch = v)
            .element_name("singleBatch")
            .ignore_if_default(true);
    }
}

/// 继续读取游标
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetMore {
    pub cursor_id: i64,
    pub collection: String,
    pub batch_size: Option<i32>,
    pub max_time_ms: Option<i64>,
}

impl ClassMapped for GetMore {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("cursor_id", |g| &g.cursor_id, |g, v| g.cursor_id = v)
            .element_name("getMore");
        cm.map_member("collection", |g| &g.collection, |g, v| g.collection = v);
        cm.map_member("batch_size", |g| &g.batch_size, |g, v| g.batch_size = v)
            .element_name("batchSize")
            .ignore_if_default(true);
        cm.map_member("max_time_ms", |g| &g.max_time_ms, |g, v| g.max_time_ms = v)
            .element_name("maxTimeMS")
            .ignore_if_default(true);
    }
}

/// `find`/`getMore` 应答中的 `cursor` 子文档
#[derive(Debug, Clone, PartialEq)]
pub struct CursorReply<T> {
    pub cursor_id: i64,
    pub ns: String,
    pub first_batch: Vec<T>,
    pub next_batch: Vec<T>,
}

impl<T> Default for CursorReply<T> {
    fn default() -> Self {
        Self {
            cursor_id: 0,
            ns: String::new(),
            first_batch: Vec::new(),
            next_batch: Vec::new(),
        }
    }
}

impl<T> CursorReply<T> {
    /// 当前批次: `firstBatch` 或 `nextBatch`
    pub fn batch(&self) -> &[T] {
        if self.first_batch.is_empty() {
            &self.next_batch
        } else {
            &self.first_batch
        }
    }

    pub fn into_batch(self) -> Vec<T> {
        if self.first_batch.is_empty() {
            self.next_batch
        } else {
            self.first_batch
        }
    }

    /// 游标 id 为 0 时服务端已关闭游标
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0
    }

    /// 构造读取下一批的命令; 游标已关闭时返回 None
    pub fn get_more(&self, batch_size: Option<i32>) -> Option<GetMore> {
        if self.is_exhausted() {
            return None;
        }
        let collection = self.ns.split_once('.').map(|(_, c)| c).unwrap_or(&self.ns);
        Some(GetMore {
            cursor_id: self.cursor_id,
            collection: collection.to_string(),
            batch_size,
            max_time_ms: None,
        })
    }
}

impl<T> ClassMapped for CursorReply<T>
where
    T: BsonMapped + Clone + PartialEq + Send + Sync,
{
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("cursor_id", |c| &c.cursor_id, |c, v| c.cursor_id = v)
            .element_name("id");
        cm.map_member("ns", |c| &c.ns, |c, v| c.ns = v);
        cm.map_member("first_batch", |c| &c.first_batch, |c, v| c.first_batch = v)
            .element_name("firstBatch")
            .ignore_if_default(true);
        cm.map_member("next_batch", |c| &c.next_batch, |c, v| c.next_batch = v)
            .element_name("nextBatch")
            .ignore_if_default(true);
        cm.set_ignore_extra_elements(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OpReply;
    use docwire_bson::{doc, BsonError, ObjectId};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Person {
        id: ObjectId,
        name: String,
        extra: Document,
    }

    impl ClassMapped for Person {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_id_member("Id", |p| &p.id, |p, v| p.id = v);
            cm.map_member("Name", |p| &p.name, |p, v| p.name = v);
            cm.map_extra_elements_member("Extra", |p| &p.extra, |p, v| p.extra = v);
        }
    }

    fn reply_message(body: Document) -> Message {
        Message::reply_to(
            1,
            Payload::Msg(OpMsg::new(RawDocumentBuf::from_document(&body).unwrap())),
        )
    }

    #[test]
    fn test_ping_command() {
        let registry = SerializerRegistry::new();
        let command = CommandMessage::new("admin", &Ping::default(), &registry).unwrap();
        assert_eq!(command.name(), "ping");
        assert_eq!(command.body, doc! { "ping": 1, "$db": "admin" });

        let message = command.to_message().unwrap();
        let decoded = Message::decode(&message.encode().unwrap(), 1024).unwrap();
        let Payload::Msg(msg) = decoded.payload else {
            panic!("expected OP_MSG");
        };
        assert_eq!(msg.body().unwrap().to_document().unwrap(), command.body);
    }

    #[test]
    fn test_find_omits_unset_options() {
        let registry = SerializerRegistry::new();
        let find = Find::new("people")
            .filter(doc! { "Name": "ann" })
            .limit(5)
            .batch_size(2);
        let command = CommandMessage::new("app", &find, &registry).unwrap();
        assert_eq!(
            command.body,
            doc! { "find": "people", "filter": { "Name": "ann" }, "limit": (5i64), "batchSize": 2, "$db": "app" }
        );
    }

    #[test]
    fn test_insert_generates_ids_and_sequence() {
        let registry = SerializerRegistry::new();
        let mut insert = Insert::new(
            "people",
            vec![
                Person {
                    name: "ann".to_string(),
                    ..Person::default()
                },
                Person {
                    name: "bob".to_string(),
                    ..Person::default()
                },
            ],
        );
        let command = insert.to_command("app", &registry).unwrap();
        assert!(insert.documents.iter().all(|p| !p.id.is_empty()));
        assert_ne!(insert.documents[0].id, insert.documents[1].id);
        assert_eq!(command.body, doc! { "insert": "people", "ordered": true, "$db": "app" });

        let sequence = &command.sequences[0];
        assert_eq!(sequence.identifier, "documents");
        let first = sequence.documents[0].to_document().unwrap();
        assert_eq!(first.first().map(|(name, _)| name), Some("_id"));
        assert_eq!(first.get_object_id("_id"), Some(insert.documents[0].id));
    }

    #[test]
    fn test_insert_rejects_operator_names() {
        let registry = SerializerRegistry::new();
        let mut extra = Document::new();
        extra.insert("$set", 1);
        let mut insert = Insert::new(
            "people",
            vec![Person {
                name: "eve".to_string(),
                extra,
                ..Person::default()
            }],
        );
        let err = insert.to_command("app", &registry).unwrap_err();
        assert!(matches!(err, DriverError::Bson(BsonError::InvalidElementName { .. })));
    }

    #[test]
    fn test_legacy_query_folds_sequences() {
        let registry = SerializerRegistry::new();
        let mut insert = Insert::new("people", vec![Person::default()]);
        let command = insert.to_command("app", &registry).unwrap();
        let message = command.to_query_message().unwrap();
        let Payload::Query(query) = &message.payload else {
            panic!("expected OP_QUERY");
        };
        assert_eq!(query.full_collection_name, "app.$cmd");
        assert_eq!(query.number_to_return, -1);
        let body = query.query.to_document().unwrap();
        assert!(!body.contains_key("$db"));
        assert_eq!(body.get_array("documents").map(|d| d.len()), Some(1));
    }

    #[test]
    fn test_cursor_reply() {
        let registry = SerializerRegistry::new();
        let id = ObjectId::new();
        let body = doc! {
            "cursor": {
                "firstBatch": [{ "_id": (BsonValue::ObjectId(id)), "Name": "ann" }],
                "id": (77i64),
                "ns": "app.people"
            },
            "ok": 1.0
        };
        let reply = CommandReply::from_message(&reply_message(body)).unwrap();
        let cursor: CursorReply<Person> = reply.cursor(&registry).unwrap();
        assert_eq!(cursor.batch().len(), 1);
        assert_eq!(cursor.batch()[0].id, id);
        assert!(!cursor.is_exhausted());

        let get_more = cursor.get_more(Some(10)).unwrap();
        let command = CommandMessage::new("app", &get_more, &registry).unwrap();
        assert_eq!(
            command.body,
            doc! { "getMore": (77i64), "collection": "people", "batchSize": 10, "$db": "app" }
        );
    }

    #[test]
    fn test_command_error() {
        let body = doc! { "ok": 0.0, "errmsg": "not authorized", "code": 13, "codeName": "Unauthorized" };
        let reply = CommandReply::from_message(&reply_message(body)).unwrap();
        assert!(!reply.is_ok());
        match reply.check() {
            Err(DriverError::Command {
                code,
                code_name,
                message,
            }) => {
                assert_eq!(code, 13);
                assert_eq!(code_name, "Unauthorized");
                assert_eq!(message, "not authorized");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_legacy_reply() {
        let ok = OpReply {
            number_returned: 1,
            documents: vec![RawDocumentBuf::from_document(&doc! { "ok": 1, "isWritablePrimary": true, "maxWireVersion": 17 }).unwrap()],
            ..OpReply::default()
        };
        let registry = SerializerRegistry::new();
        let reply = CommandReply::from_message(&Message::reply_to(1, Payload::Reply(ok))).unwrap();
        let hello: HelloReply = reply.deserialize(&registry).unwrap();
        assert!(hello.is_writable_primary);
        assert_eq!(hello.max_wire_version, 17);
        assert_eq!(hello.max_write_batch_size, 100_000);

        let failed = OpReply {
            response_flags: reply_flags::QUERY_FAILURE,
            number_returned: 1,
            documents: vec![RawDocumentBuf::from_document(&doc! { "$err": "bad query", "code": 2 }).unwrap()],
            ..OpReply::default()
        };
        let err = CommandReply::from_message(&Message::reply_to(1, Payload::Reply(failed))).unwrap_err();
        assert!(matches!(err, DriverError::Command { code: 2, .. }));
    }

    #[test]
    fn test_insert_reply_write_errors() {
        let registry = SerializerRegistry::new();
        let body = doc! {
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key" }],
            "ok": 1
        };
        let reply: InsertReply = CommandReply::new(body).deserialize(&registry).unwrap();
        assert!(matches!(
            reply.into_result(),
            Err(DriverError::Write { index: 1, code: 11000, .. })
        ));
    }

    #[test]
    fn test_hello_metadata() {
        let registry = SerializerRegistry::new();
        let command =
            CommandMessage::new("admin", &Hello::with_client_metadata(Some("reporting")), &registry)
                .unwrap();
        assert_eq!(command.name(), "hello");
        assert_eq!(
            command.body.get_path("client.application.name").and_then(|v| v.as_str()),
            Some("reporting")
        );
        assert!(!command.body.contains_key("compression"));
    }
}
