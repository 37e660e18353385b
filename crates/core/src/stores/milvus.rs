//! Milvus over the RESTful v2 API. Every response carries a `code`; anything
//! but zero is a failure even when the HTTP status is 200.

use super::transport::{HttpTransport, ReqwestTransport};
use super::{id_string, metadata_from_json_str, str_at};
use crate::config::{BackendConfig, BackendKind};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, StoreError};
use crate::models::{sort_by_score_desc, ChunkMetadata, SearchHit, StoredChunk};
use crate::traits::VectorBackend;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BACKEND: &str = "milvus";
const OUTPUT_FIELDS: [&str; 3] = ["text", "source", "metadata_json"];
/// Milvus rejects queries where `offset + limit` exceeds this.
const QUERY_WINDOW: usize = 16_384;
const LIST_PAGE: usize = 1_024;
const NLIST: u32 = 1024;
const NPROBE: u32 = 10;

pub struct MilvusStore {
    collection: String,
    transport: Box<dyn HttpTransport>,
    embedder: Arc<dyn Embedder>,
}

impl MilvusStore {
    pub fn connect(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        let mut transport = ReqwestTransport::new(&config.base_url("localhost", 19530), config.timeout())?;
        if let Some(token) = &config.api_key {
            transport = transport.with_header("Authorization", format!("Bearer {token}"));
        }
        Ok(Self::with_transport(config, Box::new(transport), embedder)?)
    }

    pub fn with_transport(
        config: &BackendConfig,
        transport: Box<dyn HttpTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            collection: config.collection_name.clone(),
            transport,
            embedder,
        };
        store.ensure_collection()?;
        Ok(store)
    }

    fn call(&self, endpoint: &str, mut body: Value) -> Result<Value, StoreError> {
        body["collectionName"] = json!(self.collection);
        let parsed = self
            .transport
            .send(Method::POST, &format!("/v2/vectordb/{endpoint}"), Some(&body))?
            .into_success(BACKEND, endpoint)?;

        match parsed.pointer("/code").and_then(Value::as_i64) {
            Some(0) => Ok(parsed),
            code => Err(StoreError::backend(
                BACKEND,
                format!(
                    "{endpoint} failed with code {}: {}",
                    code.unwrap_or(-1),
                    str_at(&parsed, "/message")
                ),
            )),
        }
    }

    fn ensure_collection(&self) -> Result<(), StoreError> {
        let has = self.call("collections/has", json!({}))?;
        if !has.pointer("/data/has").and_then(Value::as_bool).unwrap_or(false) {
            self.create_collection()?;
        }
        self.call("collections/load", json!({}))?;
        Ok(())
    }

    fn create_collection(&self) -> Result<(), StoreError> {
        let schema = json!({
            "autoId": true,
            "enableDynamicField": false,
            "fields": [
                { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                { "fieldName": "text", "dataType": "VarChar", "elementTypeParams": { "max_length": 65535 } },
                { "fieldName": "source", "dataType": "VarChar", "elementTypeParams": { "max_length": 255 } },
                { "fieldName": "metadata_json", "dataType": "VarChar", "elementTypeParams": { "max_length": 65535 } },
                {
                    "fieldName": "vector",
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": self.embedder.dimensions() },
                },
            ],
        });
        let index = json!([{
            "fieldName": "vector",
            "indexName": "vector",
            "metricType": "L2",
            "indexType": "IVF_FLAT",
            "params": { "nlist": NLIST },
        }]);

        self.call("collections/create", json!({ "schema": schema, "indexParams": index }))?;
        info!(collection = %self.collection, "created milvus collection");
        Ok(())
    }

    fn entity_to_chunk(entity: &Value) -> StoredChunk {
        let metadata = metadata_from_json_str(entity.pointer("/metadata_json").and_then(Value::as_str));
        let source = entity
            .pointer("/source")
            .and_then(Value::as_str)
            .filter(|source| !source.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| metadata.source_or_unknown());
        StoredChunk {
            id: entity.pointer("/id").map(id_string),
            text: str_at(entity, "/text"),
            metadata,
            source,
        }
    }
}

/// Source values longer than the schema allows are cut on a char boundary.
fn clamp_source(source: &str) -> String {
    source.chars().take(255).collect()
}

impl VectorBackend for MilvusStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Milvus
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let embeddings = self.embedder.embed_batch(chunks);
        let rows = chunks
            .iter()
            .zip(metadata)
            .zip(embeddings)
            .map(|((text, metadata), vector)| -> Result<Value, StoreError> {
                Ok(json!({
                    "text": text,
                    "source": clamp_source(&metadata.source),
                    "metadata_json": serde_json::to_string(metadata)?,
                    "vector": vector,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let parsed = self.call("entities/insert", json!({ "data": rows }))?;
        let inserted = parsed
            .pointer("/data/insertCount")
            .and_then(Value::as_u64)
            .map_or(rows.len(), |count| count as usize);
        debug!(count = inserted, collection = %self.collection, "inserted entities");
        Ok(inserted)
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let parsed = self.call(
            "entities/search",
            json!({
                "data": [self.embedder.embed(query)],
                "annsField": "vector",
                "limit": limit,
                "outputFields": OUTPUT_FIELDS,
                "searchParams": { "metricType": "L2", "params": { "nprobe": NPROBE } },
            }),
        )?;

        let mut hits = parsed
            .pointer("/data")
            .and_then(Value::as_array)
            .map(|entities| {
                entities
                    .iter()
                    .map(|entity| {
                        let chunk = Self::entity_to_chunk(entity);
                        let distance = entity.pointer("/distance").and_then(Value::as_f64).unwrap_or(f64::MAX);
                        SearchHit {
                            id: chunk.id.unwrap_or_default(),
                            text: chunk.text,
                            metadata: chunk.metadata,
                            score: 1.0 / (1.0 + distance),
                            source: chunk.source,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        sort_by_score_desc(&mut hits);
        Ok(hits)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < QUERY_WINDOW {
            let parsed = self.call(
                "entities/query",
                json!({
                    "filter": "id >= 0",
                    "outputFields": ["id", "text", "source", "metadata_json"],
                    "offset": offset,
                    "limit": LIST_PAGE,
                }),
            )?;
            let page = parsed
                .pointer("/data")
                .and_then(Value::as_array)
                .map(|entities| entities.iter().map(Self::entity_to_chunk).collect::<Vec<_>>())
                .unwrap_or_default();
            let full = page.len() == LIST_PAGE;
            chunks.extend(page);
            if !full {
                return Ok(chunks);
            }
            offset += LIST_PAGE;
        }

        warn!(
            collection = %self.collection,
            listed = chunks.len(),
            window = QUERY_WINDOW,
            "milvus query window reached, listing may be truncated"
        );
        Ok(chunks)
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let Ok(id) = id.trim().parse::<i64>() else {
            return Ok(false);
        };
        let filter = format!("id == {id}");
        let existing = self.call(
            "entities/query",
            json!({ "filter": filter, "outputFields": ["id"], "limit": 1 }),
        )?;
        let found = existing
            .pointer("/data")
            .and_then(Value::as_array)
            .is_some_and(|rows| !rows.is_empty());
        if !found {
            return Ok(false);
        }
        self.call("entities/delete", json!({ "filter": filter }))?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.call("collections/drop", json!({}))?;
        self.create_collection()?;
        self.call("collections/load", json!({}))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::testing::ScriptedTransport;

    fn ok(data: Value) -> Value {
        json!({"code": 0, "data": data})
    }

    fn connect(transport: &ScriptedTransport) -> MilvusStore {
        transport
            .reply(200, ok(json!({"has": true})))
            .reply(200, ok(json!({})));
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new("test", 8));
        MilvusStore::with_transport(&BackendConfig::new("milvus"), transport.boxed(), embedder).unwrap()
    }

    #[test]
    fn missing_collection_gets_ivf_flat_index() {
        let transport = ScriptedTransport::new();
        transport
            .reply(200, ok(json!({"has": false})))
            .reply(200, ok(json!({})))
            .reply(200, ok(json!({})));
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new("test", 8));
        MilvusStore::with_transport(&BackendConfig::new("milvus"), transport.boxed(), embedder).unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].path, "/v2/vectordb/collections/create");
        let body = requests[1].body.clone().unwrap();
        assert_eq!(body["collectionName"], "pdf_chunks");
        assert_eq!(body["schema"]["autoId"], true);
        assert_eq!(body["schema"]["fields"][4]["elementTypeParams"]["dim"], 8);
        assert_eq!(body["indexParams"][0]["indexType"], "IVF_FLAT");
        assert_eq!(requests[2].path, "/v2/vectordb/collections/load");
    }

    #[test]
    fn nonzero_code_is_an_error() {
        let transport = ScriptedTransport::new();
        let mut store = connect(&transport);
        transport.reply(200, json!({"code": 1100, "message": "dim mismatch"}));

        let error = store
            .insert(&["alpha".to_string()], &[ChunkMetadata::default()])
            .unwrap_err();
        assert!(error.to_string().contains("dim mismatch"));
    }

    #[test]
    fn search_inverts_l2_distance() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        transport.reply(
            200,
            ok(json!([
                {"id": 11, "distance": 3.0, "text": "far", "source": "a.pdf", "metadata_json": "{}"},
                {"id": 12, "distance": 0.0, "text": "exact", "source": "b.pdf", "metadata_json": "{}"}
            ])),
        );

        let hits = store.query("exact", 2).unwrap();
        assert_eq!(hits[0].id, "12");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!((hits[1].score - 0.25).abs() < 1e-9);
        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["searchParams"]["params"]["nprobe"], 10);
    }

    #[test]
    fn list_queries_every_entity() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        transport.reply(
            200,
            ok(json!([{"id": 1, "text": "one", "source": "", "metadata_json": "{\"source\": \"m.pdf\"}"}])),
        );

        let chunks = store.list().unwrap();
        assert_eq!(chunks[0].id.as_deref(), Some("1"));
        assert_eq!(chunks[0].source, "m.pdf");
        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["filter"], "id >= 0");
        assert_eq!(body["offset"], 0);
    }

    fn full_page(first_id: usize) -> Value {
        let rows = (first_id..first_id + LIST_PAGE)
            .map(|id| json!({"id": id, "text": "t", "source": "a.pdf", "metadata_json": "{}"}))
            .collect::<Vec<_>>();
        ok(Value::Array(rows))
    }

    #[test]
    fn list_pages_until_a_short_page() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        transport
            .reply(200, full_page(1))
            .reply(200, ok(json!([{"id": 5000, "text": "last", "source": "b.pdf", "metadata_json": "{}"}])));

        let chunks = store.list().unwrap();
        assert_eq!(chunks.len(), LIST_PAGE + 1);
        assert_eq!(chunks[LIST_PAGE].text, "last");
        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["offset"], LIST_PAGE);
    }

    #[test]
    fn list_stops_at_the_query_window() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        let setup_requests = transport.requests().len();
        for page in 0..QUERY_WINDOW / LIST_PAGE + 1 {
            transport.reply(200, full_page(page * LIST_PAGE));
        }

        let chunks = store.list().unwrap();
        assert_eq!(chunks.len(), QUERY_WINDOW);
        let requests = transport.requests();
        assert_eq!(requests.len() - setup_requests, QUERY_WINDOW / LIST_PAGE);
        let last = requests.last().unwrap().body.clone().unwrap();
        assert_eq!(last["offset"].as_u64().unwrap() as usize + LIST_PAGE, QUERY_WINDOW);
    }

    #[test]
    fn delete_handles_unknown_and_non_numeric_ids() {
        let transport = ScriptedTransport::new();
        let mut store = connect(&transport);
        assert!(!store.remove("abc").unwrap());

        transport.reply(200, ok(json!([])));
        assert!(!store.remove("7").unwrap());

        transport.reply(200, ok(json!([{"id": 7}]))).reply(200, ok(json!({})));
        assert!(store.remove("7").unwrap());
        let request = transport.last_request().unwrap();
        assert_eq!(request.path, "/v2/vectordb/entities/delete");
        assert_eq!(request.body.unwrap()["filter"], "id == 7");
    }

    #[test]
    fn long_sources_are_clamped() {
        assert_eq!(clamp_source(&"é".repeat(300)).chars().count(), 255);
        assert_eq!(clamp_source("a.pdf"), "a.pdf");
    }
}
