use crate::completion::handle_completion;
use crate::config::ServerConfig;
use crate::diagnostics::validate_document;
use crate::document::DocumentStore;
use crate::hover::handle_hover;
use crate::schema::SchemaStore;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info};

const DEBOUNCE_MS: u64 = 300;

pub struct Backend {
    client: Client,
    documents: Arc<DocumentStore>,
    schemas: Arc<SchemaStore>,
    /// Replaced wholesale at initialization; handlers read a snapshot so a
    /// reconfiguration never tears an in-flight request.
    config: Arc<RwLock<Arc<ServerConfig>>>,
    pending_diagnostics: Arc<DashMap<Url, JoinHandle<()>>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(DocumentStore::new()),
            schemas: Arc::new(SchemaStore::new()),
            config: Arc::new(RwLock::new(Arc::new(ServerConfig::default()))),
            pending_diagnostics: Arc::new(DashMap::new()),
        }
    }

    fn config_snapshot(&self) -> Arc<ServerConfig> {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn schedule_diagnostics(&self, uri: Url) {
        // Abort any in-flight diagnostic task for this document
        if let Some((_, handle)) = self.pending_diagnostics.remove(&uri) {
            handle.abort();
        }

        let client = self.client.clone();
        let documents = self.documents.clone();
        let schemas = self.schemas.clone();
        let config = self.config_snapshot();
        let pending = self.pending_diagnostics.clone();
        let task_uri = uri.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(DEBOUNCE_MS)).await;

            let diagnostics = validate_document(&task_uri, &documents, &schemas, &config)
                .await
                .unwrap_or_default();

            client
                .publish_diagnostics(task_uri.clone(), diagnostics, None)
                .await;

            pending.remove(&task_uri);
        });

        self.pending_diagnostics.insert(uri, handle);
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let config = params
            .initialization_options
            .map(ServerConfig::from_value)
            .unwrap_or_default();

        info!("landofile-ls initializing with config: {config:?}");

        if let Ok(mut slot) = self.config.write() {
            *slot = Arc::new(config);
        }

        // Prefetch and flatten the schema eagerly so it is ready before the
        // first hover or completion request.
        if let Some(source) = self.config_snapshot().schema_source() {
            let schemas = self.schemas.clone();
            tokio::spawn(async move {
                let _ = schemas.get_or_load(&source).await;
            });
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "landofile-ls".into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![":".into(), "-".into()]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("landofile-ls server ready");
        self.client
            .log_message(MessageType::INFO, "landofile-ls initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        // Abort all pending diagnostic tasks
        for entry in self.pending_diagnostics.iter() {
            entry.value().abort();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        let version = params.text_document.version;
        let text = params.text_document.text;

        debug!("did_open: {uri}");
        self.documents.open(uri.clone(), version, text);
        self.schedule_diagnostics(uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        let version = params.text_document.version;

        debug!("did_change: {uri} v{version}");

        if let Err(e) = self.documents.update(&uri, version, params.content_changes) {
            self.client
                .log_message(
                    MessageType::ERROR,
                    format!("Failed to update document: {e}"),
                )
                .await;
            return;
        }

        self.schedule_diagnostics(uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = &params.text_document.uri;
        debug!("did_close: {uri}");

        // Clear pending diagnostics
        if let Some((_, handle)) = self.pending_diagnostics.remove(uri) {
            handle.abort();
        }

        self.documents.close(uri);

        // Clear diagnostics for closed file
        self.client
            .publish_diagnostics(uri.clone(), vec![], None)
            .await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let config = self.config_snapshot();
        Ok(handle_hover(&self.documents, &self.schemas, &config, params).await)
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let config = self.config_snapshot();
        Ok(handle_completion(&self.documents, &self.schemas, &config, params).await)
    }
}
