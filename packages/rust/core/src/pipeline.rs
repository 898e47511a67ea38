//! The `Book` entity: bootstrap → session → initial sync → live updates.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use spacebook_crawler::{BatchDownloader, DownloadProgress, DownloadReport};
use spacebook_discovery::{BootstrapState, RetryFetcher};
use spacebook_shared::{
    BookConfig, BookId, PublishedBook, Result, RevisionPayload, SpaceInfo, SpacebookError,
};
use spacebook_transport::{Connector, SessionHandle, SessionState, WsConnector};

use crate::assets::AssetTable;
use crate::toc::{self, IndexOptions};
use crate::update::{BookEvent, UpdateWatcher};

const BOOK_EVENT_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Everything needed to rebuild a generation from the live session.
#[derive(Debug, Clone)]
pub(crate) struct SyncContext {
    pub id: BookId,
    pub bootstrap: BootstrapState,
    pub options: IndexOptions,
    pub timeout: Option<Duration>,
}

impl SyncContext {
    pub(crate) async fn fetch_info(&self, session: &SessionHandle) -> Result<SpaceInfo> {
        self.query(session, &self.bootstrap.info_path()).await
    }

    /// Fetch info and the primary revision, then build a complete generation
    /// off to the side.
    pub(crate) async fn sync(&self, session: &SessionHandle) -> Result<PublishedBook> {
        let info = self.fetch_info(session).await?;
        self.sync_with(session, info).await
    }

    /// Build a generation for the revision `info` points at.
    pub(crate) async fn sync_with(
        &self,
        session: &SessionHandle,
        info: SpaceInfo,
    ) -> Result<PublishedBook> {
        let revision_path = self.bootstrap.revision_path(&info.primary_revision);
        let payload: RevisionPayload = self.query(session, &revision_path).await?;
        let built = toc::build_index(&payload.content, &self.options)?;

        Ok(PublishedBook {
            id: self.id.clone(),
            updated_at: info.updated_at(),
            revision: info.primary_revision,
            name: info.name,
            cover: info.cover,
            index: built.index,
            assets: built.assets,
        })
    }

    async fn query<T: DeserializeOwned>(&self, session: &SessionHandle, path: &str) -> Result<T> {
        let payload = spacebook_transport::query(path);
        let response = match self.timeout {
            Some(limit) => session.request_timeout(payload, limit).await?,
            None => session.request(payload).await?,
        };
        serde_json::from_value(response.data)
            .map_err(|e| SpacebookError::parse(format!("{path}: unexpected payload: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

/// One open book: a live session, the current generation and its watcher.
pub struct Book {
    config: BookConfig,
    context: SyncContext,
    fetcher: RetryFetcher,
    session: SessionHandle,
    published: watch::Receiver<Arc<PublishedBook>>,
    events: broadcast::Sender<BookEvent>,
    watcher: JoinHandle<()>,
}

impl Book {
    /// Open the book behind `config.entry_url` over a websocket session.
    pub async fn open(config: BookConfig) -> Result<Self> {
        Self::open_with(config, RetryFetcher::new()?, WsConnector).await
    }

    /// Open with an explicit fetcher and socket connector.
    ///
    /// Any failure before the first generation is published aborts the open.
    #[instrument(skip_all, fields(url = %config.entry_url))]
    pub async fn open_with<C: Connector>(
        config: BookConfig,
        fetcher: RetryFetcher,
        connector: C,
    ) -> Result<Self> {
        let bootstrap =
            spacebook_discovery::bootstrap(&fetcher, &config.entry_url, &config.state_var).await?;

        let context = SyncContext {
            id: BookId::new(),
            options: IndexOptions::new(
                config.ignore.iter().cloned(),
                config.cdn_prefix.clone(),
                bootstrap.blob_base.clone(),
            ),
            bootstrap,
            timeout: config.request_timeout,
        };

        let socket_url = config.socket_url(&context.bootstrap.project_id);
        let session = SessionHandle::open(connector, socket_url);
        // Subscribe before the first sync so no push is missed while it runs.
        let session_events = session.subscribe();

        let initial = async {
            session.ready().await?;
            context.sync(&session).await
        }
        .await;
        let initial = match initial {
            Ok(book) => book,
            Err(e) => {
                session.close();
                return Err(e);
            }
        };

        info!(
            book = %context.id,
            name = %initial.name,
            revision = %initial.revision,
            nodes = spacebook_shared::count_nodes(&initial.index),
            "book opened"
        );

        let (published_tx, published) = watch::channel(Arc::new(initial));
        let (events, _) = broadcast::channel(BOOK_EVENT_CAPACITY);

        let watcher = UpdateWatcher::new(
            session.clone(),
            context.clone(),
            published_tx,
            events.clone(),
        )
        .spawn(session_events);

        Ok(Self {
            config,
            context,
            fetcher,
            session,
            published,
            events,
            watcher,
        })
    }

    pub fn id(&self) -> &BookId {
        &self.context.id
    }

    pub fn bootstrap(&self) -> &BootstrapState {
        &self.context.bootstrap
    }

    /// The generation published last. Readers never see a partial rebuild.
    pub fn current(&self) -> Arc<PublishedBook> {
        Arc::clone(&self.published.borrow())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.events.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Asset table over the current generation's raw assets.
    pub fn asset_table(&self) -> AssetTable {
        AssetTable::new(self.current().assets.clone(), self.context.options.clone())
    }

    /// Download every page body of the current generation.
    pub async fn download(&self, progress: &dyn DownloadProgress) -> (PublishedBook, DownloadReport) {
        let mut book = PublishedBook::clone(&self.current());
        let downloader = BatchDownloader::with_width(self.fetcher.clone(), self.config.concurrency);
        let report = downloader.download(&mut book.index, progress).await;
        (book, report)
    }

    /// Close the session for good and stop watching for updates.
    pub fn close(self) {
        self.session.close();
        self.watcher.abort();
        info!(book = %self.context.id, "book closed");
    }
}
