pub mod events;
pub mod group;
pub mod matching;
pub mod quiz;
pub mod registry;
pub mod store;
pub mod timers;
pub mod tod;

use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::{
        models::{GroupSessionEntity, QuizSessionEntity, TodGameEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
    gateways::{
        ContentCatalog, ContentProvider, HubMessenger, LedgerGateway, MemoryRooms,
        MessagingGateway, OpenPrompts, RoomDirectory, StoreLedger,
    },
    services::dispatch::Dispatcher,
};

use self::{
    events::EventHub,
    registry::SessionRegistry,
    store::StoreSlot,
    timers::{SearchTasks, TimerSet},
};

pub type SharedState = Arc<AppState>;

/// Capacity of the per-user event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Central application state: configuration, gateways, live-session caches and timers.
pub struct AppState {
    config: AppConfig,
    store: StoreSlot,
    ledger: Arc<dyn LedgerGateway>,
    messenger: Arc<dyn MessagingGateway>,
    prompts: OpenPrompts,
    rooms: Arc<dyn RoomDirectory>,
    content: Arc<dyn ContentProvider>,
    events: Arc<EventHub>,
    quiz_sessions: SessionRegistry<QuizSessionEntity>,
    tod_games: SessionRegistry<TodGameEntity>,
    group_sessions: SessionRegistry<GroupSessionEntity>,
    timers: TimerSet,
    searches: SearchTasks,
    degraded: watch::Sender<bool>,
    dispatcher: OnceLock<Dispatcher>,
}

/// Assembles an [`AppState`], defaulting every gateway to its in-process implementation.
pub struct AppStateBuilder {
    config: AppConfig,
    store: Option<Arc<dyn SessionStore>>,
    messenger: Option<Arc<dyn MessagingGateway>>,
    rooms: Option<Arc<dyn RoomDirectory>>,
    content: Option<Arc<dyn ContentProvider>>,
}

impl AppStateBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn messenger(mut self, messenger: Arc<dyn MessagingGateway>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn rooms(mut self, rooms: Arc<dyn RoomDirectory>) -> Self {
        self.rooms = Some(rooms);
        self
    }

    pub fn content(mut self, content: Arc<dyn ContentProvider>) -> Self {
        self.content = Some(content);
        self
    }

    /// Build the state. Without a store the application starts in degraded mode.
    pub fn build(self) -> SharedState {
        let degraded_now = self.store.is_none();
        let store = match self.store {
            Some(store) => StoreSlot::with_store(store),
            None => StoreSlot::default(),
        };
        let events = Arc::new(EventHub::new(EVENT_CAPACITY));
        let (degraded, _rx) = watch::channel(degraded_now);

        Arc::new(AppState {
            ledger: Arc::new(StoreLedger::new(store.clone())),
            messenger: self
                .messenger
                .unwrap_or_else(|| Arc::new(HubMessenger::new(events.clone()))),
            prompts: OpenPrompts::new(),
            rooms: self.rooms.unwrap_or_else(|| Arc::new(MemoryRooms::new())),
            content: self
                .content
                .unwrap_or_else(|| Arc::new(ContentCatalog::default())),
            config: self.config,
            store,
            events,
            quiz_sessions: SessionRegistry::new(),
            tod_games: SessionRegistry::new(),
            group_sessions: SessionRegistry::new(),
            timers: TimerSet::new(),
            searches: SearchTasks::new(),
            degraded,
            dispatcher: OnceLock::new(),
        })
    }
}

impl AppState {
    pub fn builder(config: AppConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            store: None,
            messenger: None,
            rooms: None,
            content: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        self.store.get().await
    }

    /// Current session store, or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.store.get().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        self.store.install(store).await;
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        self.store.clear().await;
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerGateway> {
        &self.ledger
    }

    pub fn messenger(&self) -> &Arc<dyn MessagingGateway> {
        &self.messenger
    }

    /// Turn prompts still carrying controls.
    pub fn prompts(&self) -> &OpenPrompts {
        &self.prompts
    }

    pub fn rooms(&self) -> &Arc<dyn RoomDirectory> {
        &self.rooms
    }

    pub fn content(&self) -> &Arc<dyn ContentProvider> {
        &self.content
    }

    /// Broadcast hub feeding the per-user event streams.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn quiz_sessions(&self) -> &SessionRegistry<QuizSessionEntity> {
        &self.quiz_sessions
    }

    pub fn tod_games(&self) -> &SessionRegistry<TodGameEntity> {
        &self.tod_games
    }

    pub fn group_sessions(&self) -> &SessionRegistry<GroupSessionEntity> {
        &self.group_sessions
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn searches(&self) -> &SearchTasks {
        &self.searches
    }

    /// Dispatcher routing commands to the per-user workers, once started.
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.get()
    }

    /// Attach the dispatcher. Returns `false` if one was already attached.
    pub fn install_dispatcher(&self, dispatcher: Dispatcher) -> bool {
        self.dispatcher.set(dispatcher).is_ok()
    }
}
