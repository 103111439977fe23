use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use shared::models::actions::{ActionResult, ClientAction, ClientRequest, LegalMoveMap};
use shared::models::events::{ClockSnapshot, GameEvent};
use shared::models::game::{Color, Game, GamePhase};
use shared::models::move_record::MoveRecord;
use shared::services::ban_protocol::BanProtocol;
use shared::services::chess_service::ChessService;
use shared::services::clock_service::ClockService;
use shared::services::time_provider::{SystemTimeProvider, TimeProvider};

use crate::clock::{ClockDisplay, ClockPredictor};
use crate::config::ClientConfig;
use crate::errors::{SyncError, TransportError};
use crate::history::{HistoryStep, Navigator, StepPhase};
use crate::scheduler::{ScheduledTask, TaskControl};
use crate::sync::{ActionState, Reconciliation, SyncLayer};
use crate::transport::{new_request_id, GameTransport, Subscription, WebSocketTransport};

/// Everything a UI needs to render the open game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameView {
    /// Authoritative record with this client's unconfirmed action applied.
    pub game: Game,
    pub phase: GamePhase,
    pub color: Option<Color>,
    pub action_state: ActionState,
    pub clock: ClockDisplay,
    pub history: HistoryStep,
    /// True while the real-time channel is down and the game is refetched
    /// periodically instead.
    pub polling: bool,
    pub last_error: Option<SyncError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    First,
    Previous,
    Next,
    Last,
    Jump { ply: u32, phase: StepPhase },
}

struct OpenGame {
    player_id: String,
    sync: SyncLayer,
    clock: ClockPredictor,
    history: Navigator,
    time: Arc<dyn TimeProvider>,
    polling: bool,
    last_error: Option<SyncError>,
    /// Set once a predicted flag has been reported; cleared on every resync.
    flag_reported: bool,
}

impl OpenGame {
    fn new(config: &ClientConfig, sync: SyncLayer, time: Arc<dyn TimeProvider>) -> Self {
        let clock = ClockPredictor::from_game(time.clone(), sync.view()).with_intervals(
            config.tick_interval,
            config.fast_tick_interval,
            config.fast_tick_threshold,
        );
        let history = Navigator::from_game(sync.view(), sync.moves());
        OpenGame {
            player_id: config.player_id.clone(),
            sync,
            clock,
            history,
            time,
            polling: false,
            last_error: None,
            flag_reported: false,
        }
    }

    /// Brings the clock and history in line with the view after it changed.
    /// A pushed snapshot is preferred; otherwise the clock is derived from
    /// the record itself.
    fn resync(&mut self, pushed: Option<&ClockSnapshot>) {
        let view = self.sync.view();
        let snapshot = match pushed {
            Some(snapshot) if self.sync.pending().is_none() => snapshot.clone(),
            _ => ClockSnapshot::from_game(view, self.time.now_millis()),
        };
        self.clock.sync(snapshot, view.is_active());
        self.flag_reported = false;
        self.history.rebuild(view, self.sync.moves());
    }

    fn record(&mut self, reconciliation: &Reconciliation, pushed: Option<&ClockSnapshot>) {
        if let Reconciliation::RolledBack { error, .. } = reconciliation {
            self.last_error = Some(error.clone());
        }
        if *reconciliation != Reconciliation::Ignored {
            self.resync(pushed);
        }
    }

    fn view(&self) -> GameView {
        let game = self.sync.view().clone();
        GameView {
            phase: game.phase(),
            color: game.color_of(&self.player_id),
            game,
            action_state: self.sync.state().clone(),
            clock: self.clock.display(),
            history: self.history.current().clone(),
            polling: self.polling,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Default)]
struct Tasks {
    events: Option<ScheduledTask>,
    ticker: Option<ScheduledTask>,
    poller: Option<ScheduledTask>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn GameTransport>,
    protocol: BanProtocol,
    time: Arc<dyn TimeProvider>,
    session: Mutex<Option<OpenGame>>,
    tasks: Mutex<Tasks>,
    views: watch::Sender<Option<GameView>>,
}

fn expect_game(result: ActionResult) -> Result<Game, SyncError> {
    match result {
        ActionResult::Game { game } => Ok(game),
        ActionResult::Error { category, message } => {
            Err(SyncError::from_category(category, message))
        }
        other => Err(TransportError::UnexpectedResponse(format!("{:?}", other)).into()),
    }
}

fn expect_moves(result: ActionResult) -> Result<Vec<MoveRecord>, SyncError> {
    match result {
        ActionResult::Moves { moves } => Ok(moves),
        ActionResult::Error { category, message } => {
            Err(SyncError::from_category(category, message))
        }
        other => Err(TransportError::UnexpectedResponse(format!("{:?}", other)).into()),
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Option<OpenGame>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_open<R>(&self, f: impl FnOnce(&mut OpenGame) -> R) -> Result<R, SyncError> {
        self.session().as_mut().map(f).ok_or(SyncError::NoOpenGame)
    }

    fn open_game_id(&self) -> Result<String, SyncError> {
        self.with_open(|open| open.sync.game_id().to_string())
    }

    fn is_open(&self, game_id: &str) -> bool {
        self.open_game_id().is_ok_and(|open| open == game_id)
    }

    fn publish(&self) -> Option<GameView> {
        let view = self.session().as_ref().map(OpenGame::view);
        self.views.send_replace(view.clone());
        view
    }

    async fn request(
        &self,
        game_id: &str,
        action: ClientAction,
    ) -> Result<ActionResult, TransportError> {
        let request = ClientRequest::new(&new_request_id(), game_id, action);
        debug!("Sending {} for {}", request.action.name(), game_id);
        self.transport.request(request).await
    }

    fn absorb(&self, result: &ActionResult) -> Reconciliation {
        let Some(game) = result.game() else {
            return Reconciliation::Ignored;
        };
        self.with_open(|open| {
            let reconciliation = open.sync.on_snapshot(game.clone());
            open.record(&reconciliation, None);
            reconciliation
        })
        .unwrap_or(Reconciliation::Ignored)
    }

    async fn refetch_moves(&self) {
        let Ok(game_id) = self.open_game_id() else {
            return;
        };
        let fetched = match self.request(&game_id, ClientAction::GetMoves).await {
            Ok(result) => expect_moves(result),
            Err(e) => Err(e.into()),
        };
        match fetched {
            Ok(moves) => {
                let _ = self.with_open(|open| {
                    if open.sync.game_id() == game_id {
                        open.sync.set_moves(moves);
                        open.history.rebuild(open.sync.view(), open.sync.moves());
                    }
                });
            }
            Err(e) => warn!("Could not refetch moves for {}: {}", game_id, e),
        }
    }

    /// Reloads the record after a rejection that means our copy is stale.
    async fn refresh_game(&self) -> Reconciliation {
        let Ok(game_id) = self.open_game_id() else {
            return Reconciliation::Ignored;
        };
        match self.request(&game_id, ClientAction::GetGame).await {
            Ok(result) => self.absorb(&result),
            Err(e) => {
                warn!("Could not reload {}: {}", game_id, e);
                Reconciliation::Ignored
            }
        }
    }

    async fn finish(&self, reconciliation: &Reconciliation) {
        let mut refetch = reconciliation.needs_refetch();
        if let Reconciliation::RolledBack { error, .. } = reconciliation {
            if error.requires_refresh() {
                refetch |= self.refresh_game().await.needs_refetch();
            }
        }
        if refetch {
            self.refetch_moves().await;
        }
        self.publish();
    }

    async fn on_event(&self, event: GameEvent) {
        let reconciliation = self.with_open(|open| {
            let reconciliation = open.sync.on_event(&event);
            open.record(&reconciliation, Some(event.clock()));
            reconciliation
        });
        if let Ok(reconciliation) = reconciliation {
            debug!("{} event reconciled as {:?}", event.kind(), reconciliation);
            self.finish(&reconciliation).await;
        }
    }

    fn start_events(self: &Arc<Self>, mut events: mpsc::Receiver<GameEvent>) {
        let weak = Arc::downgrade(self);
        let task = ScheduledTask::spawn(move |token| async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    event = events.recv() => event,
                };
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    Some(event) => inner.on_event(event).await,
                    None => {
                        warn!("Event stream ended, falling back to polling");
                        inner.start_polling();
                        return;
                    }
                }
            }
        });
        self.tasks().events = Some(task);
    }

    fn start_polling(self: &Arc<Self>) {
        let started = self.with_open(|open| open.polling = true).is_ok();
        if !started {
            return;
        }
        let weak = Arc::downgrade(self);
        let task = ScheduledTask::every(self.config.poll_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.poll_once().await,
                    None => TaskControl::Stop,
                }
            }
        });
        self.tasks().poller = Some(task);
        self.publish();
    }

    /// One polling round: try to get back onto the real-time channel, and
    /// refetch the record if that fails.
    async fn poll_once(self: &Arc<Self>) -> TaskControl {
        let Ok(game_id) = self.open_game_id() else {
            return TaskControl::Stop;
        };

        match self.transport.subscribe(&game_id).await {
            Ok(Subscription { snapshot, events }) if self.is_open(&game_id) => {
                info!("Resubscribed to {}", game_id);
                let reconciliation = self.absorb(&snapshot);
                let _ = self.with_open(|open| open.polling = false);
                self.start_events(events);
                self.refetch_moves().await;
                self.finish(&reconciliation).await;
                return TaskControl::Stop;
            }
            Ok(_) => return TaskControl::Stop,
            Err(e) => debug!("Resubscribe to {} failed: {}", game_id, e),
        }

        match self.request(&game_id, ClientAction::GetGame).await {
            Ok(result) => {
                let reconciliation = self.absorb(&result);
                self.finish(&reconciliation).await;
            }
            Err(e) => debug!("Poll of {} failed: {}", game_id, e),
        }
        TaskControl::Continue
    }

    fn start_ticker(self: &Arc<Self>) {
        let delay_source = Arc::downgrade(self);
        let tick_source = delay_source.clone();
        let fallback = self.config.tick_interval;
        let task = ScheduledTask::adaptive(
            move || {
                delay_source
                    .upgrade()
                    .and_then(|inner| inner.with_open(|open| open.clock.next_tick()).ok())
                    .unwrap_or(fallback)
            },
            move || {
                let weak = tick_source.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.tick().await,
                        None => TaskControl::Stop,
                    }
                }
            },
        );
        self.tasks().ticker = Some(task);
    }

    /// Republishes the predicted clocks. When a clock is predicted to have
    /// run out the server is asked once to check; only its answer ends the
    /// game.
    async fn tick(&self) -> TaskControl {
        let due = self.with_open(|open| {
            let flagged = open.clock.predicted_flag();
            let due = flagged.is_some() && !open.flag_reported;
            if due {
                open.flag_reported = true;
            }
            (due, open.sync.game_id().to_string())
        });
        let Ok((due, game_id)) = due else {
            return TaskControl::Stop;
        };
        self.publish();

        if due {
            info!("Clock predicted to have run out in {}, asking the server", game_id);
            match self.request(&game_id, ClientAction::CheckTime).await {
                Ok(result) => {
                    let reconciliation = self.absorb(&result);
                    self.finish(&reconciliation).await;
                }
                Err(e) => warn!("Time check for {} failed: {}", game_id, e),
            }
        }
        TaskControl::Continue
    }

    /// Sends an action that was already applied optimistically and
    /// reconciles the outcome.
    async fn send_pending(
        self: &Arc<Self>,
        game_id: &str,
        request_id: &str,
        action: ClientAction,
    ) -> Result<GameView, SyncError> {
        let request = ClientRequest::new(request_id, game_id, action);
        let reconciliation = match self.transport.request(request).await {
            Ok(result) => self.with_open(|open| {
                let reconciliation = open.sync.on_response(request_id, &result);
                open.record(&reconciliation, None);
                reconciliation
            })?,
            Err(e) => {
                warn!("Request {} was not delivered: {}", request_id, e);
                let error = SyncError::from(e);
                let reconciliation = self.with_open(|open| {
                    let reconciliation = open.sync.abandon(request_id, error.clone());
                    open.record(&reconciliation, None);
                    reconciliation
                })?;
                self.start_polling();
                self.finish(&reconciliation).await;
                return Err(error);
            }
        };

        self.finish(&reconciliation).await;
        // an event may have rolled the action back before its response arrived
        let rolled_back = self.with_open(|open| match open.sync.state() {
            ActionState::RolledBack { request_id: id, error } if id == request_id => {
                Some(error.clone())
            }
            _ => None,
        })?;
        match rolled_back {
            Some(error) => Err(error),
            None => self.publish().ok_or(SyncError::NoOpenGame),
        }
    }

    /// Sends an action that is only shown once the server accepts it.
    async fn send_confirmed(&self, action: ClientAction) -> Result<ActionResult, SyncError> {
        let game_id = self.open_game_id()?;
        let result = self.request(&game_id, action).await?;
        if let ActionResult::Error { category, message } = &result {
            let error = SyncError::from_category(*category, message.clone());
            let _ = self.with_open(|open| open.last_error = Some(error.clone()));
            self.publish();
            return Err(error);
        }
        Ok(result)
    }
}

/// Client side of one player's session. Holds at most one open game, keeps
/// its view current from pushed events (or polling while the channel is
/// down) and applies the player's own moves and bans before the server
/// confirms them.
///
/// Background tasks only hold weak references, so dropping the last clone
/// of the client stops them.
#[derive(Clone)]
pub struct GameClient {
    inner: Arc<Inner>,
}

impl GameClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn GameTransport>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let protocol = BanProtocol::new(ChessService::new(), ClockService::new(time.clone()));
        let (views, _) = watch::channel(None);
        GameClient {
            inner: Arc::new(Inner {
                config,
                transport,
                protocol,
                time,
                session: Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
                views,
            }),
        }
    }

    /// Connects over websocket using the system clock.
    pub async fn connect(config: ClientConfig) -> Result<Self, SyncError> {
        let transport = WebSocketTransport::connect(&config).await?;
        Ok(GameClient::new(
            config,
            Arc::new(transport),
            Arc::new(SystemTimeProvider),
        ))
    }

    pub fn player_id(&self) -> &str {
        &self.inner.config.player_id
    }

    /// Receives a new view after every change, including clock ticks.
    pub fn watch(&self) -> watch::Receiver<Option<GameView>> {
        self.inner.views.subscribe()
    }

    pub fn view(&self) -> Option<GameView> {
        self.inner.session().as_ref().map(OpenGame::view)
    }

    /// Opens `game_id`, closing whatever was open before. Falls back to
    /// polling when the subscription cannot be made.
    pub async fn open(&self, game_id: &str) -> Result<GameView, SyncError> {
        self.close().await;
        let inner = &self.inner;

        let (game, events) = match inner.transport.subscribe(game_id).await {
            Ok(Subscription { snapshot, events }) => (expect_game(snapshot)?, Some(events)),
            Err(e) => {
                warn!("Subscribe to {} failed, polling instead: {}", game_id, e);
                let snapshot = inner.request(game_id, ClientAction::GetGame).await?;
                (expect_game(snapshot)?, None)
            }
        };
        let moves = expect_moves(inner.request(game_id, ClientAction::GetMoves).await?)?;

        let mut sync = SyncLayer::new(&inner.config.player_id, inner.protocol.clone(), game);
        sync.set_moves(moves);
        *inner.session() = Some(OpenGame::new(&inner.config, sync, inner.time.clone()));
        info!("Opened game {}", game_id);

        match events {
            Some(events) => inner.start_events(events),
            None => inner.start_polling(),
        }
        inner.start_ticker();
        inner.publish().ok_or(SyncError::NoOpenGame)
    }

    pub async fn close(&self) {
        *self.inner.tasks() = Tasks::default();
        let previous = self.inner.session().take();
        self.inner.views.send_replace(None);
        if let Some(open) = previous {
            let game_id = open.sync.game_id();
            if let Err(e) = self.inner.transport.unsubscribe(game_id).await {
                debug!("Unsubscribe from {} failed: {}", game_id, e);
            }
            info!("Closed game {}", game_id);
        }
    }

    /// Plays a move. It shows immediately and is rolled back if the server
    /// rejects it or cannot be reached; illegal moves are refused locally.
    pub async fn make_move(
        &self,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<GameView, SyncError> {
        let request_id = new_request_id();
        let game_id = self.inner.with_open(|open| {
            open.sync.begin_move(&request_id, from, to, promotion)?;
            open.last_error = None;
            open.resync(None);
            Ok::<_, SyncError>(open.sync.game_id().to_string())
        })??;
        self.inner.publish();

        let action = ClientAction::MakeMove {
            from: from.to_string(),
            to: to.to_string(),
            promotion: promotion.map(str::to_string),
        };
        self.inner.send_pending(&game_id, &request_id, action).await
    }

    pub async fn ban_move(&self, from: &str, to: &str) -> Result<GameView, SyncError> {
        let request_id = new_request_id();
        let game_id = self.inner.with_open(|open| {
            open.sync.begin_ban(&request_id, from, to)?;
            open.last_error = None;
            open.resync(None);
            Ok::<_, SyncError>(open.sync.game_id().to_string())
        })??;
        self.inner.publish();

        let action = ClientAction::BanMove {
            from: from.to_string(),
            to: to.to_string(),
        };
        self.inner.send_pending(&game_id, &request_id, action).await
    }

    async fn act(&self, action: ClientAction) -> Result<GameView, SyncError> {
        let result = self.inner.send_confirmed(action).await?;
        let reconciliation = self.inner.absorb(&result);
        self.inner.finish(&reconciliation).await;
        self.inner.publish().ok_or(SyncError::NoOpenGame)
    }

    pub async fn resign(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::Resign).await
    }

    pub async fn offer_draw(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::OfferDraw).await
    }

    pub async fn accept_draw(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::AcceptDraw).await
    }

    pub async fn decline_draw(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::DeclineDraw).await
    }

    pub async fn offer_rematch(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::OfferRematch).await
    }

    pub async fn decline_rematch(&self) -> Result<GameView, SyncError> {
        self.act(ClientAction::DeclineRematch).await
    }

    /// Accepts the opponent's rematch offer and returns the new game, which
    /// the caller can `open`.
    pub async fn accept_rematch(&self) -> Result<Game, SyncError> {
        let rematch = expect_game(self.inner.send_confirmed(ClientAction::AcceptRematch).await?)?;
        if let Err(e) = self.refresh().await {
            debug!("Refresh after rematch failed: {}", e);
        }
        Ok(rematch)
    }

    /// Refetches the record and move list.
    pub async fn refresh(&self) -> Result<GameView, SyncError> {
        let result = self.inner.send_confirmed(ClientAction::GetGame).await?;
        let reconciliation = self.inner.absorb(&result);
        self.inner.refetch_moves().await;
        self.inner.finish(&reconciliation).await;
        self.inner.publish().ok_or(SyncError::NoOpenGame)
    }

    /// Moves this player could act on right now: own moves while moving, the
    /// opponent's candidates while banning.
    pub async fn legal_moves(&self) -> Result<LegalMoveMap, SyncError> {
        match self.inner.send_confirmed(ClientAction::GetLegalMoves).await? {
            ActionResult::LegalMoves { moves } => Ok(moves),
            other => Err(TransportError::UnexpectedResponse(format!("{:?}", other)).into()),
        }
    }

    pub fn navigate(&self, to: Navigation) -> Result<HistoryStep, SyncError> {
        let step = self.inner.with_open(|open| match to {
            Navigation::First => Some(open.history.first().clone()),
            Navigation::Previous => Some(open.history.previous().clone()),
            Navigation::Next => Some(open.history.next().clone()),
            Navigation::Last => Some(open.history.last().clone()),
            Navigation::Jump { ply, phase } => open.history.jump_to(ply, phase).cloned(),
        })?;
        self.inner.publish();
        step.ok_or_else(|| SyncError::NotFound("no such position in the history".to_string()))
    }
}
