//! Two players' clients against one in-process server.

use proptest::prelude::*;
use std::sync::Arc;

use banchess_tests::{eventually, init_tracing, Harness, BLACK, START, WHITE};
use game_client::client::{GameClient, Navigation};
use game_client::errors::SyncError;
use game_client::history::StepPhase;
use game_client::sync::{ActionState, SyncLayer};
use shared::models::events::GameEvent;
use shared::models::game::{Color, EndReason, Game, GamePhase, GameResult, GameStatus, TimeControl};
use shared::models::move_request::{BanRequest, MoveRequest};
use shared::services::ban_protocol::BanProtocol;
use shared::services::chess_service::ChessService;
use shared::services::clock_service::ClockService;
use shared::services::time_provider::ManualTimeProvider;

async fn synced(clients: &[&GameClient], version: u64) {
    for client in clients {
        eventually(client, |view| view.game.version >= version).await;
    }
}

#[tokio::test]
async fn test_race_loser_rolls_back_and_winner_merges_quietly() {
    init_tracing();
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let (desktop, _) = harness.client(WHITE);
    let (phone, phone_gate) = harness.gated_client(WHITE);
    let (bob, _) = harness.client(BLACK);
    for client in [&desktop, &phone, &bob] {
        client.open(&game.game_id).await.unwrap();
    }
    bob.ban_move("e2", "e4").await.unwrap();
    synced(&[&desktop, &phone], 1).await;

    let racing = phone.clone();
    let slow_move = tokio::spawn(async move { racing.make_move("d2", "d3", None).await });
    eventually(&phone, |view| {
        matches!(view.action_state, ActionState::Pending(_)) && view.game.ply == 1
    })
    .await;

    let winner = desktop.make_move("d2", "d4", None).await.unwrap();
    assert!(matches!(winner.action_state, ActionState::Confirmed { .. }));

    let loser = eventually(&phone, |view| {
        matches!(view.action_state, ActionState::RolledBack { .. }) && view.game.version == 2
    })
    .await;
    assert!(matches!(loser.last_error, Some(SyncError::Conflict(_))));
    let loser = eventually(&phone, |view| view.history.last_move.is_some()).await;
    assert_eq!(loser.history.last_move.unwrap().san, "d4");

    phone_gate.release();
    let outcome = slow_move.await.unwrap();
    assert!(matches!(outcome, Err(SyncError::Conflict(_))));

    let moves = harness.service.get_moves(&game.game_id).await.unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].san, "d4");
}

#[tokio::test]
async fn test_clients_play_to_checkmate_and_replay() {
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let (alice, _) = harness.client(WHITE);
    let (bob, _) = harness.client(BLACK);
    alice.open(&game.game_id).await.unwrap();
    bob.open(&game.game_id).await.unwrap();

    let mut version = 0;
    let turns: [(&GameClient, Option<(&str, &str)>, (&str, &str)); 4] = [
        (&bob, None, ("a2", "a3")),
        (&alice, Some(("f2", "f3")), ("a7", "a6")),
        (&bob, Some(("e7", "e5")), ("h2", "h3")),
        (&alice, Some(("g2", "g4")), ("a7", "a6")),
    ];
    for (client, reply, ban) in turns {
        if let Some((from, to)) = reply {
            client.make_move(from, to, None).await.unwrap();
            version += 1;
        }
        client.ban_move(ban.0, ban.1).await.unwrap();
        version += 1;
        synced(&[&alice, &bob], version).await;
    }

    let mated = bob.make_move("d8", "h4", None).await.unwrap();
    assert_eq!(mated.phase, GamePhase::Finished);

    let seen = eventually(&alice, |view| view.game.status == GameStatus::Finished).await;
    assert_eq!(seen.game.result, Some(GameResult::Black));
    assert_eq!(seen.game.end_reason, Some(EndReason::Checkmate));
    assert_eq!(seen.clock.active, None);
    let seen = eventually(&alice, |view| view.history.ply == 4).await;
    assert_eq!(seen.history.last_move.unwrap().san, "Qh4#");

    let before_mate = alice
        .navigate(Navigation::Jump {
            ply: 4,
            phase: StepPhase::AfterBan,
        })
        .unwrap();
    assert_eq!(before_mate.banned_move.unwrap().uci(), "a7a6");
    let step = alice.navigate(Navigation::Previous).unwrap();
    assert_eq!((step.ply, step.phase), (3, StepPhase::AfterMove));
    assert_eq!(alice.navigate(Navigation::First).unwrap().phase, StepPhase::Start);
    assert_eq!(alice.view().unwrap().history.phase, StepPhase::Start);

    assert!(matches!(
        alice.make_move("e2", "e4", None).await,
        Err(SyncError::UnauthorizedAction(_))
    ));
}

#[tokio::test]
async fn test_polling_client_sees_draw_and_rematch() {
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let (alice, alice_transport) = harness.client(WHITE);
    let (bob, _) = harness.client(BLACK);
    alice.open(&game.game_id).await.unwrap();
    bob.open(&game.game_id).await.unwrap();

    alice_transport.set_online(false);
    eventually(&alice, |view| view.polling).await;
    alice_transport.set_online(true);
    eventually(&alice, |view| !view.polling).await;

    alice.offer_draw().await.unwrap();
    eventually(&bob, |view| view.game.draw_offered_by == Some(Color::White)).await;
    bob.accept_draw().await.unwrap();
    eventually(&alice, |view| view.game.result == Some(GameResult::Draw)).await;

    bob.offer_rematch().await.unwrap();
    eventually(&alice, |view| view.game.rematch_offered_by == Some(Color::Black)).await;
    let rematch = alice.accept_rematch().await.unwrap();

    assert_eq!(rematch.white_player_id, BLACK);
    let view = alice.open(&rematch.game_id).await.unwrap();
    assert_eq!(view.color, Some(Color::Black));
    assert_eq!(view.phase, GamePhase::AwaitingBan(Color::Black));
    let legal = alice.legal_moves().await.unwrap();
    assert_eq!(legal.values().map(Vec::len).sum::<usize>(), 20);
}

/// Events of a short game as the server published them.
fn published_events() -> (Game, Vec<GameEvent>) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let harness = Harness::new(TimeControl::default());
        let game = harness.new_game().await;
        let id = game.game_id.clone();
        let mut topic = harness.broadcaster.subscribe(&id);
        let service = &harness.service;
        let ban = |from: &str, to: &str| BanRequest::new(id.clone(), from.into(), to.into());
        let play = |from: &str, to: &str| MoveRequest::new(id.clone(), from.into(), to.into());

        service.ban_move(BLACK, &ban("e2", "e4")).await.unwrap();
        service.make_move(WHITE, &play("d2", "d4")).await.unwrap();
        service.ban_move(WHITE, &ban("d7", "d5")).await.unwrap();
        service.make_move(BLACK, &play("g8", "f6")).await.unwrap();
        service.ban_move(BLACK, &ban("c2", "c4")).await.unwrap();
        service.make_move(WHITE, &play("g1", "f3")).await.unwrap();

        let mut events = Vec::new();
        while let Ok(payload) = topic.try_recv() {
            events.push(GameEvent::from_json(&payload).unwrap());
        }
        (game, events)
    })
}

fn observer(game: Game) -> SyncLayer {
    let protocol = BanProtocol::new(
        ChessService::new(),
        ClockService::new(Arc::new(ManualTimeProvider::new(START))),
    );
    SyncLayer::new(BLACK, protocol, game)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_final_view_independent_of_event_order(
        order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let (game, events) = published_events();
        prop_assert_eq!(events.len(), 6);
        let latest = events[5].game().clone();

        let mut sync = observer(game);
        for index in order {
            sync.on_event(&events[index]);
        }

        prop_assert_eq!(sync.confirmed(), &latest);
        prop_assert_eq!(sync.view(), &latest);
    }
}
