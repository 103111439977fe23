//! Server-side flows through `GameService` with the in-memory repository and
//! broadcaster: a complete game, write races, lazy timeouts and rematches.

use banchess_tests::{init_tracing, Harness, BLACK, START, WHITE};
use rstest::rstest;
use shared::models::events::GameEvent;
use shared::models::game::{Color, EndReason, GamePhase, GameResult, GameStatus, TimeControl};
use shared::models::move_request::{BanRequest, MoveRequest};
use shared::models::pgn::MoveText;
use shared::services::errors::game_service_errors::GameServiceError;
use shared::services::game_service::GameService;

async fn ban(service: &GameService, game_id: &str, user: &str, from: &str, to: &str) {
    service
        .ban_move(
            user,
            &BanRequest::new(game_id.to_string(), from.to_string(), to.to_string()),
        )
        .await
        .unwrap_or_else(|e| panic!("{} could not ban {}{}: {}", user, from, to, e));
}

async fn play(service: &GameService, game_id: &str, user: &str, from: &str, to: &str) {
    service
        .make_move(
            user,
            &MoveRequest::new(game_id.to_string(), from.to_string(), to.to_string()),
        )
        .await
        .unwrap_or_else(|e| panic!("{} could not play {}{}: {}", user, from, to, e));
}

#[tokio::test]
async fn test_fools_mate_under_bans() {
    init_tracing();
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let id = game.game_id.as_str();
    let mut topic = harness.broadcaster.subscribe(id);
    let service = harness.service.as_ref();

    ban(service, id, BLACK, "a2", "a3").await;
    play(service, id, WHITE, "f2", "f3").await;
    ban(service, id, WHITE, "a7", "a6").await;
    play(service, id, BLACK, "e7", "e5").await;
    ban(service, id, BLACK, "h2", "h3").await;
    play(service, id, WHITE, "g2", "g4").await;
    ban(service, id, WHITE, "a7", "a6").await;
    play(service, id, BLACK, "d8", "h4").await;

    let finished = service.get_game(id).await.unwrap();
    assert_eq!(finished.status, GameStatus::Finished);
    assert_eq!(finished.result, Some(GameResult::Black));
    assert_eq!(finished.end_reason, Some(EndReason::Checkmate));
    assert_eq!(finished.version, 8);
    assert_eq!(finished.running_clock(), None);

    let moves = service.get_moves(id).await.unwrap();
    let sans: Vec<&str> = moves.iter().map(|m| m.san.as_str()).collect();
    assert_eq!(sans, vec!["f3", "e5", "g4", "Qh4#"]);
    assert!(moves.iter().all(|m| m.banned_move().is_some()));
    assert_eq!(service.get_bans(id).await.unwrap().len(), 4);

    let text = MoveText::parse(&finished.pgn).unwrap();
    assert_eq!(text.moves_with_bans().len(), 4);
    assert_eq!(text.result(), Some("0-1"));

    let mut events = Vec::new();
    while let Ok(payload) = topic.try_recv() {
        events.push(GameEvent::from_json(&payload).unwrap());
    }
    let kinds: Vec<&str> = events.iter().map(GameEvent::kind).collect();
    assert_eq!(kinds, ["ban", "move"].repeat(4));
    let versions: Vec<u64> = events.iter().map(|e| e.game().version).collect();
    assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_finished_game_rejects_actions_without_writing() {
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let id = game.game_id.as_str();
    let service = harness.service.as_ref();
    service.resign(id, BLACK).await.unwrap();
    let before = service.get_game(id).await.unwrap();

    let moved = service
        .make_move(
            WHITE,
            &MoveRequest::new(id.to_string(), "e2".to_string(), "e4".to_string()),
        )
        .await;
    let banned = service
        .ban_move(
            BLACK,
            &BanRequest::new(id.to_string(), "e2".to_string(), "e4".to_string()),
        )
        .await;

    assert!(matches!(moved, Err(GameServiceError::UnauthorizedAction(_))));
    assert!(matches!(banned, Err(GameServiceError::UnauthorizedAction(_))));
    assert_eq!(service.get_game(id).await.unwrap(), before);
    assert_eq!(before.result, Some(GameResult::White));
}

#[tokio::test]
async fn test_racing_bans_commit_once() {
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let id = game.game_id.clone();

    let first = BanRequest::new(id.clone(), "e2".to_string(), "e4".to_string());
    let second = BanRequest::new(id.clone(), "d2".to_string(), "d4".to_string());
    let (a, b) = tokio::join!(
        harness.service.ban_move(BLACK, &first),
        harness.service.ban_move(BLACK, &second),
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser,
        Err(GameServiceError::Conflict(_)) | Err(GameServiceError::UnauthorizedAction(_))
    ));
    let stored = harness.service.get_game(&id).await.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(harness.service.get_bans(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_flag_is_settled_on_next_read() {
    let harness = Harness::new(TimeControl::new(5_000, 0));
    let game = harness.new_game().await;
    let mut topic = harness.broadcaster.subscribe(&game.game_id);

    harness.time.set(START + 6_000);
    let settled = harness.service.get_game(&game.game_id).await.unwrap();

    assert_eq!(settled.status, GameStatus::Finished);
    assert_eq!(settled.end_reason, Some(EndReason::Timeout));
    assert_eq!(settled.result, Some(GameResult::win_for(Color::White)));
    assert_eq!(settled.black_time_remaining, 0);
    assert_eq!(settled.white_time_remaining, 5_000);

    let event = GameEvent::from_json(&topic.try_recv().unwrap()).unwrap();
    assert_eq!(event.kind(), "game_update");
    assert_eq!(event.game().version, settled.version);
}

#[rstest]
#[case::black_flags_before_opening_ban(false, 6_000, Some(Color::Black))]
#[case::white_flags_after_opening_ban(true, 5_000, Some(Color::White))]
#[case::white_still_has_time(true, 4_000, None)]
#[tokio::test]
async fn test_flag_fall(
    #[case] opening_ban: bool,
    #[case] elapsed: i64,
    #[case] flagged: Option<Color>,
) {
    let harness = Harness::new(TimeControl::new(5_000, 0));
    let game = harness.new_game().await;
    let id = game.game_id.as_str();
    if opening_ban {
        harness.time.advance(1_000);
        ban(harness.service.as_ref(), id, BLACK, "e2", "e4").await;
    }

    harness.time.advance(elapsed);
    let read = harness.service.get_game(id).await.unwrap();

    match flagged {
        Some(loser) => {
            assert_eq!(read.status, GameStatus::Finished);
            assert_eq!(read.end_reason, Some(EndReason::Timeout));
            assert_eq!(read.result, Some(GameResult::win_for(loser.opponent())));
            assert_eq!(read.time_remaining(loser), 0);
            assert_eq!(read.running_clock(), None);
        }
        None => {
            assert_eq!(read.status, GameStatus::Active);
            assert_eq!(read.running_clock(), Some(Color::White));
            assert_eq!(read.phase(), GamePhase::AwaitingMove(Color::White));
        }
    }
}

#[tokio::test]
async fn test_increment_after_each_turn() {
    let harness = Harness::new(TimeControl::new(60_000, 2_000));
    let game = harness.new_game().await;
    let id = game.game_id.as_str();
    let service = harness.service.as_ref();

    harness.time.advance(3_000);
    ban(service, id, BLACK, "e2", "e4").await;
    let first_ban = service.get_game(id).await.unwrap();
    assert_eq!(first_ban.black_time_remaining, 57_000);
    assert_eq!(first_ban.running_clock(), Some(Color::White));

    harness.time.advance(1_000);
    play(service, id, WHITE, "d2", "d4").await;
    assert_eq!(
        service.get_game(id).await.unwrap().running_clock(),
        Some(Color::White)
    );
    harness.time.advance(1_000);
    ban(service, id, WHITE, "e7", "e5").await;

    let handed_over = service.get_game(id).await.unwrap();
    assert_eq!(handed_over.white_time_remaining, 60_000);
    assert_eq!(handed_over.black_time_remaining, 57_000);
    assert_eq!(handed_over.running_clock(), Some(Color::Black));
    assert_eq!(handed_over.phase(), GamePhase::AwaitingMove(Color::Black));
}

#[tokio::test]
async fn test_draw_then_rematch_swaps_colors() {
    let harness = Harness::new(TimeControl::default());
    let game = harness.new_game().await;
    let id = game.game_id.as_str();
    let service = harness.service.as_ref();

    service.offer_draw(id, WHITE).await.unwrap();
    let drawn = service.accept_draw(id, BLACK).await.unwrap();
    assert_eq!(drawn.result, Some(GameResult::Draw));
    assert_eq!(drawn.end_reason, Some(EndReason::DrawAgreement));

    service.offer_rematch(id, BLACK).await.unwrap();
    let (old, rematch) = service.accept_rematch(id, WHITE).await.unwrap();

    assert_eq!(old.rematch_game_id.as_deref(), Some(rematch.game_id.as_str()));
    assert_eq!(rematch.white_player_id, BLACK);
    assert_eq!(rematch.black_player_id, WHITE);
    assert_eq!(rematch.phase(), GamePhase::AwaitingBan(Color::Black));
    let stored = service.get_game(&rematch.game_id).await.unwrap();
    assert_eq!(stored.game_id, rematch.game_id);
}
