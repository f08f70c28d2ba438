use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the pairplay engine.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::events::user_events,
        crate::routes::matchmaking::enqueue,
        crate::routes::matchmaking::cancel,
        crate::routes::matchmaking::current_pairing,
        crate::routes::matchmaking::end_pairing,
        crate::routes::matchmaking::relay_message,
        crate::routes::quiz::get_session,
        crate::routes::quiz::start_session,
        crate::routes::quiz::submit_category,
        crate::routes::quiz::submit_answer,
        crate::routes::tod::get_game,
        crate::routes::tod::start_game,
        crate::routes::tod::submit_choice,
        crate::routes::tod::submit_proof,
        crate::routes::tod::submit_judgment,
        crate::routes::tod::use_item,
        crate::routes::tod::quit,
        crate::routes::group::get_session,
        crate::routes::group::start,
        crate::routes::group::submit_choice,
        crate::routes::group::confirm_turn,
        crate::routes::group::force_advance,
        crate::routes::group::end,
        crate::routes::rooms::open_room,
        crate::routes::rooms::members,
        crate::routes::rooms::join,
        crate::routes::rooms::leave,
        crate::routes::rooms::close_room,
        crate::routes::ledger::balance,
        crate::routes::ledger::history,
        crate::routes::ledger::grant,
    ),
    components(
        schemas(
            crate::dto::ActionResponse,
            crate::dto::health::HealthResponse,
            crate::dto::events::Handshake,
            crate::dto::events::SystemStatus,
            crate::dto::events::CommandErrorEvent,
            crate::dto::matchmaking::EnqueueRequest,
            crate::dto::matchmaking::QueueEntryView,
            crate::dto::matchmaking::PairingView,
            crate::dto::matchmaking::RelayRequest,
            crate::dto::quiz::StartQuizRequest,
            crate::dto::quiz::CategoryRequest,
            crate::dto::quiz::AnswerRequest,
            crate::dto::quiz::QuizSessionView,
            crate::dto::tod::StartTodRequest,
            crate::dto::tod::TodChoiceRequest,
            crate::dto::tod::ProofRequest,
            crate::dto::tod::JudgmentRequest,
            crate::dto::tod::ItemRequest,
            crate::dto::tod::TodGameView,
            crate::dto::group::StartGroupRequest,
            crate::dto::group::GroupChoiceRequest,
            crate::dto::group::GroupSessionView,
            crate::dto::rooms::OpenRoomRequest,
            crate::dto::rooms::RoomMembersResponse,
            crate::dto::ledger::BalanceResponse,
            crate::dto::ledger::LedgerTxView,
            crate::dto::ledger::GrantRequest,
            crate::services::dispatch::Reply,
            crate::dao::models::GameType,
            crate::dao::models::SearchProfile,
            crate::dao::models::MatchFilters,
            crate::dao::models::PairingStatus,
            crate::dao::models::QuizState,
            crate::dao::models::QuizScore,
            crate::dao::models::TodState,
            crate::dao::models::TodChoice,
            crate::dao::models::ProofKind,
            crate::dao::models::ItemKind,
            crate::dao::models::EndReason,
            crate::dao::models::GroupGameType,
            crate::dao::models::GroupStatus,
            crate::dao::models::Participant,
            crate::dao::models::GroupPrompt,
            crate::dao::models::TxType,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "events", description = "Per-user server-sent event streams"),
        (name = "matchmaking", description = "Paid queue, pairings and chat relay"),
        (name = "quiz", description = "1v1 category quiz"),
        (name = "truth-or-dare", description = "Turn-based truth-or-dare with judging"),
        (name = "group", description = "Room-wide games driven by the host"),
        (name = "rooms", description = "Room directory"),
        (name = "ledger", description = "Coin balances and transactions"),
    )
)]
pub struct ApiDoc;
