//! REST route handlers.

use crate::ws;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use engine::{BotConfig, CreateBotRequest, EngineError, StrategyKind};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/price", get(price))
        .route("/api/klines", get(klines))
        .route("/api/symbolInfo", get(symbol_info))
        .route("/api/balances", get(balances))
        .route("/api/bots", get(list_bots).post(create_bot))
        .route("/api/bots/summary", get(bots_summary))
        .route("/api/bots/:id", delete(remove_bot))
        .route("/api/bots/:id/details", get(bot_details))
        .route("/api/bots/:id/start", post(start_bot))
        .route("/api/bots/:id/stop", post(stop_bot))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

fn bad_request(message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.to_string() })),
    )
}

fn engine_error(err: EngineError) -> (StatusCode, Json<Value>) {
    let status = match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "serverTime": state.gateway.timestamp_ms(),
        "timeOffset": state.gateway.time_offset_ms(),
    }))
}

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

async fn price(State(state): State<AppState>, Query(query): Query<SymbolQuery>) -> ApiResult {
    if let Some(point) = state.cache.get_price(&query.symbol) {
        return Ok(Json(json!({
            "symbol": query.symbol.to_uppercase(),
            "price": point.price,
            "source": "cache",
        })));
    }

    let price: Decimal = state
        .gateway
        .get_price(&query.symbol)
        .await
        .map_err(bad_request)?;

    Ok(Json(json!({
        "symbol": query.symbol.to_uppercase(),
        "price": price,
        "source": "rest",
    })))
}

#[derive(Deserialize)]
struct KlinesQuery {
    symbol: String,
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_limit() -> u32 {
    100
}

async fn klines(State(state): State<AppState>, Query(query): Query<KlinesQuery>) -> ApiResult {
    let klines = state
        .gateway
        .get_klines(&query.symbol, &query.interval, query.limit)
        .await
        .map_err(bad_request)?;

    Ok(Json(json!(klines)))
}

async fn symbol_info(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> ApiResult {
    let info = state
        .gateway
        .get_symbol_info(&query.symbol)
        .await
        .map_err(bad_request)?;

    Ok(Json(json!({
        "symbol": info.symbol,
        "baseAsset": info.base_asset,
        "quoteAsset": info.quote_asset,
        "tickSize": info.filters.tick_size,
        "stepSize": info.filters.step_size,
    })))
}

async fn balances(State(state): State<AppState>, Query(query): Query<SymbolQuery>) -> ApiResult {
    let info = state
        .gateway
        .get_symbol_info(&query.symbol)
        .await
        .map_err(bad_request)?;

    let balances = match state.cache.get_balances() {
        Some(balances) => balances,
        None => state
            .gateway
            .account_balances()
            .await
            .map_err(bad_request)?,
    };

    let view = |asset: &str| {
        let balance = balances.get(asset);
        json!({
            "asset": asset,
            "free": balance.map(|b| b.free).unwrap_or_default(),
            "locked": balance.map(|b| b.locked).unwrap_or_default(),
        })
    };

    Ok(Json(json!({
        "symbol": info.symbol,
        "base": view(&info.base_asset),
        "quote": view(&info.quote_asset),
    })))
}

async fn list_bots(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.manager.list_bots()))
}

async fn bots_summary(State(state): State<AppState>) -> Json<Value> {
    let bots = state.manager.list_bots();
    let running = bots
        .iter()
        .filter(|b| b.status == engine::BotStatus::Running)
        .count();
    let total_pnl: Decimal = bots.iter().map(|b| b.stats.realized_pnl).sum();
    let total_rounds: u64 = bots.iter().map(|b| b.stats.completed_rounds).sum();

    Json(json!({
        "total": bots.len(),
        "running": running,
        "stopped": bots.len() - running,
        "totalRealizedPnl": total_pnl,
        "totalCompletedRounds": total_rounds,
    }))
}

async fn bot_details(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state
        .manager
        .get_details(&id)
        .map(Json)
        .map_err(engine_error)
}

#[derive(Deserialize)]
struct CreateBotBody {
    name: String,
    strategy: String,
    symbol: String,
    config: BotConfig,
}

async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<CreateBotBody>,
) -> ApiResult {
    let strategy: StrategyKind = body.strategy.parse().map_err(bad_request)?;

    let bot = state
        .manager
        .create_bot(
            CreateBotRequest {
                name: body.name,
                strategy,
                symbol: body.symbol.to_uppercase(),
                config: body.config,
            },
            &state.factory,
        )
        .map_err(engine_error)?;

    Ok(Json(json!({ "id": bot.id, "status": "created" })))
}

async fn start_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.start_bot(&id).await.map_err(engine_error)?;
    Ok(Json(json!({ "id": id, "status": "running" })))
}

async fn stop_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.stop_bot(&id).await.map_err(engine_error)?;
    Ok(Json(json!({ "id": id, "status": "stopped" })))
}

async fn remove_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.remove_bot(&id).await.map_err(engine_error)?;
    Ok(Json(json!({ "id": id, "status": "removed" })))
}
