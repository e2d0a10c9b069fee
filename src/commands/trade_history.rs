use crate::dashboard::frame::{HistoryFilterView, HistoryView};
use crate::dashboard::runtime::DashboardEvent;
use crate::dashboard::types::TradeHistoryQueryArgs;
use crate::error::AppError;
use crate::state::AppState;
use serde::Deserialize;
use tauri::State;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectHistorySymbolArgs {
    pub symbol: String,
}

#[tauri::command]
pub async fn trade_history_query(
    state: State<'_, AppState>,
    args: Option<TradeHistoryQueryArgs>,
) -> Result<HistoryView, AppError> {
    let link = state.dashboard_link().await?;
    let (ack, answer) = oneshot::channel();
    link.events
        .send(DashboardEvent::HistoryQuery {
            args: args.unwrap_or_default(),
            ack,
        })
        .await?;
    Ok(answer.await?)
}

#[tauri::command]
pub async fn select_history_symbol(
    state: State<'_, AppState>,
    args: SelectHistorySymbolArgs,
) -> Result<HistoryFilterView, AppError> {
    let link = state.dashboard_link().await?;
    let (ack, answer) = oneshot::channel();
    link.events
        .send(DashboardEvent::SelectHistorySymbol {
            symbol: args.symbol.trim().to_string(),
            ack,
        })
        .await?;
    Ok(answer.await?)
}
