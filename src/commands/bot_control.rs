use crate::dashboard::bot_api;
use crate::dashboard::runtime::{BotAction, DashboardEvent};
use crate::dashboard::types::ActionEnvelope;
use crate::error::AppError;
use crate::state::{AppState, DashboardLink};
use serde::Deserialize;
use tauri::State;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionArgs {
    pub symbol: String,
}

impl ClosePositionArgs {
    pub fn normalize(self) -> Result<String, AppError> {
        let symbol = self.symbol.trim().to_string();
        if symbol.is_empty() {
            return Err(AppError::InvalidArgument("symbol is required".to_string()));
        }
        Ok(symbol)
    }
}

/// The envelope as the runtime sees it: transport failures become a message.
fn runtime_result(result: &Result<ActionEnvelope, AppError>) -> Result<ActionEnvelope, String> {
    match result {
        Ok(envelope) => Ok(envelope.clone()),
        Err(error) => Err(error.to_string()),
    }
}

async fn run_bot_action(
    link: DashboardLink,
    action: BotAction,
) -> Result<ActionEnvelope, AppError> {
    let result = match action {
        BotAction::Start => bot_api::start_bot(&link.client, &link.base_url).await,
        BotAction::Stop => bot_api::stop_bot(&link.client, &link.base_url).await,
    };

    link.events
        .send(DashboardEvent::BotActionFinished {
            action,
            result: runtime_result(&result),
        })
        .await?;
    result
}

#[tauri::command]
pub async fn start_bot(state: State<'_, AppState>) -> Result<ActionEnvelope, AppError> {
    let link = state.dashboard_link().await?;
    run_bot_action(link, BotAction::Start).await
}

#[tauri::command]
pub async fn stop_bot(state: State<'_, AppState>) -> Result<ActionEnvelope, AppError> {
    let link = state.dashboard_link().await?;
    run_bot_action(link, BotAction::Stop).await
}

#[tauri::command]
pub async fn close_position(
    state: State<'_, AppState>,
    args: ClosePositionArgs,
) -> Result<ActionEnvelope, AppError> {
    let symbol = args.normalize()?;
    let link = state.dashboard_link().await?;

    link.events
        .send(DashboardEvent::ClosePending {
            symbol: symbol.clone(),
        })
        .await?;

    let result = bot_api::close_position(&link.client, &link.base_url, &symbol).await;
    link.events
        .send(DashboardEvent::CloseFinished {
            symbol,
            result: runtime_result(&result),
        })
        .await?;
    result
}
