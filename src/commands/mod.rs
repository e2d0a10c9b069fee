pub mod bot_control;
pub mod dashboard_session;
pub mod health;
pub mod preferences;
pub mod toasts;
pub mod trade_history;
