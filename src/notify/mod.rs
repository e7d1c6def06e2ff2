pub mod chart;
pub mod message;
pub mod telegram;

pub use chart::ChartRenderer;
pub use telegram::TelegramNotifier;
