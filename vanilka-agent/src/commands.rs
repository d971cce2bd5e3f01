//! Bot commands and the fixed texts the bot answers with

use vanilka_core::history::HistoryStats;

pub const GREETING: &str = "Здравствуйте! 🎂 Я виртуальный администратор магазина бенто-тортов \"Ванилька\".\n\nСпросите меня о тортах, ценах, начинках или условиях заказа. Можно писать текстом или отправить голосовое сообщение.";

pub const HELP: &str = "Я отвечаю на вопросы о магазине \"Ванилька\": ассортимент, цены, сроки и доставка.\n\n/start — начать сначала\n/reset — очистить историю диалога\n/help — эта подсказка";

pub const ADMIN_HELP: &str = "\n\nДля администраторов:\n/stats — статистика\n/broadcast <текст> — рассылка всем пользователям";

pub const NOT_ALLOWED: &str = "Эта команда доступна только администраторам.";

pub const BROADCAST_USAGE: &str = "Укажите текст рассылки: /broadcast <текст>";

pub const UNKNOWN_COMMAND: &str = "Неизвестная команда. Список команд: /help";

pub const VOICE_NOT_RECOGNISED: &str =
    "Не удалось распознать голосовое сообщение. Попробуйте ещё раз или напишите текстом.";

pub const LLM_ERROR: &str =
    "Извините, произошла ошибка при обработке вашего запроса. Пожалуйста, попробуйте позже.";

pub const EMPTY_COMPLETION: &str = "Извините, не удалось сгенерировать ответ. Попробуйте ещё раз.";

pub const UNEXPECTED_ERROR: &str = "Произошла непредвиденная ошибка. Пожалуйста, попробуйте позже.";

/// A command the conversation handler understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Reset,
    Stats,
    Broadcast(String),
    Unknown(String),
}

impl BotCommand {
    /// Build from a command name (without the slash) and its argument text
    pub fn parse(name: &str, args: &str) -> Self {
        match name.to_lowercase().as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "reset" | "clear" => Self::Reset,
            "stats" => Self::Stats,
            "broadcast" => Self::Broadcast(args.trim().to_string()),
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(self, Self::Stats | Self::Broadcast(_))
    }
}

pub fn reset_done(removed: u64) -> String {
    format!("История диалога очищена 🧹 (удалено сообщений: {}).", removed)
}

pub fn voice_echo(text: &str) -> String {
    format!("🎤 Вы сказали: {}", text)
}

pub fn broadcast_done(delivered: usize) -> String {
    format!("Рассылка поставлена в очередь для {} пользователей.", delivered)
}

pub fn format_stats(stats: &HistoryStats) -> String {
    format!(
        "📊 Статистика\n\nПользователей: {}\nСообщений в истории: {}\nИз них от пользователей: {}\nАктивных сегодня: {}",
        stats.total_users, stats.total_messages, stats.user_messages, stats.active_today
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(BotCommand::parse("start", ""), BotCommand::Start);
        assert_eq!(BotCommand::parse("RESET", ""), BotCommand::Reset);
        assert_eq!(
            BotCommand::parse("broadcast", "  Новинка!  "),
            BotCommand::Broadcast("Новинка!".to_string())
        );
        assert_eq!(
            BotCommand::parse("menu", ""),
            BotCommand::Unknown("menu".to_string())
        );
    }

    #[test]
    fn test_admin_only() {
        assert!(BotCommand::Stats.is_admin_only());
        assert!(BotCommand::Broadcast(String::new()).is_admin_only());
        assert!(!BotCommand::Reset.is_admin_only());
    }

    #[test]
    fn test_format_stats() {
        let stats = HistoryStats {
            total_users: 2,
            total_messages: 5,
            user_messages: 3,
            active_today: 1,
        };
        let text = format_stats(&stats);
        assert!(text.contains("Пользователей: 2"));
        assert!(text.contains("Сообщений в истории: 5"));
        assert!(text.contains("Из них от пользователей: 3"));
        assert!(text.contains("Активных сегодня: 1"));
    }
}
