//! Static translation table for user-facing texts.

use tracing::warn;

use crate::config::BotConfig;

pub const START_MESSAGE: &str = "start_message";
pub const HELP_MESSAGE: &str = "help_message";
pub const ERROR_OCCURRED: &str = "error_occurred";

const EN: &[(&str, &str)] = &[
    (
        START_MESSAGE,
        "👋 Welcome to {BOT_NAME}!\n\n\
         I can help you with {BOT_DESCRIPTION}\n\
         Use the /help command to view available commands.",
    ),
    (
        HELP_MESSAGE,
        "📚 Available commands:\n\n\
         /start - Start the bot\n\
         /help - Show help\n\n\
         💡 How to use:\n\
         {BOT_INSTRUCTIONS}",
    ),
    (
        ERROR_OCCURRED,
        "❌ Unknown command. Use /help to view available commands.",
    ),
];

const KK: &[(&str, &str)] = &[
    (
        START_MESSAGE,
        "👋 {BOT_NAME} ботқа қош келдіңіз!\n\n\
         Мен сізге {BOT_DESCRIPTION} бойынша көмектесе аламын.\n\
         /help командасын қолданып, қолжетімді командаларды көруге болады.",
    ),
    (
        HELP_MESSAGE,
        "📚 Қолжетімді командалар:\n\n\
         /start - Ботты іске қосу\n\
         /help - Көмек сұрау\n\n\
         💡 Қолданылуы:\n\
         {BOT_INSTRUCTIONS}",
    ),
    (
        ERROR_OCCURRED,
        "❌ Белгісіз команда. Қолжетімді командаларды көру үшін /help командасын қолданыңыз.",
    ),
];

const RU: &[(&str, &str)] = &[
    (
        START_MESSAGE,
        "👋 Добро пожаловать в {BOT_NAME}!\n\n\
         Я могу помочь вам {BOT_DESCRIPTION}\n\
         Используйте /help для просмотра доступных команд.",
    ),
    (
        HELP_MESSAGE,
        "📚 Доступные команды:\n\n\
         /start - Запустить бота\n\
         /help - Показать справку\n\n\
         💡 Как использовать:\n\
         {BOT_INSTRUCTIONS}",
    ),
    (
        ERROR_OCCURRED,
        "❌ Неизвестная команда. Используйте /help для просмотра доступных команд.",
    ),
];

fn table(language_code: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match language_code {
        "en" => Some(EN),
        "kk" => Some(KK),
        "ru" => Some(RU),
        _ => None,
    }
}

/// Looks up localized texts and fills `{PLACEHOLDER}`s.
#[derive(Debug, Clone)]
pub struct Translator {
    default_language: String,
    globals: Vec<(String, String)>,
}

impl Translator {
    pub fn new(bot: &BotConfig) -> Self {
        let default_language = if table(&bot.default_language).is_some() {
            bot.default_language.clone()
        } else {
            warn!(
                "Default language '{}' has no translations, using en",
                bot.default_language
            );
            "en".to_string()
        };

        Self {
            default_language,
            globals: vec![
                ("BOT_NAME".to_string(), bot.name.clone()),
                ("BOT_DESCRIPTION".to_string(), bot.description.clone()),
                ("BOT_INSTRUCTIONS".to_string(), bot.instructions.clone()),
            ],
        }
    }

    /// Resolve `key` in `language_code`, falling back to the default language.
    /// Unknown keys come back verbatim.
    pub fn translate(&self, key: &str, language_code: &str, substitutions: &[(&str, &str)]) -> String {
        let entries = table(language_code)
            .or_else(|| table(&self.default_language))
            .unwrap_or(EN);
        let template = entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, text)| *text)
            .unwrap_or(key);

        self.fill(template, substitutions)
    }

    fn lookup<'a>(&'a self, name: &str, substitutions: &'a [(&str, &str)]) -> Option<&'a str> {
        substitutions
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .or_else(|| {
                self.globals
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.as_str())
            })
    }

    fn fill(&self, template: &str, substitutions: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match self.lookup(name, substitutions) {
                        Some(value) => out.push_str(value),
                        None => {
                            warn!("Missing format key in translation: {}", name);
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}
