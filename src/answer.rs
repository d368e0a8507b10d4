//! Answer orchestration: journal, guard, retrieve, gate, phrase.
//!
//! The flow refuses early and loudly. Every refusal uses a fixed
//! user-facing message so the UI and the journal stay predictable, and
//! generation can only rephrase already-gated citations, never invent
//! content.

use crate::config::{Config, SessionSettings};
use crate::gate::filter_confident;
use crate::guard::Vocabulary;
use crate::journal::DialogJournal;
use crate::pipeline::load_index;
use crate::providers::{EmbeddingProvider, GenerationProvider};
use crate::retriever::{retrieve_top, Citation, RankingRules};

pub const MSG_EMPTY_INDEX: &str = "Индекс пуст. Выполните переиндексацию в онлайне.";
pub const MSG_EMPTY_INDEX_OFFLINE: &str = "Оффлайн: индекс отсутствует.";
pub const MSG_BOUNDARY: &str = "Вы ещё не дошли до этой части книги. Вопрос относится к последующим разделам. Подсказка: снимите границу (кнопка ‘Сбросить’ в настройках сверху) и попробуйте ещё раз.";
pub const MSG_NO_QUOTE: &str = "Не могу ответить строго по книге: не нашёл точной цитаты по вашему вопросу. Уточните формулировку или место в книге.";
pub const MSG_ANACHRONISM: &str = "Не могу ответить строго по книге: в тексте нет упоминаний некоторых терминов из вопроса. Переформулируйте вопрос в терминах книги или уберите современные понятия.";
pub const MSG_FOUND: &str = "Нашёл релевантные места в книге.";

/// Modern-world stems that cannot occur in the book; questions carrying
/// them are refused even when retrieval found confident hits.
const ANACHRONISM_STEMS: &[&str] = &[
    "автомобил", "интернет", "смартфон", "компьютер", "ракет", "поезд", "телефон",
    "кибер", "электрон", "бензин", "двигател", "нефт", "спутник",
];

const TOP_K: usize = 3;

/// Final reply with its supporting citations.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub reply: String,
    pub citations: Vec<Citation>,
}

/// Everything the answer flow needs, borrowed from the caller so the
/// same providers serve the CLI and the HTTP server.
pub struct AnswerContext<'a> {
    pub config: &'a Config,
    pub session: &'a SessionSettings,
    pub embeddings: &'a dyn EmbeddingProvider,
    pub generation: Option<&'a dyn GenerationProvider>,
    pub vocabulary: &'a Vocabulary,
    pub rules: &'a RankingRules,
    pub journal: Option<&'a DialogJournal>,
}

impl AnswerContext<'_> {
    // Journaling is best-effort and never fails the request.
    fn log(&self, role: &str, text: &str, citations: &[Citation]) {
        if let Some(journal) = self.journal {
            if let Err(err) = journal.append(role, text, citations) {
                eprintln!("journal append failed: {:#}", err);
            }
        }
    }

    fn refuse(&self, reply: &str) -> ChatOutcome {
        self.log("assistant", reply, &[]);
        ChatOutcome {
            reply: reply.to_string(),
            citations: Vec::new(),
        }
    }
}

/// Answer a reader's question strictly from the indexed book.
///
/// `boundary_override` replaces the session's explicit reading boundary
/// for this one request.
pub async fn answer(
    ctx: &AnswerContext<'_>,
    message: &str,
    boundary_override: Option<u64>,
) -> ChatOutcome {
    ctx.log("user", message, &[]);

    let store = match load_index(ctx.config) {
        Ok(store) => store,
        Err(err) => return ctx.refuse(&format!("Недоступно: {}", err)),
    };
    if store.is_empty() {
        let reply = if ctx.session.offline {
            MSG_EMPTY_INDEX_OFFLINE
        } else {
            MSG_EMPTY_INDEX
        };
        return ctx.refuse(reply);
    }

    let explicit = boundary_override.or(ctx.session.read_boundary_seq);
    let outcome = ctx.vocabulary.evaluate(message, store.all(), explicit);
    if outcome.violation {
        return ctx.refuse(MSG_BOUNDARY);
    }

    let hits = match retrieve_top(message, &store, ctx.embeddings, ctx.rules, TOP_K, outcome.ceiling)
        .await
    {
        Ok(hits) => hits,
        Err(err) => return ctx.refuse(&format!("Недоступно: {}", err)),
    };

    let confident = filter_confident(hits);
    if confident.is_empty() {
        return ctx.refuse(MSG_NO_QUOTE);
    }

    let lowered = message.to_lowercase();
    if ANACHRONISM_STEMS.iter().any(|stem| lowered.contains(stem)) {
        return ctx.refuse(MSG_ANACHRONISM);
    }

    let citations: Vec<Citation> = confident.iter().map(Citation::from).collect();
    let mut reply = MSG_FOUND.to_string();

    if !ctx.session.offline {
        if let Some(generation) = ctx.generation {
            reply = match phrase_reply(ctx, generation, message, &citations).await {
                Some(generated) => generated,
                // A failed generation call degrades to the templated reply.
                None => offline_reply(&citations),
            };
        }
    } else {
        reply = offline_reply(&citations);
    }

    ctx.log("assistant", &reply, &citations);
    ChatOutcome { reply, citations }
}

/// Ask the generation model to phrase a short reply from the citations.
/// Returns `None` on failure or an empty completion.
async fn phrase_reply(
    ctx: &AnswerContext<'_>,
    generation: &dyn GenerationProvider,
    message: &str,
    citations: &[Citation],
) -> Option<String> {
    let context_lines: Vec<String> = citations
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}: \"{}\"", i + 1, c.section_title, c.quote))
        .collect();
    let limit = ctx.session.reply_limit_chars;
    let approx_tokens = ((limit / 4) as u32).clamp(60, 200);
    let style = match ctx.session.socratic_level {
        1 => "Дай прямой лаконичный ответ.",
        3 => "Сформулируй ответ через наводящий вопрос, максимум одно краткое утверждение.",
        _ => "Дай краткий ответ и один наводящий вопрос.",
    };
    let prompt = format!(
        "Отвечай по-русски, строго по приведённым цитатам. \
         Обязательно включи одну точную короткую цитату в кавычках вместе с пометкой источника \
         в квадратных скобках, например: [1]. {}\n\n\
         Вопрос: {}\n\nЦитаты:\n{}\n\nКраткий ответ (<= {} символов):",
        style,
        message,
        context_lines.join("\n"),
        limit
    );
    match generation.complete(&prompt, approx_tokens).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// Deterministic offline reply: the shortest available quote, verbatim.
fn offline_reply(citations: &[Citation]) -> String {
    let shortest = citations
        .iter()
        .min_by_key(|c| c.quote.trim().len().max(1));
    match shortest {
        Some(c) if !c.quote.trim().is_empty() => {
            format!("По книге: \"{}\" [{}]", c.quote.trim(), c.section_title.trim())
        }
        _ => "По книге: см. цитату [1] в списке ссылок.".to_string(),
    }
}
