//! Default persona and the fixed replies the bot can send.

/// Persona used when no system prompt file is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "使用繁體中文進行回覆";

/// Reply for requests with no usable text.
pub const EMPTY_INPUT_REPLY: &str = "抱歉，我無法處理空白或無效的輸入。";

/// Reply once the retry budget is spent.
pub const FALLBACK_REPLY: &str = "抱歉，我現在遇到了一些技術問題，請稍後再試。";

/// Reply when every credential keeps reporting quota exhaustion.
pub const QUOTA_FALLBACK_REPLY: &str = "抱歉，API 配額已用完，請稍後再試。";

/// Reply for owner-only commands issued by someone else.
pub const OWNER_ONLY_REPLY: &str = "只有機器人擁有者可以使用此指令";

/// Reply after a purge completes.
pub const PURGE_DONE_REPLY: &str = "已清除訊息！";

/// Reply when a purge fails.
pub const PURGE_FAILED_REPLY: &str = "清除訊息時發生錯誤";

/// Farewell sent before shutting down.
pub const FAREWELL_REPLY: &str = "ヾ(￣▽￣)Bye~Bye~";

/// Greeting for `!hello`.
pub const GREETING_REPLY: &str = "你好啊！ヾ(•ω•`)o";

/// Reply for messages that arrive after intake has closed.
pub const SHUTTING_DOWN_REPLY: &str = "我正在關閉中，請稍後再試。";
