//! Message catalogue for user and admin facing text.
//!
//! Lookups fall back to English, then to the key itself, so a missing
//! translation never fails delivery.

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const DEFAULT_LANGUAGE: &str = "en";

type Catalogue = HashMap<&'static str, &'static str>;

static EN: Lazy<Catalogue> = Lazy::new(|| {
    HashMap::from([
        ("volume_warning", "⚠️ Subscription {username} has only {remaining} of traffic left."),
        ("time_warning", "⏳ Subscription {username} expires in {days} day(s)."),
        ("purge_notice", "🗑 Subscription {username} was removed after staying inactive for {days} days."),
        ("on_hold_reminder", "👋 Subscription {username} is ready but not started yet. Connect once to activate it."),
        ("order_created", "✅ Subscription {username} is ready.\n{link}"),
        ("order_extended", "✅ Subscription {username} was renewed."),
        ("gift_received", "🎁 Gift: {volume} and {days} day(s) were added to {username}."),
        ("job_summary", "📬 Job #{id} ({kind}) finished: {done} delivered, {failed} failed."),
        ("sync_gave_up", "❗ Could not {action} {username} on panel {panel} after {attempts} attempts: {error}"),
        ("panel_down", "🔴 Panel {panel} ({target}) is unreachable: {error}"),
        ("panel_up", "🟢 Panel {panel} is reachable again."),
        ("node_down", "🔴 Node {node} on panel {panel} is not connected: {message}"),
        ("node_up", "🟢 Node {node} on panel {panel} is connected again."),
        ("report_title", "📊 Daily report {day}"),
        ("report_totals", "Sales: {sales}\nRevenue: {revenue}\nVolume: {volume}\nNew users: {new_users}\nExtensions: {extensions}"),
        ("report_panel_line", "• {panel}: {sales} sales, {revenue}, {volume}, {extensions} ext."),
        ("err_capacity", "This location is full right now. Please choose another one."),
        ("err_generic", "Something went wrong. Please try again later."),
        ("err_panel_unavailable", "The server is temporarily unavailable. Please try again later."),
        ("err_account_missing", "This subscription no longer exists on the server."),
        ("err_panel_rejected", "The server rejected the request. Please contact support."),
    ])
});

static RU: Lazy<Catalogue> = Lazy::new(|| {
    HashMap::from([
        ("volume_warning", "⚠️ По подписке {username} осталось всего {remaining} трафика."),
        ("time_warning", "⏳ Подписка {username} истекает через {days} дн."),
        ("purge_notice", "🗑 Подписка {username} удалена после {days} дн. неактивности."),
        ("on_hold_reminder", "👋 Подписка {username} готова, но ещё не запущена. Подключитесь, чтобы активировать её."),
        ("order_created", "✅ Подписка {username} готова.\n{link}"),
        ("order_extended", "✅ Подписка {username} продлена."),
        ("gift_received", "🎁 Подарок: к {username} добавлено {volume} и {days} дн."),
        ("job_summary", "📬 Рассылка #{id} ({kind}) завершена: доставлено {done}, ошибок {failed}."),
        ("sync_gave_up", "❗ Не удалось выполнить {action} для {username} на панели {panel} после {attempts} попыток: {error}"),
        ("panel_down", "🔴 Панель {panel} ({target}) недоступна: {error}"),
        ("panel_up", "🟢 Панель {panel} снова доступна."),
        ("node_down", "🔴 Нода {node} на панели {panel} не подключена: {message}"),
        ("node_up", "🟢 Нода {node} на панели {panel} снова подключена."),
        ("report_title", "📊 Отчёт за {day}"),
        ("report_totals", "Продажи: {sales}\nВыручка: {revenue}\nОбъём: {volume}\nНовые пользователи: {new_users}\nПродления: {extensions}"),
        ("report_panel_line", "• {panel}: {sales} продаж, {revenue}, {volume}, {extensions} продл."),
        ("err_capacity", "Эта локация сейчас заполнена. Выберите другую."),
        ("err_generic", "Что-то пошло не так. Попробуйте позже."),
        ("err_panel_unavailable", "Сервер временно недоступен. Попробуйте позже."),
        ("err_account_missing", "Эта подписка больше не существует на сервере."),
        ("err_panel_rejected", "Сервер отклонил запрос. Обратитесь в поддержку."),
    ])
});

fn catalogue(lang: &str) -> &'static Catalogue {
    match lang.to_ascii_lowercase().as_str() {
        "ru" => &RU,
        _ => &EN,
    }
}

/// Raw template for `key`
pub fn t<'a>(lang: &str, key: &'a str) -> &'a str {
    catalogue(lang)
        .get(key)
        .or_else(|| EN.get(key))
        .copied()
        .unwrap_or(key)
}

/// Template for `key` with `{name}` placeholders filled in
pub fn render(lang: &str, key: &str, args: &[(&str, String)]) -> String {
    let mut text = t(lang, key).to_string();
    for (name, value) in args {
        text = text.replace(&format!("{{{}}}", name), value);
    }
    text
}
