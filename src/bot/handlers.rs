use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use teloxide::ApiError as TelegramApiError;
use teloxide::RequestError;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::Message;
use teloxide::types::MessageId;
use teloxide::types::ParseMode;
use teloxide::types::UpdateKind;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::api::ApiError;
use crate::api::Caller;
use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::callbacks::CallbackAction;
use crate::bot::callbacks::MenuTarget;
use crate::bot::context::AppContext;
use crate::bot::state::ConversationState;
use crate::bot::state::DraftStage;
use crate::bot::state::TicketDraft;
use crate::bot::views;
use crate::models::NewComment;
use crate::models::NewTicket;
use crate::models::UserSync;
use crate::rate_limit::RateLimiter;
use crate::util::MAX_BODY_CHARS;
use crate::util::MAX_TITLE_CHARS;
use crate::util::TextError;
use crate::util::is_cancel;
use crate::util::parse_ticket_ref;
use crate::util::truncate_chars;
use crate::util::validate_text;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const SLOW_DOWN_TEXT: &str = "⏳ Slow down a little and try again in a minute.";
const TITLE_PROMPT: &str = "📝 Enter a short title for your ticket (or type cancel):";
const BODY_PROMPT: &str = "🧾 Describe the problem in as much detail as you can:";
const CALLBACK_TEXT_LIMIT: usize = 200;
const CALLBACK_FAILED_TEXT: &str = "⚠️ Something went wrong, please try again.";

/// Where a screen is rendered: a fresh message, or in place over an existing one.
#[derive(Debug, Clone, Copy)]
enum Screen {
  Send(ChatId),
  Edit(ChatId, MessageId),
}

impl Screen {
  fn chat(self) -> ChatId {
    match self {
      Self::Send(chat) | Self::Edit(chat, _) => chat,
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum EditOutcome {
  Updated,
  Unchanged,
  Resend,
}

/// What a conversation step makes of an incoming message.
#[derive(Debug, PartialEq, Eq)]
enum StepInput<'a> {
  Missing,
  Cancel,
  Command,
  Text(&'a str),
}

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(dptree::case![ConversationState::NewTicket(draft)].endpoint(handle_draft_message))
    .branch(dptree::case![ConversationState::Reply { ticket_id }].endpoint(handle_reply_message))
    .branch(dptree::endpoint(handle_idle_text));

  let callback_handler = Update::filter_callback_query()
    .enter_dialogue::<CallbackQuery, DialogueStorage, ConversationState>()
    .endpoint(handle_callback_query);

  dptree::entry()
    .branch(dptree::filter_async(is_throttled).endpoint(handle_throttled))
    .branch(message_handler)
    .branch(callback_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
    .branch(dptree::case![Command::New].endpoint(handle_new))
    .branch(dptree::case![Command::Tickets].endpoint(handle_tickets))
    .branch(dptree::case![Command::Ticket(reference)].endpoint(handle_ticket))
    .branch(dptree::case![Command::Profile].endpoint(handle_profile))
    .branch(dptree::case![Command::Status].endpoint(handle_status))
    .branch(dptree::case![Command::Cancel].endpoint(handle_cancel))
}

async fn is_throttled(ctx: SharedContext, update: Update) -> bool {
  throttled(ctx.limiter(), update.from()).await
}

/// Updates without a sender (channel posts and the like) are never throttled.
async fn throttled(limiter: &RateLimiter, user: Option<&User>) -> bool {
  match user {
    Some(user) => !limiter.check(user.id.0 as i64).await,
    None => false,
  }
}

#[instrument(skip(bot, update))]
async fn handle_throttled(bot: Bot, update: Update) -> HandlerResult {
  match &update.kind {
    UpdateKind::Message(msg) => {
      info!(chat_id = %msg.chat.id, "throttled message");
      bot.send_message(msg.chat.id, SLOW_DOWN_TEXT).await?;
    },
    UpdateKind::CallbackQuery(query) => {
      info!(user_id = query.from.id.0, "throttled callback query");
      bot
        .answer_callback_query(query.id.clone())
        .text(SLOW_DOWN_TEXT)
        .await?;
    },
    _ => {},
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_start(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  dialogue.reset().await?;
  let user = msg.from.as_ref().context("message missing sender")?;
  let username = user.username.as_deref().unwrap_or("-");
  info!(user_id = user.id.0, chat_id = %msg.chat.id, username, "received /start command");

  let caller = Caller::from_user(user);
  match ctx.api().sync_user(&caller, &user_sync(user)).await {
    Ok(profile) => debug!(user_id = caller.id, account_id = profile.id, "synced user with backend"),
    Err(err) => warn!(user_id = caller.id, error = %err, "failed to sync user with backend"),
  }

  present(
    &bot,
    Screen::Send(msg.chat.id),
    views::MAIN_MENU_TEXT.to_string(),
    views::main_menu_keyboard(),
  )
  .await
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str("\n\nMost actions are also available from the menu buttons. Use /start to open the menu again.");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, msg))]
async fn handle_new(bot: Bot, dialogue: BotDialogue, msg: Message) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  start_draft(&bot, &dialogue, msg.chat.id, user.id.0 as i64).await
}

#[instrument(skip(bot, ctx, msg))]
async fn handle_tickets(bot: Bot, ctx: SharedContext, msg: Message) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  show_ticket_list(&bot, &ctx, &Caller::from_user(user), Screen::Send(msg.chat.id), 1).await
}

#[instrument(skip(bot, ctx, msg))]
async fn handle_ticket(bot: Bot, ctx: SharedContext, msg: Message, reference: String) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  let Some(ticket_id) = parse_ticket_ref(&reference) else {
    bot
      .send_message(msg.chat.id, "🔢 Usage: /ticket <number>, for example /ticket 42")
      .await?;
    return Ok(());
  };
  show_ticket(&bot, &ctx, &Caller::from_user(user), Screen::Send(msg.chat.id), ticket_id).await
}

#[instrument(skip(bot, ctx, msg))]
async fn handle_profile(bot: Bot, ctx: SharedContext, msg: Message) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  show_profile(&bot, &ctx, &Caller::from_user(user), Screen::Send(msg.chat.id)).await
}

#[instrument(skip(bot, ctx, msg))]
async fn handle_status(bot: Bot, ctx: SharedContext, msg: Message) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  let user_id = user.id.0 as i64;
  if !ctx.is_admin(user_id) {
    bot.send_message(msg.chat.id, "🛡️ Admins only.").await?;
    return Ok(());
  }

  let started = Instant::now();
  let result = ctx.api().health().await;
  let elapsed_ms = started.elapsed().as_millis();
  let text = match result {
    Ok(health) if health.is_ok() => {
      let version = health.version.as_deref().unwrap_or("unknown version");
      format!("✅ Backend healthy ({version}), answered in {elapsed_ms} ms.")
    },
    Ok(health) => format!("⚠️ Backend reports status '{}' after {elapsed_ms} ms.", health.status),
    Err(err) => {
      warn!(error = %err, "backend health check failed");
      format!("❌ Backend check failed after {elapsed_ms} ms: {err}")
    },
  };
  info!(user_id, elapsed_ms = elapsed_ms as u64, "reported backend status");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, msg))]
async fn handle_cancel(bot: Bot, dialogue: BotDialogue, msg: Message) -> HandlerResult {
  let state = dialogue.get().await?.unwrap_or_default();
  dialogue.reset().await?;
  let text = if state == ConversationState::Idle {
    "Nothing to cancel."
  } else {
    "❌ Cancelled."
  };
  bot
    .send_message(msg.chat.id, text)
    .reply_markup(views::main_menu_only_keyboard())
    .await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, msg, draft))]
async fn handle_draft_message(
  bot: Bot,
  dialogue: BotDialogue,
  msg: Message,
  draft: TicketDraft,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  let chat_id = msg.chat.id;
  if !draft.is_author(user.id.0 as i64) {
    bot
      .send_message(chat_id, "Only the user who started this ticket can continue it.")
      .await?;
    return Ok(());
  }

  info!(author_id = draft.author_tg_id, chat_id = %chat_id, stage = ?draft.stage, "handling draft input");

  let text = match classify_step_input(message_text(&msg)) {
    StepInput::Missing => {
      let prompt = match draft.stage {
        DraftStage::Title => TITLE_PROMPT,
        DraftStage::Body => BODY_PROMPT,
        DraftStage::Confirm => "Use the buttons above to submit or cancel.",
      };
      bot.send_message(chat_id, prompt).await?;
      return Ok(());
    },
    StepInput::Command => {
      debug!(chat_id = %chat_id, "ignoring unknown command during draft");
      return Ok(());
    },
    StepInput::Cancel => {
      dialogue.reset().await?;
      bot
        .send_message(chat_id, "❌ Ticket creation cancelled.")
        .reply_markup(views::main_menu_only_keyboard())
        .await?;
      return Ok(());
    },
    StepInput::Text(text) => text,
  };

  if draft.stage == DraftStage::Confirm {
    let preview = views::render_draft_preview(&draft);
    bot
      .send_message(chat_id, "Use the buttons below to submit or cancel.")
      .await?;
    return present(&bot, Screen::Send(chat_id), preview, views::draft_confirm_keyboard()).await;
  }

  let field = if draft.stage == DraftStage::Title {
    "Title"
  } else {
    "Description"
  };
  match advance_draft(draft, text) {
    Ok(next) if next.stage == DraftStage::Confirm => {
      let preview = views::render_draft_preview(&next);
      dialogue.update(ConversationState::NewTicket(next)).await?;
      present(&bot, Screen::Send(chat_id), preview, views::draft_confirm_keyboard()).await?;
    },
    Ok(next) => {
      dialogue.update(ConversationState::NewTicket(next)).await?;
      bot.send_message(chat_id, BODY_PROMPT).await?;
    },
    Err(err) => {
      bot.send_message(chat_id, format!("⚠️ {field} {err}.")).await?;
    },
  }

  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_reply_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  ticket_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  let chat_id = msg.chat.id;

  let text = match classify_step_input(message_text(&msg)) {
    StepInput::Missing => {
      bot
        .send_message(chat_id, format!("💬 Send your reply to ticket #{ticket_id} or type cancel."))
        .await?;
      return Ok(());
    },
    StepInput::Command => {
      debug!(chat_id = %chat_id, ticket_id, "ignoring unknown command during reply");
      return Ok(());
    },
    StepInput::Cancel => {
      dialogue.reset().await?;
      bot.send_message(chat_id, "❌ Reply cancelled.").await?;
      return Ok(());
    },
    StepInput::Text(text) => text,
  };

  let body = match validate_text(text, MAX_BODY_CHARS) {
    Ok(body) => body,
    Err(err) => {
      bot.send_message(chat_id, format!("⚠️ Reply {err}.")).await?;
      return Ok(());
    },
  };

  let caller = Caller::from_user(user);
  match ctx.api().add_comment(&caller, ticket_id, &NewComment { body }).await {
    Ok(comment) => {
      dialogue.reset().await?;
      info!(user_id = caller.id, ticket_id, comment_id = comment.id, "reply posted");
      bot
        .send_message(chat_id, format!("💬 Reply added to ticket #{ticket_id}."))
        .await?;
      show_ticket(&bot, &ctx, &caller, Screen::Send(chat_id), ticket_id).await?;
    },
    Err(err) => {
      if matches!(err, ApiError::NotFound) {
        dialogue.reset().await?;
      }
      report_api_error(&bot, chat_id, &err, "failed to post reply").await?;
    },
  }
  Ok(())
}

#[instrument(skip(bot, msg))]
async fn handle_idle_text(bot: Bot, msg: Message, state: ConversationState) -> HandlerResult {
  // unknown commands fall through to here and are ignored
  if matches!(state, ConversationState::Idle)
    && let Some(text) = msg.text()
    && !text.starts_with('/')
  {
    info!(chat_id = %msg.chat.id, "idle state received unrecognized message");
    bot
      .send_message(msg.chat.id, "I did not understand that. Use the menu buttons or /help.")
      .await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, query))]
async fn handle_callback_query(
  bot: Bot,
  ctx: SharedContext,
  query: CallbackQuery,
  dialogue: BotDialogue,
) -> HandlerResult {
  let caller = Caller::from_user(&query.from);
  let message_ctx = query.message.as_ref().map(|message| (message.chat().id, message.id()));
  let callback_data = query.data.as_deref().unwrap_or("<empty>");
  info!(user_id = caller.id, callback = callback_data, "handling callback query");

  let outcome = match (CallbackAction::parse(callback_data), message_ctx) {
    (Some(action), Some((chat_id, message_id))) => {
      dispatch_callback(&bot, &ctx, &dialogue, &caller, action, chat_id, message_id).await
    },
    (Some(_), None) => Ok(Some("⌛ This menu has expired. Use /start.".to_string())),
    (None, _) => {
      debug!(user_id = caller.id, callback = callback_data, "ignoring unknown callback payload");
      Ok(None)
    },
  };
  if let Err(err) = &outcome {
    warn!(user_id = caller.id, callback = callback_data, error = %err, "callback handling failed");
  }

  let answer = bot.answer_callback_query(query.id);
  match callback_toast(&outcome) {
    Some(text) => answer.text(text).await?,
    None => answer.await?,
  };
  outcome.map(|_| ())
}

/// Toast to answer a callback with. Failed callbacks are answered too so the
/// client stops waiting.
fn callback_toast(outcome: &anyhow::Result<Option<String>>) -> Option<String> {
  match outcome {
    Ok(text) => text.as_deref().map(|text| truncate_chars(text, CALLBACK_TEXT_LIMIT)),
    Err(_) => Some(CALLBACK_FAILED_TEXT.to_string()),
  }
}

/// Runs a parsed callback action and returns the toast text to answer with.
async fn dispatch_callback(
  bot: &Bot,
  ctx: &SharedContext,
  dialogue: &BotDialogue,
  caller: &Caller,
  action: CallbackAction,
  chat_id: ChatId,
  message_id: MessageId,
) -> anyhow::Result<Option<String>> {
  let screen = Screen::Edit(chat_id, message_id);
  match action {
    CallbackAction::Menu(MenuTarget::Root) => {
      dialogue.reset().await?;
      present(
        bot,
        screen,
        views::MAIN_MENU_TEXT.to_string(),
        views::main_menu_keyboard(),
      )
      .await?;
      Ok(None)
    },
    CallbackAction::Menu(MenuTarget::Tickets) => {
      show_ticket_list(bot, ctx, caller, screen, 1).await?;
      Ok(None)
    },
    CallbackAction::TicketsPage(page) => {
      show_ticket_list(bot, ctx, caller, screen, page).await?;
      Ok(None)
    },
    CallbackAction::Menu(MenuTarget::New) => {
      start_draft(bot, dialogue, chat_id, caller.id).await?;
      Ok(Some("📝 Starting a new ticket.".to_string()))
    },
    CallbackAction::Menu(MenuTarget::Profile) => {
      show_profile(bot, ctx, caller, screen).await?;
      Ok(None)
    },
    CallbackAction::ShowTicket(ticket_id) => {
      show_ticket(bot, ctx, caller, screen, ticket_id).await?;
      Ok(None)
    },
    CallbackAction::Reply(ticket_id) => {
      dialogue.update(ConversationState::Reply { ticket_id }).await?;
      bot
        .send_message(
          chat_id,
          format!("💬 Send your reply to ticket #{ticket_id} (or type cancel):"),
        )
        .await?;
      Ok(Some("💬 Waiting for your reply.".to_string()))
    },
    CallbackAction::Close(ticket_id) => match ctx.api().close_ticket(caller, ticket_id).await {
      Ok(ticket) => {
        info!(user_id = caller.id, ticket_id, "ticket closed");
        present(bot, screen, views::render_ticket(&ticket), views::ticket_keyboard(&ticket)).await?;
        Ok(Some("✅ Ticket closed.".to_string()))
      },
      Err(err) => {
        warn!(user_id = caller.id, ticket_id, error = %err, "failed to close ticket");
        Ok(Some(err.user_message()))
      },
    },
    CallbackAction::ConfirmDraft => submit_draft(bot, ctx, dialogue, caller, screen).await,
    CallbackAction::CancelDraft => {
      if matches!(dialogue.get().await?, Some(ConversationState::NewTicket(_))) {
        dialogue.reset().await?;
      }
      present(
        bot,
        screen,
        "❌ Ticket creation cancelled.".to_string(),
        views::main_menu_only_keyboard(),
      )
      .await?;
      Ok(Some("Cancelled.".to_string()))
    },
  }
}

async fn submit_draft(
  bot: &Bot,
  ctx: &SharedContext,
  dialogue: &BotDialogue,
  caller: &Caller,
  screen: Screen,
) -> anyhow::Result<Option<String>> {
  let Some(ticket) = confirmed_ticket(dialogue.get().await?, caller.id) else {
    return Ok(Some("⌛ This draft is no longer active.".to_string()));
  };

  match ctx.api().create_ticket(caller, &ticket).await {
    Ok(created) => {
      dialogue.reset().await?;
      info!(user_id = caller.id, ticket_id = created.id, "ticket created");
      present(bot, screen, views::render_ticket(&created), views::ticket_keyboard(&created)).await?;
      Ok(Some(format!("🎫 Ticket #{} created.", created.id)))
    },
    Err(err) => {
      warn!(user_id = caller.id, error = %err, "failed to create ticket");
      Ok(Some(err.user_message()))
    },
  }
}

/// The ticket to create when `caller_id` confirms, if their draft is still
/// waiting for confirmation.
fn confirmed_ticket(state: Option<ConversationState>, caller_id: i64) -> Option<NewTicket> {
  match state {
    Some(ConversationState::NewTicket(draft)) if draft.stage == DraftStage::Confirm && draft.is_author(caller_id) => {
      Some(NewTicket {
        title: draft.title?,
        body: draft.body?,
      })
    },
    _ => None,
  }
}

/// Applies typed input to a draft in the Title or Body stage. A draft at
/// Confirm is returned unchanged.
fn advance_draft(mut draft: TicketDraft, text: &str) -> Result<TicketDraft, TextError> {
  match draft.stage {
    DraftStage::Title => {
      draft.title = Some(validate_text(text, MAX_TITLE_CHARS)?);
      draft.stage = DraftStage::Body;
    },
    DraftStage::Body => {
      draft.body = Some(validate_text(text, MAX_BODY_CHARS)?);
      draft.stage = DraftStage::Confirm;
    },
    DraftStage::Confirm => {},
  }
  Ok(draft)
}

fn classify_step_input(text: Option<&str>) -> StepInput<'_> {
  match text {
    None => StepInput::Missing,
    Some(text) if is_cancel(text) => StepInput::Cancel,
    // commands the dispatcher did not recognise
    Some(text) if text.starts_with('/') => StepInput::Command,
    Some(text) => StepInput::Text(text),
  }
}

async fn start_draft(bot: &Bot, dialogue: &BotDialogue, chat_id: ChatId, user_id: i64) -> HandlerResult {
  dialogue
    .update(ConversationState::NewTicket(TicketDraft::new(user_id)))
    .await?;
  info!(user_id, chat_id = %chat_id, "started ticket draft");
  bot.send_message(chat_id, TITLE_PROMPT).await?;
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_ticket_list(bot: &Bot, ctx: &SharedContext, caller: &Caller, screen: Screen, page: u32) -> HandlerResult {
  match ctx.api().list_tickets(caller, page).await {
    Ok(page) => {
      info!(user_id = caller.id, page = page.page, count = page.items.len(), "rendering ticket list");
      present(
        bot,
        screen,
        views::render_ticket_list(&page),
        views::ticket_list_keyboard(&page),
      )
      .await
    },
    Err(err) => report_api_error(bot, screen.chat(), &err, "failed to list tickets").await,
  }
}

#[instrument(skip(bot, ctx))]
async fn show_ticket(bot: &Bot, ctx: &SharedContext, caller: &Caller, screen: Screen, ticket_id: i64) -> HandlerResult {
  match ctx.api().get_ticket(caller, ticket_id).await {
    Ok(ticket) => present(bot, screen, views::render_ticket(&ticket), views::ticket_keyboard(&ticket)).await,
    Err(err) => report_api_error(bot, screen.chat(), &err, "failed to load ticket").await,
  }
}

#[instrument(skip(bot, ctx))]
async fn show_profile(bot: &Bot, ctx: &SharedContext, caller: &Caller, screen: Screen) -> HandlerResult {
  match ctx.api().profile(caller).await {
    Ok(profile) => {
      present(
        bot,
        screen,
        views::render_profile(&profile),
        views::main_menu_only_keyboard(),
      )
      .await
    },
    Err(err) => report_api_error(bot, screen.chat(), &err, "failed to load profile").await,
  }
}

/// Sends or edits an HTML screen. Edits that change nothing are fine, and
/// messages Telegram no longer lets us edit are replaced by a new one.
async fn present(bot: &Bot, screen: Screen, text: String, keyboard: InlineKeyboardMarkup) -> HandlerResult {
  let (chat, message_id) = match screen {
    Screen::Send(chat) => {
      bot
        .send_message(chat, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;
      return Ok(());
    },
    Screen::Edit(chat, message_id) => (chat, message_id),
  };

  let result = bot
    .edit_message_text(chat, message_id, text.clone())
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard.clone())
    .await;
  match classify_edit(result)? {
    EditOutcome::Updated => debug!(chat_id = %chat, message_id = message_id.0, "updated message"),
    EditOutcome::Unchanged => {
      info!(chat_id = %chat, message_id = message_id.0, "message already current");
    },
    EditOutcome::Resend => {
      warn!(chat_id = %chat, message_id = message_id.0, "message can't be edited, sending a new one");
      bot
        .send_message(chat, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;
    },
  }
  Ok(())
}

fn classify_edit<T>(result: Result<T, RequestError>) -> Result<EditOutcome, RequestError> {
  match result {
    Ok(_) => Ok(EditOutcome::Updated),
    Err(RequestError::Api(TelegramApiError::MessageNotModified)) => Ok(EditOutcome::Unchanged),
    Err(RequestError::Api(TelegramApiError::MessageCantBeEdited)) => Ok(EditOutcome::Resend),
    Err(err) => Err(err),
  }
}

async fn report_api_error(bot: &Bot, chat: ChatId, err: &ApiError, what: &str) -> HandlerResult {
  warn!(chat_id = %chat, error = %err, "{what}");
  bot.send_message(chat, err.user_message()).await?;
  Ok(())
}

fn user_sync(user: &User) -> UserSync {
  UserSync {
    telegram_id: user.id.0 as i64,
    username: user.username.clone(),
    first_name: user.first_name.clone(),
    last_name: user.last_name.clone(),
    language_code: user.language_code.clone(),
  }
}

fn message_text(msg: &Message) -> Option<&str> {
  msg
    .text()
    .or_else(|| msg.caption())
    .map(str::trim)
    .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use serde_json::json;
  use teloxide::ApiError as TelegramApiError;
  use teloxide::RequestError;
  use teloxide::types::ChatId;
  use teloxide::types::MessageId;
  use teloxide::types::User;

  use super::CALLBACK_FAILED_TEXT;
  use super::CALLBACK_TEXT_LIMIT;
  use super::EditOutcome;
  use super::Screen;
  use super::StepInput;
  use super::advance_draft;
  use super::callback_toast;
  use super::classify_edit;
  use super::classify_step_input;
  use super::confirmed_ticket;
  use super::throttled;
  use super::user_sync;
  use crate::bot::state::ConversationState;
  use crate::bot::state::DraftStage;
  use crate::bot::state::TicketDraft;
  use crate::rate_limit::RateLimiter;
  use crate::session::MemorySessionStore;
  use crate::util::MAX_TITLE_CHARS;
  use crate::util::TextError;

  fn user(id: u64) -> User {
    serde_json::from_value(json!({
      "id": id,
      "is_bot": false,
      "first_name": "Ada",
      "last_name": "Lovelace",
      "username": "ada",
      "language_code": "en"
    }))
    .unwrap()
  }

  fn confirmed_draft(author: i64) -> TicketDraft {
    let draft = advance_draft(TicketDraft::new(author), "Printer on fire").unwrap();
    advance_draft(draft, "Smoke everywhere").unwrap()
  }

  #[test]
  fn screen_reports_its_chat() {
    assert_eq!(Screen::Send(ChatId(5)).chat(), ChatId(5));
    assert_eq!(Screen::Edit(ChatId(6), MessageId(1)).chat(), ChatId(6));
  }

  #[test]
  fn user_sync_copies_telegram_identity() {
    let sync = user_sync(&user(77));
    assert_eq!(sync.telegram_id, 77);
    assert_eq!(sync.username.as_deref(), Some("ada"));
    assert_eq!(sync.first_name, "Ada");
    assert_eq!(sync.last_name.as_deref(), Some("Lovelace"));
    assert_eq!(sync.language_code.as_deref(), Some("en"));
  }

  #[test]
  fn draft_moves_from_title_to_body_to_confirm() {
    let draft = advance_draft(TicketDraft::new(1), "  Printer on fire ").unwrap();
    assert_eq!(draft.stage, DraftStage::Body);
    assert_eq!(draft.title.as_deref(), Some("Printer on fire"));

    let draft = advance_draft(draft, "Smoke everywhere").unwrap();
    assert_eq!(draft.stage, DraftStage::Confirm);
    assert_eq!(draft.body.as_deref(), Some("Smoke everywhere"));

    let unchanged = advance_draft(draft.clone(), "more text").unwrap();
    assert_eq!(unchanged, draft);
  }

  #[test]
  fn invalid_draft_input_keeps_the_stage() {
    assert_eq!(advance_draft(TicketDraft::new(1), "   "), Err(TextError::Empty));
    assert_eq!(
      advance_draft(TicketDraft::new(1), &"x".repeat(MAX_TITLE_CHARS + 1)),
      Err(TextError::TooLong(MAX_TITLE_CHARS))
    );
  }

  #[test]
  fn step_input_recognises_cancel_and_commands() {
    assert_eq!(classify_step_input(None), StepInput::Missing);
    assert_eq!(classify_step_input(Some("CANCEL")), StepInput::Cancel);
    assert_eq!(classify_step_input(Some("/cancel")), StepInput::Cancel);
    assert_eq!(classify_step_input(Some("/foo")), StepInput::Command);
    assert_eq!(classify_step_input(Some("the printer /is/ down")), StepInput::Text("the printer /is/ down"));
  }

  #[test]
  fn only_the_author_can_submit_a_confirmed_draft() {
    let state = Some(ConversationState::NewTicket(confirmed_draft(5)));
    let ticket = confirmed_ticket(state.clone(), 5).unwrap();
    assert_eq!(ticket.title, "Printer on fire");
    assert_eq!(ticket.body, "Smoke everywhere");
    assert!(confirmed_ticket(state, 6).is_none());
  }

  #[test]
  fn stale_drafts_are_not_submitted() {
    assert!(confirmed_ticket(None, 5).is_none());
    assert!(confirmed_ticket(Some(ConversationState::Idle), 5).is_none());
    assert!(confirmed_ticket(Some(ConversationState::Reply { ticket_id: 1 }), 5).is_none());
    let unfinished = advance_draft(TicketDraft::new(5), "Title only").unwrap();
    assert!(confirmed_ticket(Some(ConversationState::NewTicket(unfinished)), 5).is_none());
  }

  #[test]
  fn failed_callbacks_still_get_a_toast() {
    let failed: anyhow::Result<Option<String>> = Err(anyhow::anyhow!("session store down"));
    assert_eq!(callback_toast(&failed).as_deref(), Some(CALLBACK_FAILED_TEXT));
    assert_eq!(callback_toast(&Ok(None)), None);

    let long = Ok(Some("x".repeat(500)));
    let toast = callback_toast(&long).unwrap();
    assert_eq!(toast.chars().count(), CALLBACK_TEXT_LIMIT);
  }

  #[test]
  fn edit_races_are_absorbed() {
    assert_eq!(classify_edit::<()>(Ok(())).unwrap(), EditOutcome::Updated);
    assert_eq!(
      classify_edit::<()>(Err(RequestError::Api(TelegramApiError::MessageNotModified))).unwrap(),
      EditOutcome::Unchanged
    );
    assert_eq!(
      classify_edit::<()>(Err(RequestError::Api(TelegramApiError::MessageCantBeEdited))).unwrap(),
      EditOutcome::Resend
    );
    assert!(matches!(
      classify_edit::<()>(Err(RequestError::Api(TelegramApiError::BotBlocked))),
      Err(RequestError::Api(TelegramApiError::BotBlocked))
    ));
  }

  #[tokio::test]
  async fn gate_throttles_senders_over_the_limit() {
    let limiter = RateLimiter::per_minute(Arc::new(MemorySessionStore::new()), 1);
    let sender = user(9);
    assert!(!throttled(&limiter, Some(&sender)).await);
    // at most one window boundary can fall between the two later calls
    let later = [
      throttled(&limiter, Some(&sender)).await,
      throttled(&limiter, Some(&sender)).await,
    ];
    assert!(later.contains(&true));
    assert!(!throttled(&limiter, None).await);
  }

  #[tokio::test]
  async fn disabled_gate_lets_everything_through() {
    let limiter = RateLimiter::per_minute(Arc::new(MemorySessionStore::new()), 0);
    let sender = user(9);
    for _ in 0 .. 50 {
      assert!(!throttled(&limiter, Some(&sender)).await);
    }
  }
}
