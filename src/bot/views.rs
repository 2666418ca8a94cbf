//! Message text and inline keyboards. Everything here is HTML parse mode.

use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::utils::html;

use crate::bot::callbacks::CallbackAction;
use crate::bot::callbacks::MenuTarget;
use crate::bot::state::TicketDraft;
use crate::models::Profile;
use crate::models::Ticket;
use crate::models::TicketPage;
use crate::util::truncate_chars;
use crate::util::truncate_utf16;

pub const MAIN_MENU_TEXT: &str = "🎫 Helpdesk\n\nWhat would you like to do?";
/// Telegram's limit on message text, in UTF-16 code units after entity parsing.
pub const MESSAGE_LIMIT: usize = 4096;
const BUTTON_TITLE_CHARS: usize = 40;
const RECENT_COMMENTS: usize = 5;
const TITLE_UNITS: usize = 256;
const AUTHOR_UNITS: usize = 64;
const BODY_WITH_REPLIES_UNITS: usize = 1500;
const COMMENT_UNITS: usize = 500;
const REPLIES_SUMMARY_RESERVE: usize = 64;

/// Length of our own HTML as Telegram displays it: tags are dropped and
/// entities count as one unit.
pub fn visible_len(html: &str) -> usize {
  let mut len = 0;
  let mut in_tag = false;
  let mut in_entity = false;
  for ch in html.chars() {
    match ch {
      '<' if !in_entity => in_tag = true,
      '>' if in_tag => in_tag = false,
      _ if in_tag => {},
      '&' => {
        in_entity = true;
        len += 1;
      },
      ';' if in_entity => in_entity = false,
      _ if in_entity => {},
      _ => len += ch.len_utf16(),
    }
  }
  len
}

fn button(text: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
  InlineKeyboardButton::callback(text, action.data())
}

fn back_to_menu() -> InlineKeyboardButton {
  button("⬅️ Main menu", CallbackAction::Menu(MenuTarget::Root))
}

pub fn main_menu_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![
    vec![
      button("🆕 New ticket", CallbackAction::Menu(MenuTarget::New)),
      button("📋 My tickets", CallbackAction::Menu(MenuTarget::Tickets)),
    ],
    vec![button("👤 Profile", CallbackAction::Menu(MenuTarget::Profile))],
  ])
}

pub fn main_menu_only_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![back_to_menu()]])
}

pub fn render_ticket_list(page: &TicketPage) -> String {
  if page.items.is_empty() {
    return "📋 You have no tickets yet.".to_string();
  }
  format!(
    "📋 Your tickets (page {} of {}):",
    page.page,
    page.total_pages.max(1)
  )
}

pub fn ticket_list_keyboard(page: &TicketPage) -> InlineKeyboardMarkup {
  let mut rows: Vec<Vec<InlineKeyboardButton>> = page
    .items
    .iter()
    .map(|ticket| {
      let label = format!(
        "#{} {} · {}",
        ticket.id,
        truncate_chars(&ticket.title, BUTTON_TITLE_CHARS),
        ticket.status.label()
      );
      vec![button(label, CallbackAction::ShowTicket(ticket.id))]
    })
    .collect();

  let mut paging = Vec::new();
  if page.page > 1 {
    paging.push(button("◀️ Prev", CallbackAction::TicketsPage(page.page - 1)));
  }
  if page.page < page.total_pages {
    paging.push(button("Next ▶️", CallbackAction::TicketsPage(page.page + 1)));
  }
  if !paging.is_empty() {
    rows.push(paging);
  }

  rows.push(vec![
    button("🆕 New ticket", CallbackAction::Menu(MenuTarget::New)),
    back_to_menu(),
  ]);
  InlineKeyboardMarkup::new(rows)
}

pub fn render_ticket(ticket: &Ticket) -> String {
  let mut text = format!(
    "<b>#{} {}</b>\nStatus: {}\nOpened: {}\nUpdated: {}\n\n",
    ticket.id,
    html::escape(&truncate_utf16(&ticket.title, TITLE_UNITS)),
    ticket.status.label(),
    ticket.created_at.format("%Y-%m-%d %H:%M UTC"),
    ticket.updated_at.format("%Y-%m-%d %H:%M UTC"),
  );
  let body_units = if ticket.comments.is_empty() {
    MESSAGE_LIMIT
  } else {
    BODY_WITH_REPLIES_UNITS
  };
  let body_budget = body_units.min(MESSAGE_LIMIT.saturating_sub(visible_len(&text)));
  text.push_str(&html::escape(&truncate_utf16(&ticket.body, body_budget)));

  if ticket.comments.is_empty() {
    return text;
  }

  // newest first until the budget runs out, rendered oldest first
  let mut used = visible_len(&text) + REPLIES_SUMMARY_RESERVE;
  let mut blocks = Vec::new();
  for comment in ticket.comments.iter().rev().take(RECENT_COMMENTS) {
    let block = format!(
      "\n\n<b>{}</b> · {}\n{}",
      html::escape(&truncate_utf16(&comment.author, AUTHOR_UNITS)),
      comment.created_at.format("%Y-%m-%d %H:%M"),
      html::escape(&truncate_utf16(&comment.body, COMMENT_UNITS)),
    );
    let block_len = visible_len(&block);
    if used + block_len > MESSAGE_LIMIT {
      break;
    }
    used += block_len;
    blocks.push(block);
  }

  let hidden = ticket.comments.len() - blocks.len();
  text.push_str(&format!("\n\n💬 Replies ({}):", ticket.comments.len()));
  if hidden > 0 {
    text.push_str(&format!("\n<i>… {hidden} earlier repl(ies) hidden</i>"));
  }
  for block in blocks.iter().rev() {
    text.push_str(block);
  }
  text
}

pub fn ticket_keyboard(ticket: &Ticket) -> InlineKeyboardMarkup {
  let mut rows = Vec::new();
  if !ticket.is_closed() {
    rows.push(vec![
      button("💬 Reply", CallbackAction::Reply(ticket.id)),
      button("✅ Close", CallbackAction::Close(ticket.id)),
    ]);
  }
  rows.push(vec![
    button("📋 All tickets", CallbackAction::TicketsPage(1)),
    back_to_menu(),
  ]);
  InlineKeyboardMarkup::new(rows)
}

pub fn render_draft_preview(draft: &TicketDraft) -> String {
  let head = format!(
    "📝 Please confirm your ticket:\n\n<b>{}</b>\n\n",
    html::escape(&truncate_utf16(draft.title.as_deref().unwrap_or("-"), TITLE_UNITS)),
  );
  let budget = MESSAGE_LIMIT.saturating_sub(visible_len(&head));
  let body = truncate_utf16(draft.body.as_deref().unwrap_or("-"), budget);
  format!("{head}{}", html::escape(&body))
}

pub fn draft_confirm_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![
    button("✅ Submit", CallbackAction::ConfirmDraft),
    button("❌ Cancel", CallbackAction::CancelDraft),
  ]])
}

pub fn render_profile(profile: &Profile) -> String {
  let email = profile.email.as_deref().map(html::escape).unwrap_or_else(|| "not linked".to_string());
  format!(
    "👤 <b>{}</b>\nAccount: #{}\nEmail: {}\nOpen tickets: {}\nMember since: {}",
    html::escape(&truncate_utf16(&profile.display_name, TITLE_UNITS)),
    profile.id,
    email,
    profile.open_tickets,
    profile.created_at.format("%Y-%m-%d"),
  )
}
