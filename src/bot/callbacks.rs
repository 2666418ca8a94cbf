//! Inline keyboard payloads, encoded as `prefix:value`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuTarget {
  Root,
  Tickets,
  New,
  Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
  Menu(MenuTarget),
  TicketsPage(u32),
  ShowTicket(i64),
  Reply(i64),
  Close(i64),
  ConfirmDraft,
  CancelDraft,
}

impl CallbackAction {
  pub fn parse(data: &str) -> Option<Self> {
    let (prefix, value) = data.split_once(':')?;
    match prefix {
      "menu" => match value {
        "root" => Some(Self::Menu(MenuTarget::Root)),
        "tickets" => Some(Self::Menu(MenuTarget::Tickets)),
        "new" => Some(Self::Menu(MenuTarget::New)),
        "profile" => Some(Self::Menu(MenuTarget::Profile)),
        _ => None,
      },
      "tickets" => value.parse().ok().filter(|page| *page > 0).map(Self::TicketsPage),
      "ticket" => value.parse().ok().map(Self::ShowTicket),
      "reply" => value.parse().ok().map(Self::Reply),
      "close" => value.parse().ok().map(Self::Close),
      "draft" => match value {
        "confirm" => Some(Self::ConfirmDraft),
        "cancel" => Some(Self::CancelDraft),
        _ => None,
      },
      _ => None,
    }
  }

  pub fn data(self) -> String {
    match self {
      Self::Menu(MenuTarget::Root) => "menu:root".to_string(),
      Self::Menu(MenuTarget::Tickets) => "menu:tickets".to_string(),
      Self::Menu(MenuTarget::New) => "menu:new".to_string(),
      Self::Menu(MenuTarget::Profile) => "menu:profile".to_string(),
      Self::TicketsPage(page) => format!("tickets:{page}"),
      Self::ShowTicket(id) => format!("ticket:{id}"),
      Self::Reply(id) => format!("reply:{id}"),
      Self::Close(id) => format!("close:{id}"),
      Self::ConfirmDraft => "draft:confirm".to_string(),
      Self::CancelDraft => "draft:cancel".to_string(),
    }
  }
}
