use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
  /// Open the main menu
  Start,
  /// Show the help text
  Help,
  /// Open a new support ticket
  New,
  /// List your tickets
  Tickets,
  /// Show a ticket by number, e.g. /ticket 42
  Ticket(String),
  /// Show your helpdesk profile
  Profile,
  /// Check the helpdesk backend (admins only)
  Status,
  /// Abort the current step
  Cancel,
}
