use state::PersistedState;
use tracing::{debug, info, warn};

/// Bot commands understood by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AddProduct,
    RemoveProduct,
    TriggerPrice,
    ListProduct,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::AddProduct,
        Command::RemoveProduct,
        Command::TriggerPrice,
        Command::ListProduct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::AddProduct => "/addproduct",
            Command::RemoveProduct => "/removeproduct",
            Command::TriggerPrice => "/triggerprice",
            Command::ListProduct => "/listproduct",
        }
    }
}

/// Largest argument the store can hold; SQLite integers are signed 64-bit.
pub const MAX_ARGUMENT: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Command(Command),
    Argument(u64),
    Other,
}

impl Token {
    /// Exact match only: no trimming, no case folding, no `@botname` suffix.
    pub fn parse(text: &str) -> Self {
        if let Some(cmd) = Command::ALL.into_iter().find(|c| c.as_str() == text) {
            return Token::Command(cmd);
        }
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            return match text.parse::<u64>() {
                Ok(value) if value <= MAX_ARGUMENT => Token::Argument(value),
                _ => {
                    warn!(len = text.len(), "numeric argument out of range, ignoring");
                    Token::Other
                }
            };
        }
        Token::Other
    }
}

/// Selects how the next argument message is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    None,
    Add,
    Remove,
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ModeChanged(Mode),
    ListRequested,
    Banned(u64),
    AlreadyBanned(u64),
    Unbanned(u64),
    NotBanned(u64),
    ThresholdSet(u64),
    ThresholdRejected,
    ArgumentIgnored(u64),
    Ignored,
}

impl Effect {
    /// Whether the effect changed the persisted state.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            Effect::Banned(_) | Effect::Unbanned(_) | Effect::ThresholdSet(_)
        )
    }
}

/// Mode register for a single synchronization pass.
#[derive(Debug, Default)]
pub struct CommandParser {
    mode: Mode,
    list_requested: bool,
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn list_requested(&self) -> bool {
        self.list_requested
    }

    pub fn apply(&mut self, token: Token, state: &mut PersistedState) -> Effect {
        let effect = match token {
            Token::Command(Command::ListProduct) => {
                self.list_requested = true;
                Effect::ListRequested
            }
            Token::Command(cmd) => {
                self.mode = match cmd {
                    Command::AddProduct => Mode::Add,
                    Command::RemoveProduct => Mode::Remove,
                    Command::TriggerPrice => Mode::Trigger,
                    Command::ListProduct => self.mode,
                };
                Effect::ModeChanged(self.mode)
            }
            Token::Argument(value) => self.apply_argument(value, state),
            Token::Other => Effect::Ignored,
        };
        debug!(?token, ?effect, mode = ?self.mode, "command token applied");
        effect
    }

    fn apply_argument(&self, value: u64, state: &mut PersistedState) -> Effect {
        match self.mode {
            Mode::Add => {
                if state.banned_ids.insert(value) {
                    info!(id = value, "product banned");
                    Effect::Banned(value)
                } else {
                    Effect::AlreadyBanned(value)
                }
            }
            Mode::Remove => {
                if state.banned_ids.remove(value) {
                    info!(id = value, "product unbanned");
                    Effect::Unbanned(value)
                } else {
                    debug!(id = value, "remove of id that is not banned");
                    Effect::NotBanned(value)
                }
            }
            Mode::Trigger if value == 0 => {
                warn!("price threshold must be positive, keeping previous value");
                Effect::ThresholdRejected
            }
            Mode::Trigger => {
                info!(
                    from = state.price_threshold,
                    to = value,
                    "price threshold updated"
                );
                state.price_threshold = value;
                Effect::ThresholdSet(value)
            }
            Mode::None => Effect::ArgumentIgnored(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_commands() {
        assert_eq!(Token::parse("/addproduct"), Token::Command(Command::AddProduct));
        assert_eq!(Token::parse("/removeproduct"), Token::Command(Command::RemoveProduct));
        assert_eq!(Token::parse("/triggerprice"), Token::Command(Command::TriggerPrice));
        assert_eq!(Token::parse("/listproduct"), Token::Command(Command::ListProduct));
    }

    #[test]
    fn commands_are_case_and_whitespace_sensitive() {
        for text in ["/AddProduct", " /addproduct", "/addproduct ", "/addproduct@bot", "addproduct"] {
            assert_eq!(Token::parse(text), Token::Other, "{text:?}");
        }
    }

    #[test]
    fn parses_plain_digit_arguments() {
        assert_eq!(Token::parse("0"), Token::Argument(0));
        assert_eq!(Token::parse("0042"), Token::Argument(42));
        assert_eq!(Token::parse("44012345678901"), Token::Argument(44_012_345_678_901));
    }

    #[test]
    fn rejects_non_literal_numbers() {
        for text in ["", "-5", "+5", "5.0", "1e3", " 5", "5 ", "٣", "99999999999999999999999"] {
            assert_eq!(Token::parse(text), Token::Other, "{text:?}");
        }
    }

    #[test]
    fn arguments_beyond_signed_range_are_ignored() {
        assert_eq!(Token::parse("9223372036854775807"), Token::Argument(MAX_ARGUMENT));
        assert_eq!(Token::parse("9223372036854775808"), Token::Other);
        assert_eq!(Token::parse("18446744073709551615"), Token::Other);
    }

    #[test]
    fn list_request_keeps_mode() {
        let mut parser = CommandParser::new();
        let mut state = PersistedState::default();
        parser.apply(Token::Command(Command::AddProduct), &mut state);
        parser.apply(Token::Command(Command::ListProduct), &mut state);
        assert_eq!(parser.mode(), Mode::Add);
        assert!(parser.list_requested());
        assert_eq!(parser.apply(Token::Argument(3), &mut state), Effect::Banned(3));
    }

    #[test]
    fn argument_without_mode_is_ignored() {
        let mut parser = CommandParser::new();
        let mut state = PersistedState::default();
        assert_eq!(
            parser.apply(Token::Argument(3), &mut state),
            Effect::ArgumentIgnored(3)
        );
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn mode_applies_to_every_following_argument() {
        let mut parser = CommandParser::new();
        let mut state = PersistedState::default();
        parser.apply(Token::Command(Command::AddProduct), &mut state);
        parser.apply(Token::Argument(1), &mut state);
        parser.apply(Token::Argument(2), &mut state);
        parser.apply(Token::Argument(2), &mut state);
        assert_eq!(state.banned_ids.iter().collect::<Vec<_>>(), vec![1, 2]);

        parser.apply(Token::Command(Command::RemoveProduct), &mut state);
        assert_eq!(parser.apply(Token::Argument(9), &mut state), Effect::NotBanned(9));
        assert_eq!(parser.apply(Token::Argument(1), &mut state), Effect::Unbanned(1));
        assert_eq!(state.banned_ids.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn threshold_last_writer_wins_and_zero_is_rejected() {
        let mut parser = CommandParser::new();
        let mut state = PersistedState::default();
        parser.apply(Token::Command(Command::TriggerPrice), &mut state);
        parser.apply(Token::Argument(500), &mut state);
        parser.apply(Token::Argument(350), &mut state);
        assert_eq!(
            parser.apply(Token::Argument(0), &mut state),
            Effect::ThresholdRejected
        );
        assert_eq!(state.price_threshold, 350);
    }
}
