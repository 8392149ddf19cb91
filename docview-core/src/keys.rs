use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::command::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    Command(Command),
    BeginSearch,
    SearchQueryChanged { query: String },
    SearchCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
}

#[derive(Debug, Default)]
pub struct KeyMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    search_buffer: String,
}

impl KeyMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.search_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn map_event(&mut self, event: Event) -> KeyAction {
        let Event::Key(key) = event else {
            return KeyAction::None;
        };
        if key.kind == KeyEventKind::Release {
            return KeyAction::None;
        }
        match self.mode {
            InputMode::Normal => self.map_normal(key),
            InputMode::Search => self.map_search(key),
        }
    }

    fn map_normal(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> KeyAction {
        let plain = modifiers.is_empty() || modifiers == KeyModifiers::SHIFT;
        match code {
            KeyCode::Char('0') if self.pending_count.is_none() => {
                self.command(Command::ResetZoom)
            }
            KeyCode::Char(c) if c.is_ascii_digit() && modifiers.is_empty() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                KeyAction::None
            }
            KeyCode::Right | KeyCode::Down | KeyCode::PageDown | KeyCode::Char('j') | KeyCode::Char(' ')
                if plain =>
            {
                let count = self.take_count();
                KeyAction::Command(Command::NextPage { count })
            }
            KeyCode::Left | KeyCode::Up | KeyCode::PageUp | KeyCode::Char('k') if plain => {
                let count = self.take_count();
                KeyAction::Command(Command::PrevPage { count })
            }
            KeyCode::Home => self.command(Command::FirstPage),
            KeyCode::End | KeyCode::Char('G') => self.command(Command::LastPage),
            KeyCode::Char('g') => match self.pending_count.take() {
                Some(page) => {
                    self.pending_digits.clear();
                    KeyAction::Command(Command::GotoPage { page })
                }
                None => self.command(Command::FirstPage),
            },
            KeyCode::Char('+') | KeyCode::Char('=') => self.command(Command::ZoomIn),
            KeyCode::Char('-') => self.command(Command::ZoomOut),
            KeyCode::Char('r') => self.command(Command::Rotate { clockwise: true }),
            KeyCode::Char('R') => self.command(Command::Rotate { clockwise: false }),
            KeyCode::Char('v') => self.command(Command::CycleViewMode),
            KeyCode::Char('w') => self.command(Command::SetFitToWidth { enabled: true }),
            KeyCode::Char('b') => self.command(Command::AddBookmark { title: None }),
            KeyCode::Char('n') => {
                let count = self.take_count();
                KeyAction::Command(Command::SearchNext { count })
            }
            KeyCode::Char('N') => {
                let count = self.take_count();
                KeyAction::Command(Command::SearchPrev { count })
            }
            KeyCode::Char('/') => {
                self.set_mode(InputMode::Search);
                KeyAction::BeginSearch
            }
            KeyCode::Esc => self.command(Command::ClearSearch),
            KeyCode::Char('q') => {
                self.reset_count();
                KeyAction::Quit
            }
            _ => {
                self.reset_count();
                KeyAction::None
            }
        }
    }

    fn map_search(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> KeyAction {
        match code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                KeyAction::SearchCancel
            }
            KeyCode::Enter => {
                let query = std::mem::take(&mut self.search_buffer);
                self.set_mode(InputMode::Normal);
                KeyAction::Command(Command::Search { query })
            }
            KeyCode::Backspace => {
                self.search_buffer.pop();
                KeyAction::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            KeyCode::Char(c) if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT => {
                self.search_buffer.push(c);
                KeyAction::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            _ => KeyAction::None,
        }
    }

    fn command(&mut self, command: Command) -> KeyAction {
        self.reset_count();
        KeyAction::Command(command)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.search_buffer)),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }
}
