use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ecosort_core::model::{BinIndex, WasteClass};

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Quit,
    /// Route the selected class to this bin
    AssignBin(BinIndex),
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{Char, Down, Esc, Up};

    if key.kind != KeyEventKind::Press {
        return Action::None;
    }

    // Global quit shortcuts
    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }
    if key.code == Char('q') && key.modifiers.is_empty() {
        return Action::Quit;
    }

    let mut action = Action::None;

    match key.code {
        Up | Char('k') => {
            if app.class_list_index > 0 {
                app.class_list_index -= 1;
            }
        }
        Down | Char('j') => {
            if app.class_list_index + 1 < WasteClass::ALL.len() {
                app.class_list_index += 1;
            }
        }
        Char(digit) => {
            if let Some(bin) = digit
                .to_digit(10)
                .and_then(|number| usize::try_from(number).ok())
                .and_then(|number| number.checked_sub(1))
            {
                action = Action::AssignBin(BinIndex(bin));
            }
        }
        Esc => {
            app.error_message = None;
        }
        _ => {}
    }
    action
}
