//! Session parsers, by name.

use crate::context::ParserRegistry;

pub mod console;
pub mod login;
pub mod main_menu;

pub fn registry() -> ParserRegistry {
    ParserRegistry::new(&[
        ("login", login::login_parser),
        ("main_menu", main_menu::main_menu),
        ("console", console::console),
    ])
}
