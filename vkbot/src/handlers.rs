//! Demo handlers wired by `vkbot run`.

use vkbot_core::{Button, Keyboard, Message, Reply, Result};

pub const HELP_TEXT: &str = "Commands:\n/ping - check that the bot is alive\n/help - this message";

pub fn ping(_message: &Message) -> Result<Reply> {
    Ok(Reply::text("pong"))
}

/// Help text plus a one-time keyboard with the commands.
pub fn help(_message: &Message) -> Result<Reply> {
    let keyboard = Keyboard {
        one_time: true,
        buttons: vec![vec![
            Button::text("/ping", None).with_color("primary"),
            Button::text("/help", None),
        ]],
        ..Default::default()
    };
    Ok(Reply::text(HELP_TEXT).with_keyboard(keyboard))
}
